//! Commands that change stage state
//! Usage: pipeledger [set-skip|select-columns|reap] <project_id> ...

use anyhow::Result;
use colored::Colorize;

use super::common::open_project;
use crate::config::Config;
use crate::models::{ProjectId, StageId};

/// Mark a stage as (not) applicable to a file
pub fn set_skip(
    config: &Config,
    id: ProjectId,
    stage: StageId,
    file: String,
    unskip: bool,
) -> Result<()> {
    let project = open_project(config, &id)?;
    let entry = project.state().set_skip(stage, &file, !unskip)?;
    let verb = if entry.skipped { "Skipping" } else { "No longer skipping" };
    println!("{} {stage} for {file}", verb.bold());
    Ok(())
}

/// Replace the selected columns of a normalize project
pub fn select_columns(config: &Config, id: ProjectId, columns: Vec<String>) -> Result<()> {
    let project = open_project(config, &id)?;
    let stale = project.add_selected_columns(&columns)?;

    println!("{} {}", "Selected:".bold(), columns.join(", "));
    if stale.is_empty() {
        println!("No stage results invalidated");
    } else {
        println!("{}", "Invalidated:".yellow().bold());
        for coord in stale {
            println!("  {coord}");
        }
    }
    Ok(())
}

/// List dangling entries, or close them as failed
pub fn reap(config: &Config, id: ProjectId, dry_run: bool) -> Result<()> {
    let project = open_project(config, &id)?;
    let state = project.state();

    let entries = if dry_run {
        state.dangling()?
    } else {
        state.fail_dangling()?
    };

    if entries.is_empty() {
        println!("No dangling stages");
        return Ok(());
    }

    let label = if dry_run { "Dangling:" } else { "Closed as failed:" };
    println!("{}", label.yellow().bold());
    for entry in entries {
        println!("  {}/{}", entry.stage, entry.file);
    }
    Ok(())
}
