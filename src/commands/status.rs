//! Read-only views of a project's stage log
//! Usage: pipeledger [status|last-written] <project_id>

use anyhow::Result;
use colored::Colorize;

use super::common::{colored_state, format_age, format_timestamp, open_project};
use crate::config::Config;
use crate::error::StoreError;
use crate::models::{ProjectId, StageId};

/// Show every file's log in stage order
pub fn execute(config: &Config, id: ProjectId, file: Option<String>) -> Result<()> {
    let project = open_project(config, &id)?;
    let meta = project.metadata()?;
    let state = project.state();

    println!(
        "{} {} ({})",
        "Project".bold(),
        meta.project_id,
        meta.kind().to_string().cyan()
    );
    if let Some(name) = &meta.display_name {
        println!("  name:     {name}");
    }
    println!("  created:  {}", format_timestamp(Some(meta.created_at)));
    println!("  idle:     {}", format_age(state.time_since_last_action()?));

    let files: Vec<&String> = meta
        .log
        .keys()
        .filter(|f| file.as_ref().is_none_or(|wanted| wanted == *f))
        .collect();
    if files.is_empty() {
        println!("\n(no files)");
        return Ok(());
    }

    for file in files {
        println!("\n{}", file.bold());
        for entry in state.entries(file)? {
            let mut line = format!(
                "  {:<24} {:<10} {}",
                entry.stage.as_str(),
                colored_state(&entry),
                format_timestamp(entry.ended_at.or(entry.started_at))
            );
            if let Some(error) = &entry.error {
                line.push_str(&format!("  {}", error.to_string().red()));
            }
            println!("{line}");
        }
        match state.last_written(None, Some(file), None) {
            Ok(loc) => println!("  current data: {}/{}", loc.stage, loc.file),
            Err(StoreError::NotFound(_)) => println!("  current data: (none)"),
            Err(e) => return Err(e.into()),
        }
    }

    let dangling = state.dangling()?;
    if !dangling.is_empty() {
        println!(
            "\n{} {} stage(s) started but never ended; run 'pipeledger reap {}' once their workers are gone",
            "Warning:".yellow().bold(),
            dangling.len(),
            meta.project_id
        );
    }
    Ok(())
}

/// Print where the current data for a file lives
pub fn last_written(
    config: &Config,
    id: ProjectId,
    stage: Option<StageId>,
    file: Option<String>,
    before: Option<StageId>,
) -> Result<()> {
    let project = open_project(config, &id)?;
    let loc = project
        .state()
        .last_written(stage, file.as_deref(), before)?;
    println!(
        "{}/{}  (ended {})",
        loc.stage,
        loc.file,
        format_timestamp(loc.ended_at)
    );
    Ok(())
}
