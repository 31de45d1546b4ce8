//! Export and import of stage parameters
//! Usage: pipeledger [export|import] <project_id> <path>

use anyhow::{Context, Result};
use colored::Colorize;
use std::fs;
use std::path::Path;

use super::common::open_project;
use crate::config::Config;
use crate::fs::FullConfig;
use crate::models::ProjectId;

/// Write every stage document (except INIT and run info) as one JSON file,
/// or to stdout
pub fn export(config: &Config, id: ProjectId, output: Option<&Path>) -> Result<()> {
    let project = open_project(config, &id)?;
    let full_config = project.read_full_config()?;
    let json = serde_json::to_string_pretty(&full_config)?;

    match output {
        Some(path) => {
            fs::write(path, json)
                .with_context(|| format!("Failed to write export file: {}", path.display()))?;
            let documents: usize = full_config.values().map(|files| files.len()).sum();
            println!(
                "{} {documents} document(s) to {}",
                "Exported".green().bold(),
                path.display()
            );
        }
        None => println!("{json}"),
    }
    Ok(())
}

/// Restore documents produced by `export`
pub fn import(config: &Config, id: ProjectId, input: &Path) -> Result<()> {
    let project = open_project(config, &id)?;
    let content = fs::read_to_string(input)
        .with_context(|| format!("Failed to read import file: {}", input.display()))?;
    let full_config: FullConfig = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse import file: {}", input.display()))?;

    project.upload_full_config(&full_config)?;
    let documents: usize = full_config.values().map(|files| files.len()).sum();
    println!("{} {documents} document(s)", "Imported".green().bold());
    Ok(())
}
