//! Project lifecycle commands
//! Usage: pipeledger [new|list|delete|exists|metadata]

use anyhow::{bail, Context, Result};
use colored::Colorize;

use super::common::{format_age, format_timestamp, open_project};
use crate::config::Config;
use crate::models::{ProjectId, ProjectKind};

/// Create a project and print its id
pub fn new(
    config: &Config,
    kind: ProjectKind,
    description: Option<String>,
    display_name: Option<String>,
    public: bool,
) -> Result<()> {
    let project = config
        .project_store()
        .create(kind, description, display_name, public)
        .with_context(|| format!("Failed to create {kind} project"))?;

    println!("{} {} project", "Created".green().bold(), kind);
    println!("  id:   {}", project.id().to_string().bold());
    println!("  path: {}", project.dir().display());
    Ok(())
}

/// List projects, optionally restricted to one kind
pub fn list(config: &Config, kind: Option<ProjectKind>) -> Result<()> {
    let store = config.project_store();
    let kinds: Vec<ProjectKind> = match kind {
        Some(kind) => vec![kind],
        None => ProjectKind::ALL.to_vec(),
    };

    let mut found = false;
    for kind in kinds {
        let projects = store.list(kind)?;
        if projects.is_empty() {
            continue;
        }
        found = true;
        println!("{}", format!("{kind} projects").bold());
        for meta in projects {
            let name = meta.display_name.as_deref().unwrap_or("(unnamed)");
            let idle = chrono::Utc::now() - meta.last_activity_at;
            println!(
                "  {}  {:<24} created {}  idle {}",
                meta.project_id,
                name,
                format_timestamp(Some(meta.created_at)),
                format_age(idle)
            );
        }
    }

    if !found {
        println!("(no projects under {})", config.data_root.display());
    }
    Ok(())
}

/// Delete a project and everything it stores
pub fn delete(config: &Config, id: ProjectId, yes: bool) -> Result<()> {
    let project = open_project(config, &id)?;
    if !yes {
        bail!(
            "Refusing to delete {} project {id} without --yes (this removes {})",
            project.kind(),
            project.dir().display()
        );
    }

    config.project_store().delete(project.kind(), &id)?;
    println!("{} project {id}", "Deleted".red().bold());
    Ok(())
}

/// Print whether a project exists
pub fn exists(config: &Config, kind: ProjectKind, id: ProjectId) -> Result<()> {
    let exists = config.project_store().exists(kind, &id);
    println!("{exists}");
    Ok(())
}

/// Print a project's metadata document as JSON
pub fn metadata(config: &Config, id: ProjectId) -> Result<()> {
    let project = open_project(config, &id)?;
    let metadata = project.metadata()?;
    println!("{}", serde_json::to_string_pretty(&metadata)?);
    Ok(())
}
