use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use colored::{ColoredString, Colorize};

use crate::config::Config;
use crate::models::{LogEntry, ProjectId};
use crate::project::Project;

/// Open a project by id, whatever its kind.
pub fn open_project(config: &Config, id: &ProjectId) -> Result<Project> {
    config
        .project_store()
        .find(id)
        .with_context(|| format!("Failed to open project {id}"))
}

/// Human form of a duration, coarsest unit only.
pub fn format_age(duration: chrono::Duration) -> String {
    let secs = duration.num_seconds().max(0);
    match secs {
        s if s < 60 => format!("{s}s"),
        s if s < 3600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h", s / 3600),
        s => format!("{}d", s / 86_400),
    }
}

pub fn format_timestamp(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// One-word state of a log entry.
pub fn entry_state(entry: &LogEntry) -> &'static str {
    if entry.skipped {
        "skipped"
    } else if entry.is_active() {
        "running"
    } else if entry.completed {
        "completed"
    } else if entry.failed() {
        "failed"
    } else {
        "pending"
    }
}

pub fn colored_state(entry: &LogEntry) -> ColoredString {
    let state = entry_state(entry);
    match state {
        "completed" => state.green(),
        "failed" => state.red(),
        "running" => state.yellow(),
        "skipped" => state.dimmed(),
        _ => state.normal(),
    }
}
