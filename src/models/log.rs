use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::stage::StageId;
use crate::error::StoreError;

/// Structured failure detail: a stable kind plus a human message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl From<&StoreError> for ErrorInfo {
    fn from(err: &StoreError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// The latest run of one stage for one file.
///
/// State machine:
/// - default: not started, not completed, not skipped
/// - `begin` → started, `ended_at = None` (active)
/// - `end(None)` → completed; `end(Some(err))` → failed with `error`
/// - `written` is set by the run that stored a new version of the data and
///   only survives a successful end
/// - an active entry whose process died stays active forever (dangling)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub stage: StageId,
    pub file: String,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub skipped: bool,
    #[serde(default)]
    pub error: Option<ErrorInfo>,
    #[serde(default)]
    pub written: bool,
}

impl LogEntry {
    /// Entry for a stage that has not run (or was invalidated).
    pub fn pending(stage: StageId, file: impl Into<String>) -> Self {
        Self {
            stage,
            file: file.into(),
            started_at: None,
            ended_at: None,
            completed: false,
            skipped: false,
            error: None,
            written: false,
        }
    }

    pub fn begin(stage: StageId, file: impl Into<String>) -> Self {
        Self {
            started_at: Some(Utc::now()),
            ..Self::pending(stage, file)
        }
    }

    /// Record that this run stored a new version of the data.
    pub fn with_written(mut self, written: bool) -> Self {
        self.written = written;
        self
    }

    /// Close the run; completion is exactly "no error".
    pub fn end(mut self, error: Option<ErrorInfo>) -> Self {
        self.ended_at = Some(Utc::now());
        self.completed = error.is_none();
        self.written &= self.completed;
        self.error = error;
        self
    }

    /// Started but not ended. Persisted active entries mean the run is either
    /// still in flight or its process died.
    pub fn is_active(&self) -> bool {
        self.started_at.is_some() && self.ended_at.is_none()
    }

    /// Completed and not skipped.
    pub fn is_usable(&self) -> bool {
        self.completed && !self.skipped
    }

    /// Whether `last_written` may resolve to this entry.
    pub fn holds_data(&self) -> bool {
        self.is_usable() && self.written
    }

    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Parameters and statistics recorded for the latest run of a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfoRecord {
    pub stage: StageId,
    pub file: String,
    #[serde(default)]
    pub params: serde_json::Value,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stats: serde_json::Value,
}

impl RunInfoRecord {
    pub fn from_entry(
        entry: &LogEntry,
        params: serde_json::Value,
        stats: serde_json::Value,
    ) -> Self {
        Self {
            stage: entry.stage,
            file: entry.file.clone(),
            params,
            started_at: entry.started_at,
            ended_at: entry.ended_at,
            stats,
        }
    }
}

/// Resolved answer to "where is the current data for this file".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub stage: StageId,
    pub file: String,
    pub ended_at: Option<DateTime<Utc>>,
}
