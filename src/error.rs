//! Error taxonomy for the document store and everything layered on it.
//!
//! Store-level errors propagate unchanged through pipeline state and
//! invalidation. Callers that need a user-facing form use [`StoreError::kind`]
//! or convert into [`crate::models::log::ErrorInfo`].

use std::path::{Path, PathBuf};

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The resource stayed locked by another holder for every retry attempt.
    #[error("{} is locked by another process (gave up after {attempts} attempts)", path.display())]
    LockTimeout { path: PathBuf, attempts: u32 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid column selection: {0}")]
    InvalidSelection(String),

    /// The document changed between the read a decision was based on and
    /// the locked write applying it.
    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),

    /// Stored bytes exist but do not parse. Never repaired automatically.
    #[error("corrupt document {}: {source}", path.display())]
    CorruptDocument {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("stage {stage} for file {file} was started but never ended")]
    DanglingActiveEntry { stage: String, file: String },

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("project already exists: {}", .0.display())]
    ProjectExists(PathBuf),

    #[error("project {project_id} is a {actual} project, expected {expected}")]
    WrongProjectKind {
        project_id: String,
        expected: String,
        actual: String,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize document: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Stable machine-readable kind, used in structured failure reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LockTimeout { .. } => "lock_timeout",
            Self::NotFound(_) => "not_found",
            Self::InvalidSelection(_) => "invalid_selection",
            Self::ConcurrentModification(_) => "concurrent_modification",
            Self::CorruptDocument { .. } => "corrupt_document",
            Self::DanglingActiveEntry { .. } => "dangling_active_entry",
            Self::InvalidName(_) => "invalid_name",
            Self::ProjectExists(_) => "project_exists",
            Self::WrongProjectKind { .. } => "wrong_project_kind",
            Self::Io { .. } => "io",
            Self::Serialize(_) => "serialize",
        }
    }

    /// Whether a caller may reschedule the same operation and expect progress.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LockTimeout { .. } | Self::ConcurrentModification(_)
        )
    }
}
