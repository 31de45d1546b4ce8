use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::coordinate::ProjectId;
use super::log::LogEntry;
use super::stage::{ProjectKind, StageId};
use crate::error::{Result, StoreError};

/// Name of the metadata document at the project root.
pub const METADATA_FILE: &str = "metadata.json";

/// Per-file, per-stage log: `file -> stage -> entry`.
pub type ProjectLog = BTreeMap<String, BTreeMap<StageId, LogEntry>>;

/// The single root document of a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectMetadata {
    pub project_id: ProjectId,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub public: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    #[serde(default)]
    pub log: ProjectLog,
    #[serde(flatten)]
    pub variant: VariantFields,
}

impl ProjectMetadata {
    pub fn new(
        project_id: ProjectId,
        kind: ProjectKind,
        description: Option<String>,
        display_name: Option<String>,
        public: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            project_id,
            description,
            display_name,
            public,
            created_at: now,
            last_activity_at: now,
            log: ProjectLog::new(),
            variant: VariantFields::empty(kind),
        }
    }

    pub fn kind(&self) -> ProjectKind {
        self.variant.kind()
    }

    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }

    pub fn normalize(&self) -> Result<&NormalizeFields> {
        match &self.variant {
            VariantFields::Normalize(fields) => Ok(fields),
            VariantFields::Link(_) => Err(self.wrong_kind(ProjectKind::Normalize)),
        }
    }

    pub fn normalize_mut(&mut self) -> Result<&mut NormalizeFields> {
        let err = self.wrong_kind(ProjectKind::Normalize);
        match &mut self.variant {
            VariantFields::Normalize(fields) => Ok(fields),
            VariantFields::Link(_) => Err(err),
        }
    }

    pub fn link_mut(&mut self) -> Result<&mut LinkFields> {
        let err = self.wrong_kind(ProjectKind::Link);
        match &mut self.variant {
            VariantFields::Link(fields) => Ok(fields),
            VariantFields::Normalize(_) => Err(err),
        }
    }

    /// Log entry for `(stage, file)`, if the stage ever ran or was reset.
    pub fn entry(&self, stage: StageId, file: &str) -> Option<&LogEntry> {
        self.log.get(file).and_then(|stages| stages.get(&stage))
    }

    fn wrong_kind(&self, expected: ProjectKind) -> StoreError {
        StoreError::WrongProjectKind {
            project_id: self.project_id.to_string(),
            expected: expected.to_string(),
            actual: self.kind().to_string(),
        }
    }
}

/// Fields that only exist for one pipeline variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "project_kind", rename_all = "lowercase")]
pub enum VariantFields {
    Normalize(NormalizeFields),
    Link(LinkFields),
}

impl VariantFields {
    pub fn empty(kind: ProjectKind) -> Self {
        match kind {
            ProjectKind::Normalize => VariantFields::Normalize(NormalizeFields::default()),
            ProjectKind::Link => VariantFields::Link(LinkFields::default()),
        }
    }

    pub fn kind(&self) -> ProjectKind {
        match self {
            VariantFields::Normalize(_) => ProjectKind::Normalize,
            VariantFields::Link(_) => ProjectKind::Link,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizeFields {
    #[serde(default)]
    pub column_tracker: Option<ColumnTracker>,
    #[serde(default)]
    pub files: BTreeMap<String, FileInfo>,
}

/// Bookkeeping for one uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub og_file_name: String,
    pub upload_time: DateTime<Utc>,
    #[serde(default)]
    pub nrows: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkFields {
    #[serde(default)]
    pub selected_projects: BTreeMap<FileRole, SelectedProject>,
}

/// Side of a link a normalized project plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileRole {
    Source,
    Ref,
}

impl FileRole {
    /// Log key under which a link project records its selection for this
    /// role.
    pub fn as_str(&self) -> &'static str {
        match self {
            FileRole::Source => "source",
            FileRole::Ref => "ref",
        }
    }
}

impl std::fmt::Display for FileRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FileRole {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "source" => Ok(FileRole::Source),
            "ref" => Ok(FileRole::Ref),
            other => Err(StoreError::InvalidName(format!(
                "file role must be 'source' or 'ref' (got '{other}')"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedProject {
    pub project_id: ProjectId,
    #[serde(default)]
    pub internal: bool,
}

/// Which columns exist and which are enrolled for processing.
///
/// Invariants: `selected ⊆ original`, `created ∩ original = ∅`, and
/// `original` holds distinct names in upload order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnTracker {
    pub original: Vec<String>,
    pub selected: Vec<String>,
    #[serde(default)]
    pub created: Vec<String>,
}

impl ColumnTracker {
    /// Fresh tracker for an uploaded header; everything starts selected.
    pub fn from_header(columns: Vec<String>) -> Self {
        Self {
            selected: columns.clone(),
            original: columns,
            created: Vec::new(),
        }
    }

    /// Check a candidate selection against the invariants without applying it.
    pub fn check_selection(&self, columns: &[String]) -> Result<()> {
        if columns.is_empty() {
            return Err(StoreError::InvalidSelection(
                "select at least one column".into(),
            ));
        }
        if let Some(col) = columns.iter().find(|c| !self.original.contains(c)) {
            return Err(StoreError::InvalidSelection(format!(
                "column '{col}' is not in the uploaded header ({})",
                self.original.join(", ")
            )));
        }
        Ok(())
    }

    /// Replace the selection, keeping it in upload order and free of
    /// duplicates.
    pub fn select(&mut self, columns: &[String]) -> Result<()> {
        self.check_selection(columns)?;
        self.selected = self
            .original
            .iter()
            .filter(|c| columns.contains(c))
            .cloned()
            .collect();
        Ok(())
    }

    /// Record a column introduced by a stage.
    pub fn add_created(&mut self, column: impl Into<String>) -> Result<()> {
        let column = column.into();
        if self.original.contains(&column) {
            return Err(StoreError::InvalidSelection(format!(
                "created column '{column}' collides with an original column"
            )));
        }
        if !self.created.contains(&column) {
            self.created.push(column);
        }
        Ok(())
    }
}
