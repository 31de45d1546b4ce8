use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::StoreError;

/// Pipeline variant a project belongs to.
///
/// Each kind has its own data directory and its own [`ModuleOrder`].
///
/// [`ModuleOrder`]: crate::models::order::ModuleOrder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectKind {
    Normalize,
    Link,
}

impl ProjectKind {
    pub const ALL: [ProjectKind; 2] = [ProjectKind::Normalize, ProjectKind::Link];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectKind::Normalize => "normalize",
            ProjectKind::Link => "link",
        }
    }
}

impl fmt::Display for ProjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normalize" => Ok(ProjectKind::Normalize),
            "link" => Ok(ProjectKind::Link),
            other => Err(StoreError::InvalidName(format!(
                "unknown project kind '{other}' (expected 'normalize' or 'link')"
            ))),
        }
    }
}

/// Every stage the pipeline knows about.
///
/// Stage names double as directory names inside a project, so the serialized
/// form must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StageId {
    /// Initial upload; holds the file as received.
    #[serde(rename = "INIT")]
    Init,

    // Normalize stages
    #[serde(rename = "add_selected_columns")]
    AddSelectedColumns,
    #[serde(rename = "replace_mvs")]
    ReplaceMvs,
    #[serde(rename = "recode_types")]
    RecodeTypes,
    #[serde(rename = "concat_with_init")]
    ConcatWithInit,

    // Link stages
    #[serde(rename = "add_selected_project")]
    AddSelectedProject,
    #[serde(rename = "create_es_index")]
    CreateEsIndex,
    #[serde(rename = "create_es_labeller")]
    CreateEsLabeller,
    #[serde(rename = "infer_restriction")]
    InferRestriction,
    #[serde(rename = "perform_restriction")]
    PerformRestriction,
    #[serde(rename = "es_linker")]
    EsLinker,
    #[serde(rename = "link_results_analyzer")]
    LinkResultsAnalyzer,
}

impl StageId {
    pub const ALL: [StageId; 12] = [
        StageId::Init,
        StageId::AddSelectedColumns,
        StageId::ReplaceMvs,
        StageId::RecodeTypes,
        StageId::ConcatWithInit,
        StageId::AddSelectedProject,
        StageId::CreateEsIndex,
        StageId::CreateEsLabeller,
        StageId::InferRestriction,
        StageId::PerformRestriction,
        StageId::EsLinker,
        StageId::LinkResultsAnalyzer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::Init => "INIT",
            StageId::AddSelectedColumns => "add_selected_columns",
            StageId::ReplaceMvs => "replace_mvs",
            StageId::RecodeTypes => "recode_types",
            StageId::ConcatWithInit => "concat_with_init",
            StageId::AddSelectedProject => "add_selected_project",
            StageId::CreateEsIndex => "create_es_index",
            StageId::CreateEsLabeller => "create_es_labeller",
            StageId::InferRestriction => "infer_restriction",
            StageId::PerformRestriction => "perform_restriction",
            StageId::EsLinker => "es_linker",
            StageId::LinkResultsAnalyzer => "link_results_analyzer",
        }
    }

    pub fn is_initial(&self) -> bool {
        matches!(self, StageId::Init)
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageId::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| StoreError::InvalidName(format!("unknown stage '{s}'")))
    }
}
