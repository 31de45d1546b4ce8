use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::stage::StageId;
use crate::error::{Result, StoreError};
use crate::validation::validate_file_name;

/// Opaque project identifier: 32 lowercase hex characters from a random UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProjectId(String);

impl ProjectId {
    pub const LEN: usize = 32;

    /// Draw a fresh, non-guessable id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ProjectId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        let well_formed = s.len() == Self::LEN
            && s.chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        if !well_formed {
            return Err(StoreError::InvalidName(format!(
                "'{s}' is not a project id (expected {} lowercase hex characters)",
                Self::LEN
            )));
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for ProjectId {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ProjectId> for String {
    fn from(id: ProjectId) -> Self {
        id.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Address of one document inside a project: `(stage, file)`.
///
/// `stage == None` is the project root, where the metadata document lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coordinate {
    pub stage: Option<StageId>,
    pub file: String,
}

impl Coordinate {
    /// Build a coordinate, rejecting file names that are not a single safe
    /// path component.
    pub fn new(stage: Option<StageId>, file: impl Into<String>) -> Result<Self> {
        let file = file.into();
        validate_file_name(&file)?;
        Ok(Self { stage, file })
    }

    pub fn stage(stage: StageId, file: impl Into<String>) -> Result<Self> {
        Self::new(Some(stage), file)
    }

    pub fn root(file: impl Into<String>) -> Result<Self> {
        Self::new(None, file)
    }

    /// Stage name as used on disk; the empty string for the project root.
    pub fn stage_name(&self) -> &'static str {
        self.stage.map(|s| s.as_str()).unwrap_or("")
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stage {
            Some(stage) => write!(f, "{stage}/{}", self.file),
            None => write!(f, "/{}", self.file),
        }
    }
}
