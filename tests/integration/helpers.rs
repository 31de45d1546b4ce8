//! Shared test helpers for pipeledger integration tests

use std::time::Duration;
use tempfile::TempDir;

use pipeledger::fs::{DataDir, Document, RetryPolicy};
use pipeledger::models::{ErrorInfo, ProjectKind, StageId};
use pipeledger::pipeline::{StageBody, StageInput, StageOutput};
use pipeledger::project::{Project, ProjectStore, Upload};

/// Short retry schedule so contention tests stay fast.
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy::new(5, Duration::from_millis(10))
}

pub fn store(temp: &TempDir) -> ProjectStore {
    ProjectStore::new(DataDir::new(temp.path()), fast_policy())
}

pub fn columns(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// Normalize project with `source.csv` uploaded (columns a, b, c).
pub fn uploaded_project(temp: &TempDir) -> Project {
    let project = store(temp)
        .create(ProjectKind::Normalize, Some("test".into()), None, false)
        .expect("Failed to create project");
    project
        .register_upload(&Upload {
            file_name: "source.csv".into(),
            og_file_name: "source.xlsx".into(),
            columns: columns(&["a", "b", "c"]),
            nrows: Some(2),
            data: Some(b"a,b,c\n1,2,3\n4,5,6\n".to_vec()),
        })
        .expect("Failed to register upload");
    project
}

/// Stage body that appends its stage name to the input.
pub struct Tag(pub StageId);

impl StageBody for Tag {
    fn stage(&self) -> StageId {
        self.0
    }

    fn run(&self, input: &StageInput, _params: &Document) -> Result<StageOutput, ErrorInfo> {
        let mut data = input.data.clone().unwrap_or_default();
        data.extend_from_slice(format!("# {}\n", self.0).as_bytes());
        Ok(StageOutput {
            artifact: Some(data),
            log: None,
            stats: serde_json::json!({"bytes_in": input.data.as_ref().map_or(0, Vec::len)}),
            created_columns: Vec::new(),
        })
    }
}

/// Stage body that only reports on its input and stores no new version.
pub struct Observe(pub StageId);

impl StageBody for Observe {
    fn stage(&self) -> StageId {
        self.0
    }

    fn run(&self, input: &StageInput, _params: &Document) -> Result<StageOutput, ErrorInfo> {
        Ok(StageOutput {
            artifact: None,
            log: Some(serde_json::json!({"rows_seen": input.data.is_some()})),
            stats: serde_json::Value::Null,
            created_columns: Vec::new(),
        })
    }
}

pub fn normalize_bodies() -> [Tag; 3] {
    [
        Tag(StageId::ReplaceMvs),
        Tag(StageId::RecodeTypes),
        Tag(StageId::ConcatWithInit),
    ]
}
