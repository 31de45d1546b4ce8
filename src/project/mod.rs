//! Project namespaces: one directory per project, holding its metadata
//! document and one sub-directory per stage.

mod link;
mod normalize;

pub use normalize::{Upload, INFERRED_CONFIG_FILE};

use chrono::Utc;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::error::{Result, StoreError};
use crate::fs::documents::{FullConfig, RUN_INFO_SUFFIX};
use crate::fs::{DataDir, DocumentStore, RetryPolicy};
use crate::models::{ModuleOrder, ProjectId, ProjectKind, ProjectMetadata, StageId, METADATA_FILE};
use crate::pipeline::{InvalidationEngine, PipelineSession, PipelineState};
use crate::validation::validate_description;

/// Entry point for creating, opening and deleting projects under a data root.
#[derive(Debug, Clone)]
pub struct ProjectStore {
    data_dir: DataDir,
    policy: RetryPolicy,
}

impl ProjectStore {
    pub fn new(data_dir: DataDir, policy: RetryPolicy) -> Self {
        Self { data_dir, policy }
    }

    pub fn data_dir(&self) -> &DataDir {
        &self.data_dir
    }

    /// Create a project with a fresh id and write its metadata document.
    pub fn create(
        &self,
        kind: ProjectKind,
        description: Option<String>,
        display_name: Option<String>,
        public: bool,
    ) -> Result<Project> {
        if let Some(description) = &description {
            validate_description(description)?;
        }
        self.data_dir.initialize()?;

        let id = ProjectId::generate();
        let dir = self.data_dir.project_dir(kind, &id);
        if dir.exists() {
            return Err(StoreError::ProjectExists(dir));
        }
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;

        let project = self.handle(kind, id.clone());
        let metadata = ProjectMetadata::new(id, kind, description, display_name, public);
        project
            .documents
            .write(&PipelineState::metadata_coord(), &metadata)?;

        info!(project = %project.id, kind = %kind, "project created");
        Ok(project)
    }

    /// Open an existing project, checking that its metadata agrees with the
    /// requested kind and id.
    pub fn open(&self, kind: ProjectKind, id: &ProjectId) -> Result<Project> {
        if !self.exists(kind, id) {
            return Err(StoreError::not_found(format!("{kind} project {id}")));
        }

        let project = self.handle(kind, id.clone());
        let metadata = project.metadata()?;
        if metadata.kind() != kind {
            return Err(StoreError::WrongProjectKind {
                project_id: id.to_string(),
                expected: kind.to_string(),
                actual: metadata.kind().to_string(),
            });
        }
        if &metadata.project_id != id {
            return Err(StoreError::InvalidName(format!(
                "metadata of {id} names project {}",
                metadata.project_id
            )));
        }
        Ok(project)
    }

    /// Open a project without knowing its kind.
    pub fn find(&self, id: &ProjectId) -> Result<Project> {
        ProjectKind::ALL
            .into_iter()
            .find(|kind| self.exists(*kind, id))
            .ok_or_else(|| StoreError::not_found(format!("project {id}")))
            .and_then(|kind| self.open(kind, id))
    }

    pub fn exists(&self, kind: ProjectKind, id: &ProjectId) -> bool {
        self.data_dir
            .project_dir(kind, id)
            .join(METADATA_FILE)
            .is_file()
    }

    /// Remove a project's namespace recursively. Irreversible.
    pub fn delete(&self, kind: ProjectKind, id: &ProjectId) -> Result<()> {
        let dir = self.data_dir.project_dir(kind, id);
        if !dir.is_dir() {
            return Err(StoreError::not_found(format!("{kind} project {id}")));
        }
        fs::remove_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        info!(project = %id, kind = %kind, "project deleted");
        Ok(())
    }

    /// Metadata of every readable project of `kind`. Unreadable projects are
    /// logged and skipped.
    pub fn list(&self, kind: ProjectKind) -> Result<Vec<ProjectMetadata>> {
        let mut projects = Vec::new();
        for id in self.data_dir.project_ids(kind)? {
            match self.handle(kind, id.clone()).metadata() {
                Ok(metadata) => projects.push(metadata),
                Err(e) => warn!(project = %id, error = %e, "skipping unreadable project"),
            }
        }
        Ok(projects)
    }

    fn handle(&self, kind: ProjectKind, id: ProjectId) -> Project {
        let documents = DocumentStore::new(self.data_dir.project_dir(kind, &id), self.policy);
        let state = PipelineState::new(documents.clone(), ModuleOrder::for_kind(kind));
        Project {
            id,
            kind,
            data_dir: self.data_dir.clone(),
            documents,
            state,
        }
    }
}

/// Handle on one project namespace.
#[derive(Debug, Clone)]
pub struct Project {
    id: ProjectId,
    kind: ProjectKind,
    data_dir: DataDir,
    documents: DocumentStore,
    state: PipelineState,
}

impl Project {
    pub fn id(&self) -> &ProjectId {
        &self.id
    }

    pub fn kind(&self) -> ProjectKind {
        self.kind
    }

    pub fn dir(&self) -> &Path {
        self.documents.root()
    }

    pub fn metadata(&self) -> Result<ProjectMetadata> {
        self.state.metadata()
    }

    /// Locked read-modify-write of the metadata document.
    pub fn update_metadata<R, F>(&self, mutate: F) -> Result<R>
    where
        F: FnOnce(&mut ProjectMetadata) -> Result<R>,
    {
        self.state.mutate(mutate)
    }

    pub fn documents(&self) -> &DocumentStore {
        &self.documents
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn invalidation(&self) -> InvalidationEngine {
        InvalidationEngine::new(self.state.clone())
    }

    pub fn session(&self) -> PipelineSession {
        PipelineSession::new(self.state.clone())
    }

    pub fn time_since_created(&self) -> Result<chrono::Duration> {
        Ok(Utc::now() - self.metadata()?.created_at)
    }

    pub fn time_since_last_action(&self) -> Result<chrono::Duration> {
        self.state.time_since_last_action()
    }

    /// Export every stage document except `INIT` and run info.
    pub fn read_full_config(&self) -> Result<FullConfig> {
        self.documents
            .read_full_config(&[StageId::Init], &[RUN_INFO_SUFFIX])
    }

    pub fn upload_full_config(&self, config: &FullConfig) -> Result<()> {
        if let Some(stage) = config.keys().find(|stage| !self.state.order().contains(**stage)) {
            return Err(StoreError::InvalidName(format!(
                "stage {stage} is not part of the {} pipeline",
                self.kind
            )));
        }
        self.documents.upload_full_config(config)
    }

    fn require_kind(&self, expected: ProjectKind) -> Result<()> {
        if self.kind == expected {
            Ok(())
        } else {
            Err(StoreError::WrongProjectKind {
                project_id: self.id.to_string(),
                expected: expected.to_string(),
                actual: self.kind.to_string(),
            })
        }
    }
}
