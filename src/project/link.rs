use tracing::info;

use super::Project;
use crate::error::{Result, StoreError};
use crate::models::project::SelectedProject;
use crate::models::{FileRole, LogEntry, ProjectId, ProjectKind, StageId, METADATA_FILE};

impl Project {
    /// Use normalize project `project_id` as the `role` side of this link.
    ///
    /// The referenced project must exist. Marks `add_selected_project`
    /// completed for the role and returns that entry.
    pub fn add_selected_project(
        &self,
        role: FileRole,
        project_id: &ProjectId,
        internal: bool,
    ) -> Result<LogEntry> {
        self.require_kind(ProjectKind::Link)?;

        let referenced = self
            .data_dir
            .project_dir(ProjectKind::Normalize, project_id)
            .join(METADATA_FILE);
        if !referenced.is_file() {
            return Err(StoreError::not_found(format!(
                "normalize project {project_id}"
            )));
        }

        // Selection and its log entry land in the same write, so a failed
        // write leaves neither behind.
        let ended = LogEntry::begin(StageId::AddSelectedProject, role.as_str()).end(None);
        self.update_metadata(|meta| {
            meta.link_mut()?.selected_projects.insert(
                role,
                SelectedProject {
                    project_id: project_id.clone(),
                    internal,
                },
            );
            meta.log
                .entry(role.as_str().to_string())
                .or_default()
                .insert(ended.stage, ended.clone());
            Ok(())
        })?;

        info!(
            project = %self.id,
            role = %role,
            selected = %project_id,
            "project selected for linking"
        );
        Ok(ended)
    }

    pub fn selected_project(&self, role: FileRole) -> Result<Option<SelectedProject>> {
        self.require_kind(ProjectKind::Link)?;
        let mut meta = self.metadata()?;
        Ok(meta.link_mut()?.selected_projects.remove(&role))
    }
}
