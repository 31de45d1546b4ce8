use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, StoreError};
use crate::models::{ProjectId, ProjectKind};

/// Root of all project namespaces.
///
/// Layout:
///
/// ```text
/// <root>/
///   README.md
///   normalize/<project_id>/metadata.json
///   normalize/<project_id>/<stage>/<file>
///   link/<project_id>/...
/// ```
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Create the root and one directory per project kind. Idempotent.
    pub fn initialize(&self) -> Result<()> {
        for kind in ProjectKind::ALL {
            let path = self.kind_dir(kind);
            fs::create_dir_all(&path).map_err(|e| StoreError::io(&path, e))?;
        }

        let readme = self.root.join("README.md");
        if !readme.exists() {
            self.create_readme()?;
        }

        Ok(())
    }

    fn create_readme(&self) -> Result<()> {
        let readme_content = r#"# pipeledger data directory

This directory is managed by pipeledger and contains:

- `normalize/` - normalization projects, one directory per project id
- `link/` - link projects, one directory per project id

Each project directory holds `metadata.json` (project log and settings) and one
sub-directory per stage with that stage's parameters, run info and outputs.

Do not manually edit these files while workers are running.
"#;

        let readme_path = self.root.join("README.md");
        fs::write(&readme_path, readme_content).map_err(|e| StoreError::io(&readme_path, e))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn kind_dir(&self, kind: ProjectKind) -> PathBuf {
        self.root.join(kind.as_str())
    }

    pub fn project_dir(&self, kind: ProjectKind, id: &ProjectId) -> PathBuf {
        self.kind_dir(kind).join(id.as_str())
    }

    /// Ids of every project of `kind`, sorted. Entries that are not valid ids
    /// are ignored.
    pub fn project_ids(&self, kind: ProjectKind) -> Result<Vec<ProjectId>> {
        let dir = self.kind_dir(kind);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| StoreError::io(&dir, e))? {
            let entry = entry.map_err(|e| StoreError::io(&dir, e))?;
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<ProjectId>().ok())
            {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_initialize_creates_kind_dirs() {
        let temp = TempDir::new().unwrap();
        let data_dir = DataDir::new(temp.path().join("data"));
        data_dir.initialize().unwrap();
        data_dir.initialize().unwrap();

        assert!(data_dir.kind_dir(ProjectKind::Normalize).is_dir());
        assert!(data_dir.kind_dir(ProjectKind::Link).is_dir());
        assert!(data_dir.root().join("README.md").is_file());
    }

    #[test]
    fn test_project_ids_skip_foreign_entries() {
        let temp = TempDir::new().unwrap();
        let data_dir = DataDir::new(temp.path());
        data_dir.initialize().unwrap();

        let id = ProjectId::generate();
        fs::create_dir_all(data_dir.project_dir(ProjectKind::Link, &id)).unwrap();
        fs::create_dir_all(data_dir.kind_dir(ProjectKind::Link).join("scratch")).unwrap();
        fs::write(data_dir.kind_dir(ProjectKind::Link).join("notes.txt"), "x").unwrap();

        assert_eq!(data_dir.project_ids(ProjectKind::Link).unwrap(), vec![id]);
        assert!(data_dir.project_ids(ProjectKind::Normalize).unwrap().is_empty());
    }
}
