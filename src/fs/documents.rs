//! Lock-protected document store addressed by `(stage, file)` coordinates.
//!
//! Documents are JSON, one file per coordinate, written as a single atomic
//! unit under an exclusive `fs2` lock. A coordinate that was never written
//! (or whose file exists but is still empty because its first writer has not
//! finished) reads back as the default document.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::fs::locking::{
    locked_read, locked_update, locked_write, LockMode, LockedResource, RetryPolicy,
};
use crate::models::{Coordinate, StageId};

/// Untyped document: a JSON object.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Every JSON document of a project, grouped by stage then file name.
pub type FullConfig = BTreeMap<StageId, BTreeMap<String, serde_json::Value>>;

/// Suffix of per-file run-info documents.
pub const RUN_INFO_SUFFIX: &str = "__run_info.json";

/// Suffix of the per-file log document a stage body may emit.
pub const LOG_SUFFIX: &str = "__log.json";

#[derive(Debug, Clone)]
pub struct DocumentStore {
    root: PathBuf,
    policy: RetryPolicy,
}

impl DocumentStore {
    pub fn new(root: impl Into<PathBuf>, policy: RetryPolicy) -> Self {
        Self {
            root: root.into(),
            policy,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn stage_dir(&self, stage: Option<StageId>) -> PathBuf {
        match stage {
            Some(stage) => self.root.join(stage.as_str()),
            None => self.root.clone(),
        }
    }

    pub fn path_of(&self, coord: &Coordinate) -> PathBuf {
        self.stage_dir(coord.stage).join(&coord.file)
    }

    pub fn exists(&self, coord: &Coordinate) -> bool {
        self.path_of(coord).is_file()
    }

    /// Replace the full content at `coord`.
    pub fn write<T: Serialize>(&self, coord: &Coordinate, document: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(document).map_err(StoreError::Serialize)?;
        self.write_bytes(coord, &bytes)
    }

    /// Read `coord`, falling back to `T::default()` when it was never written.
    pub fn read<T: DeserializeOwned + Default>(&self, coord: &Coordinate) -> Result<T> {
        Ok(self.read_existing(coord)?.unwrap_or_default())
    }

    /// Read `coord`, returning `None` when it was never written.
    pub fn read_existing<T: DeserializeOwned>(&self, coord: &Coordinate) -> Result<Option<T>> {
        let path = self.path_of(coord);
        match locked_read(&path, self.policy)? {
            Some(bytes) => parse(&path, &bytes),
            None => Ok(None),
        }
    }

    /// Read-modify-write of a document in one exclusive critical section.
    ///
    /// The closure sees the default document when `coord` is empty. If it
    /// returns an error nothing is written.
    pub fn update<T, R, F>(&self, coord: &Coordinate, mutate: F) -> Result<R>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnOnce(&mut T) -> Result<R>,
    {
        let path = self.prepare_parent(coord)?;
        locked_update(&path, self.policy, |bytes| {
            let mut document: T = parse(&path, bytes)?.unwrap_or_default();
            let value = mutate(&mut document)?;
            let replacement =
                serde_json::to_vec_pretty(&document).map_err(StoreError::Serialize)?;
            Ok((value, Some(replacement)))
        })
    }

    /// Like [`DocumentStore::update`], but `coord` must already hold a
    /// document; [`StoreError::NotFound`] otherwise.
    pub fn update_existing<T, R, F>(&self, coord: &Coordinate, mutate: F) -> Result<R>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T) -> Result<R>,
    {
        let path = self.path_of(coord);
        if !path.is_file() {
            return Err(StoreError::not_found(coord.to_string()));
        }
        locked_update(&path, self.policy, |bytes| {
            let mut document: T =
                parse(&path, bytes)?.ok_or_else(|| StoreError::not_found(coord.to_string()))?;
            let value = mutate(&mut document)?;
            let replacement =
                serde_json::to_vec_pretty(&document).map_err(StoreError::Serialize)?;
            Ok((value, Some(replacement)))
        })
    }

    /// Replace the raw bytes at `coord` (artifacts, non-JSON outputs).
    pub fn write_bytes(&self, coord: &Coordinate, bytes: &[u8]) -> Result<()> {
        let path = self.prepare_parent(coord)?;
        locked_write(&path, bytes, self.policy)?;
        debug!(coord = %coord, bytes = bytes.len(), "document written");
        Ok(())
    }

    pub fn read_bytes(&self, coord: &Coordinate) -> Result<Option<Vec<u8>>> {
        locked_read(&self.path_of(coord), self.policy)
    }

    /// Delete the resource at `coord`.
    pub fn remove(&self, coord: &Coordinate) -> Result<()> {
        let path = self.path_of(coord);
        if !path.is_file() {
            return Err(StoreError::not_found(coord.to_string()));
        }
        let resource = LockedResource::acquire(&path, LockMode::Exclusive, self.policy)?;
        fs::remove_file(&path).map_err(|e| StoreError::io(&path, e))?;
        resource.release()?;
        debug!(coord = %coord, "document removed");
        Ok(())
    }

    /// File names stored under one stage (or the project root), sorted.
    pub fn list_stage(&self, stage: Option<StageId>) -> Result<Vec<String>> {
        let dir = self.stage_dir(stage);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| StoreError::io(&dir, e))? {
            let entry = entry.map_err(|e| StoreError::io(&dir, e))?;
            if entry.path().is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Stages that have a directory in this namespace.
    pub fn stages_present(&self) -> Result<Vec<StageId>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut stages = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(|e| StoreError::io(&self.root, e))? {
            let entry = entry.map_err(|e| StoreError::io(&self.root, e))?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name();
            match name.to_str().map(str::parse::<StageId>) {
                Some(Ok(stage)) => stages.push(stage),
                _ => warn!(dir = ?name, "ignoring unknown stage directory"),
            }
        }
        stages.sort();
        Ok(stages)
    }

    /// Collect every JSON document into one structure, for export.
    ///
    /// Stages in `exclude_stages` and files ending with any of
    /// `exclude_suffixes` are left out.
    pub fn read_full_config(
        &self,
        exclude_stages: &[StageId],
        exclude_suffixes: &[&str],
    ) -> Result<FullConfig> {
        let mut full_config = FullConfig::new();
        for stage in self.stages_present()? {
            if exclude_stages.contains(&stage) {
                continue;
            }
            for file in self.list_stage(Some(stage))? {
                if !file.ends_with(".json") || exclude_suffixes.iter().any(|s| file.ends_with(s))
                {
                    continue;
                }
                let coord = Coordinate::stage(stage, file.clone())?;
                if let Some(value) = self.read_existing::<serde_json::Value>(&coord)? {
                    full_config.entry(stage).or_default().insert(file, value);
                }
            }
        }
        Ok(full_config)
    }

    /// Write back everything produced by [`DocumentStore::read_full_config`].
    pub fn upload_full_config(&self, config: &FullConfig) -> Result<()> {
        for (stage, files) in config {
            for (file, value) in files {
                self.write(&Coordinate::stage(*stage, file.clone())?, value)?;
            }
        }
        Ok(())
    }

    fn prepare_parent(&self, coord: &Coordinate) -> Result<PathBuf> {
        let path = self.path_of(coord);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        Ok(path)
    }
}

/// Parse stored bytes; empty content means "never completely written".
fn parse<T: DeserializeOwned>(path: &Path, bytes: &[u8]) -> Result<Option<T>> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(bytes)
        .map(Some)
        .map_err(|source| StoreError::CorruptDocument {
            path: path.to_path_buf(),
            source,
        })
}

/// Name of the run-info document for `file`.
pub fn run_info_file_name(file: &str) -> String {
    format!("{file}{RUN_INFO_SUFFIX}")
}

pub fn log_file_name(file: &str) -> String {
    format!("{file}{LOG_SUFFIX}")
}

/// Every name a stage may store for `file`: the artifact, its run info and
/// its log. Other files that merely share the prefix are not included.
pub fn file_document_names(file: &str) -> [String; 3] {
    [file.to_string(), run_info_file_name(file), log_file_name(file)]
}
