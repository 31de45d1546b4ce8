use chrono::Utc;
use serde_json::json;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use super::Project;
use crate::error::{Result, StoreError};
use crate::fs::documents::file_document_names;
use crate::models::project::FileInfo;
use crate::models::{ColumnTracker, Coordinate, ErrorInfo, LogEntry, ProjectKind, StageId};
use crate::pipeline::InvalidationEngine;
use crate::validation::{clean_column_names, validate_columns, validate_file_name};

/// Upload parameters inferred at read time, stored next to the `INIT` data.
pub const INFERRED_CONFIG_FILE: &str = "infered_config.json";

/// A file entering a normalize project.
#[derive(Debug, Clone)]
pub struct Upload {
    /// Name the file is stored under.
    pub file_name: String,
    /// Name the user uploaded it as.
    pub og_file_name: String,
    /// Header as read from the file, before cleaning.
    pub columns: Vec<String>,
    pub nrows: Option<u64>,
    /// Raw `INIT` data, if the caller wants the store to keep it.
    pub data: Option<Vec<u8>>,
}

impl Project {
    /// Record a new upload: `INIT` entry, file bookkeeping, column tracker
    /// and the inferred config document. Returns the ended `INIT` entry.
    ///
    /// The cleaned header of every upload must match the first one.
    pub fn register_upload(&self, upload: &Upload) -> Result<LogEntry> {
        self.require_kind(ProjectKind::Normalize)?;
        validate_file_name(&upload.file_name)?;
        let columns = clean_column_names(&upload.columns);
        validate_columns(&columns)?;

        let meta = self.metadata()?;
        if meta.normalize()?.files.contains_key(&upload.file_name) {
            return Err(StoreError::InvalidName(format!(
                "file {} already exists; remove it or choose another name",
                upload.file_name
            )));
        }

        // The upload is the first version of the data whether or not the
        // store keeps the bytes.
        let entry = self
            .state
            .begin_stage(StageId::Init, &upload.file_name)?
            .with_written(true);
        match self.store_upload(upload, &columns, &entry) {
            Ok(()) => {
                let ended = self.state.end_stage(entry, None)?;
                info!(
                    project = %self.id,
                    file = %upload.file_name,
                    ncols = columns.len(),
                    "upload registered"
                );
                Ok(ended)
            }
            Err(e) => {
                self.state.end_stage(entry, Some(ErrorInfo::from(&e)))?;
                Err(e)
            }
        }
    }

    fn store_upload(&self, upload: &Upload, columns: &[String], entry: &LogEntry) -> Result<()> {
        let file = upload.file_name.as_str();
        let mut log = self.state.default_log(file);
        log.insert(StageId::Init, entry.clone());

        self.update_metadata(|meta| {
            let fields = meta.normalize_mut()?;
            if let Some(tracker) = &fields.column_tracker {
                if tracker.original != columns {
                    return Err(StoreError::InvalidSelection(format!(
                        "header of {file} ({}) differs from the project header ({})",
                        columns.join(", "),
                        tracker.original.join(", ")
                    )));
                }
            } else {
                fields.column_tracker = Some(ColumnTracker::from_header(columns.to_vec()));
            }
            fields.files.insert(
                file.to_string(),
                FileInfo {
                    og_file_name: upload.og_file_name.clone(),
                    upload_time: Utc::now(),
                    nrows: upload.nrows,
                },
            );
            meta.log.insert(file.to_string(), log);
            Ok(())
        })?;

        if let Some(data) = &upload.data {
            self.documents
                .write_bytes(&Coordinate::stage(StageId::Init, file)?, data)?;
        }

        let inferred = json!({
            "file_name": file,
            "og_file_name": upload.og_file_name,
            "ncols": columns.len(),
            "nrows": upload.nrows,
        });
        self.documents
            .write(&Coordinate::stage(StageId::Init, INFERRED_CONFIG_FILE)?, &inferred)
    }

    /// Currently selected columns.
    pub fn selected_columns(&self) -> Result<Vec<String>> {
        self.require_kind(ProjectKind::Normalize)?;
        let meta = self.metadata()?;
        Ok(meta
            .normalize()?
            .column_tracker
            .as_ref()
            .map(|t| t.selected.clone())
            .unwrap_or_default())
    }

    /// Change the selection. Selecting any column that was not selected
    /// before invalidates every completed stage after `INIT`; the returned
    /// set lists what was invalidated.
    ///
    /// Growth is judged against the selection the locked write actually
    /// replaces. If another caller changed it in between, the call starts
    /// over, up to the project's lock attempt budget.
    pub fn add_selected_columns(&self, columns: &[String]) -> Result<BTreeSet<Coordinate>> {
        self.require_kind(ProjectKind::Normalize)?;
        let attempts = self.documents.policy().attempts;
        let mut attempt = 1;
        loop {
            let previous = self.selection_to_replace(columns)?;
            match self.replace_selection(&previous, columns) {
                Err(StoreError::ConcurrentModification(reason)) if attempt < attempts => {
                    debug!(project = %self.id, attempt, %reason, "selection changed, retrying");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Check `columns` against the tracker and return the current selection.
    fn selection_to_replace(&self, columns: &[String]) -> Result<Vec<String>> {
        let meta = self.metadata()?;
        let tracker = meta
            .normalize()?
            .column_tracker
            .as_ref()
            .ok_or_else(|| StoreError::InvalidSelection("no file uploaded yet".into()))?;
        tracker.check_selection(columns)?;
        Ok(tracker.selected.clone())
    }

    /// Replace `previous` by `columns` in one metadata update: log reset,
    /// removal of stale documents, new selection and `add_selected_columns`
    /// entries. Fails with [`StoreError::ConcurrentModification`], changing
    /// nothing, if the selection is no longer `previous`.
    fn replace_selection(
        &self,
        previous: &[String],
        columns: &[String],
    ) -> Result<BTreeSet<Coordinate>> {
        let engine = self.invalidation();
        let grows = columns.iter().any(|c| !previous.contains(c));

        let now = Utc::now();
        let stale = self.update_metadata(|meta| {
            let current = meta
                .normalize()?
                .column_tracker
                .as_ref()
                .map(|t| t.selected.as_slice())
                .unwrap_or_default();
            if current != previous {
                return Err(StoreError::ConcurrentModification(format!(
                    "selection is now [{}], expected [{}]",
                    current.join(", "),
                    previous.join(", ")
                )));
            }

            let stale = if grows {
                InvalidationEngine::reset_completed(meta, false)?
            } else {
                BTreeSet::new()
            };
            for coord in &stale {
                engine.remove_documents(coord)?;
            }

            let fields = meta.normalize_mut()?;
            if let Some(tracker) = fields.column_tracker.as_mut() {
                tracker.select(columns)?;
            }
            for (file, stages) in meta.log.iter_mut() {
                let entry = stages
                    .entry(StageId::AddSelectedColumns)
                    .or_insert_with(|| {
                        LogEntry::pending(StageId::AddSelectedColumns, file.as_str())
                    });
                entry.started_at = Some(now);
                entry.ended_at = Some(now);
                entry.completed = true;
                entry.error = None;
            }
            Ok(stale)
        })?;

        if !stale.is_empty() {
            warn!(
                project = %self.id,
                count = stale.len(),
                "invalidated stages after selection growth"
            );
        }
        info!(
            project = %self.id,
            selected = columns.len(),
            invalidated = stale.len(),
            "columns selected"
        );
        Ok(stale)
    }

    /// Remove every stored version of `file` and reset its log.
    pub fn remove_all(&self, file: &str) -> Result<()> {
        validate_file_name(file)?;
        let mut removed = 0;
        for stage in self.documents.stages_present()? {
            for name in file_document_names(file) {
                match self.documents.remove(&Coordinate::stage(stage, name)?) {
                    Ok(()) => removed += 1,
                    Err(StoreError::NotFound(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }

        let log = self.state.default_log(file);
        self.update_metadata(|meta| {
            meta.log.insert(file.to_string(), log);
            Ok(())
        })?;

        info!(project = %self.id, file, removed, "file removed from every stage");
        Ok(())
    }
}
