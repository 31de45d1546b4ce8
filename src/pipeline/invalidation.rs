//! Cascade invalidation after a column selection change.
//!
//! Stage bodies are opaque, so the store cannot tell which outputs depend on
//! which columns. Growing the selection therefore invalidates every completed
//! stage; shrinking it (or leaving it unchanged) invalidates nothing.

use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::fs::documents::file_document_names;
use crate::models::{Coordinate, LogEntry, ProjectMetadata, StageId};
use crate::pipeline::state::PipelineState;

#[derive(Debug, Clone)]
pub struct InvalidationEngine {
    state: PipelineState,
}

impl InvalidationEngine {
    pub fn new(state: PipelineState) -> Self {
        Self { state }
    }

    /// Coordinates made stale by moving from `old` to `new` selected columns.
    ///
    /// Empty exactly when every column of `new` was already in `old`.
    pub fn on_selection_change(
        &self,
        old: &[String],
        new: &[String],
    ) -> Result<BTreeSet<Coordinate>> {
        if new.iter().all(|column| old.contains(column)) {
            return Ok(BTreeSet::new());
        }

        self.state
            .completed()?
            .into_iter()
            .map(|(stage, file)| Coordinate::stage(stage, file))
            .collect()
    }

    /// Drop everything a stage produced for one file and reset its entry.
    pub fn invalidate(&self, coord: &Coordinate) -> Result<()> {
        let stage = self.remove_documents(coord)?;
        self.state.reset(stage, &coord.file)
    }

    /// Remove the `<file>` artifact of a stage and its run-info and log
    /// documents, leaving the log alone. Missing documents are fine.
    pub fn remove_documents(&self, coord: &Coordinate) -> Result<StageId> {
        let Some(stage) = coord.stage else {
            return Err(StoreError::InvalidName(format!(
                "cannot invalidate {coord}: the project root is not a stage"
            )));
        };

        let documents = self.state.documents();
        for name in file_document_names(&coord.file) {
            let doomed = Coordinate::stage(stage, name)?;
            match documents.remove(&doomed) {
                Ok(()) => debug!(coord = %doomed, "removed stale document"),
                // Never written, or raced with another remover.
                Err(StoreError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(stage)
    }

    /// Reset every completed entry of `meta` to pending, for use inside a
    /// locked metadata update. `INIT` survives unless `include_initial`.
    pub fn reset_completed(
        meta: &mut ProjectMetadata,
        include_initial: bool,
    ) -> Result<BTreeSet<Coordinate>> {
        let mut stale = BTreeSet::new();
        for (file, stages) in meta.log.iter_mut() {
            for (stage, entry) in stages.iter_mut() {
                if !entry.completed || (stage.is_initial() && !include_initial) {
                    continue;
                }
                *entry = LogEntry::pending(*stage, file.as_str());
                stale.insert(Coordinate::stage(*stage, file.clone())?);
            }
        }
        Ok(stale)
    }

    /// Compute and invalidate in one go. `INIT` survives unless
    /// `include_initial` is set, since it holds the uploaded data.
    pub fn apply(
        &self,
        old: &[String],
        new: &[String],
        include_initial: bool,
    ) -> Result<BTreeSet<Coordinate>> {
        let stale: BTreeSet<Coordinate> = self
            .on_selection_change(old, new)?
            .into_iter()
            .filter(|c| include_initial || !c.stage.is_some_and(|s| s.is_initial()))
            .collect();

        for coord in &stale {
            self.invalidate(coord)?;
        }

        if !stale.is_empty() {
            info!(count = stale.len(), "invalidated stages after selection change");
        }
        Ok(stale)
    }
}
