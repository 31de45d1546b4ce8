//! Per-(stage, file) execution log and run info.
//!
//! The log lives inside the project metadata document, the most contended
//! resource of a project. Every mutation here is one locked read-modify-write
//! of that document, so a stage's completion becomes visible to other
//! processes exactly when the write's lock is released.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::{Result, StoreError};
use crate::fs::documents::{run_info_file_name, DocumentStore};
use crate::models::project::ProjectLog;
use crate::models::{
    Coordinate, ErrorInfo, Location, LogEntry, ModuleOrder, ProjectMetadata, RunInfoRecord,
    StageId, METADATA_FILE,
};
use crate::validation::validate_file_name;

/// Error kind recorded on entries closed by [`PipelineState::fail_dangling`].
pub const ABANDONED_KIND: &str = "abandoned";

#[derive(Debug, Clone)]
pub struct PipelineState {
    documents: DocumentStore,
    order: ModuleOrder,
}

impl PipelineState {
    pub fn new(documents: DocumentStore, order: ModuleOrder) -> Self {
        Self { documents, order }
    }

    pub fn order(&self) -> &ModuleOrder {
        &self.order
    }

    pub fn documents(&self) -> &DocumentStore {
        &self.documents
    }

    pub(crate) fn metadata_coord() -> Coordinate {
        Coordinate {
            stage: None,
            file: METADATA_FILE.to_string(),
        }
    }

    /// Current metadata document.
    pub fn metadata(&self) -> Result<ProjectMetadata> {
        self.documents
            .read_existing(&Self::metadata_coord())?
            .ok_or_else(|| {
                StoreError::not_found(format!(
                    "metadata for project at {}",
                    self.documents.root().display()
                ))
            })
    }

    /// Locked read-modify-write of the metadata document. Bumps the
    /// last-activity timestamp on success.
    pub fn mutate<R, F>(&self, mutate: F) -> Result<R>
    where
        F: FnOnce(&mut ProjectMetadata) -> Result<R>,
    {
        self.documents
            .update_existing(&Self::metadata_coord(), |meta: &mut ProjectMetadata| {
                let value = mutate(meta)?;
                meta.touch();
                Ok(value)
            })
    }

    /// Start a run: the entry for `(stage, file)` is replaced by a fresh
    /// active one.
    pub fn begin_stage(&self, stage: StageId, file: &str) -> Result<LogEntry> {
        self.check_stage(stage)?;
        validate_file_name(file)?;

        let entry = LogEntry::begin(stage, file);
        self.mutate(|meta| {
            let stages = meta.log.entry(file.to_string()).or_default();
            if let Some(previous) = stages.get(&stage) {
                if previous.is_active() {
                    warn!(
                        stage = %stage,
                        file,
                        started_at = ?previous.started_at,
                        "replacing an entry that was started but never ended"
                    );
                }
            }
            stages.insert(stage, entry.clone());
            Ok(())
        })?;

        info!(stage = %stage, file, "stage started");
        Ok(entry)
    }

    /// Close a run. The entry counts as completed exactly when `error` is
    /// `None`; it stays a data location only if it was marked written.
    pub fn end_stage(&self, entry: LogEntry, error: Option<ErrorInfo>) -> Result<LogEntry> {
        let ended = entry.end(error);
        self.mutate(|meta| {
            meta.log
                .entry(ended.file.clone())
                .or_default()
                .insert(ended.stage, ended.clone());
            Ok(())
        })?;

        match &ended.error {
            None => info!(stage = %ended.stage, file = %ended.file, "stage completed"),
            Some(err) => {
                warn!(stage = %ended.stage, file = %ended.file, error = %err, "stage failed")
            }
        }
        Ok(ended)
    }

    /// Mark a stage as (not) applicable to a file. Skipping also withdraws
    /// any completion, so `last_written` stops resolving to it.
    pub fn set_skip(&self, stage: StageId, file: &str, value: bool) -> Result<LogEntry> {
        self.check_stage(stage)?;
        validate_file_name(file)?;

        let entry = self.mutate(|meta| {
            let entry = meta
                .log
                .entry(file.to_string())
                .or_default()
                .entry(stage)
                .or_insert_with(|| LogEntry::pending(stage, file));
            entry.skipped = value;
            if value {
                entry.completed = false;
            }
            Ok(entry.clone())
        })?;

        info!(stage = %stage, file, skipped = value, "skip flag set");
        Ok(entry)
    }

    /// Put `(stage, file)` back to the default, never-run state.
    pub fn reset(&self, stage: StageId, file: &str) -> Result<()> {
        self.mutate(|meta| {
            meta.log
                .entry(file.to_string())
                .or_default()
                .insert(stage, LogEntry::pending(stage, file));
            Ok(())
        })
    }

    /// Default log (every stage of the variant pending) for a new file.
    pub fn default_log(&self, file: &str) -> std::collections::BTreeMap<StageId, LogEntry> {
        self.order
            .stages()
            .map(|stage| (stage, LogEntry::pending(stage, file)))
            .collect()
    }

    pub fn entry(&self, stage: StageId, file: &str) -> Result<Option<LogEntry>> {
        Ok(self.metadata()?.entry(stage, file).cloned())
    }

    /// Entries of one file, in stage rank order.
    pub fn entries(&self, file: &str) -> Result<Vec<LogEntry>> {
        let meta = self.metadata()?;
        let Some(stages) = meta.log.get(file) else {
            return Ok(Vec::new());
        };
        let mut entries: Vec<LogEntry> = stages.values().cloned().collect();
        entries.sort_by_key(|e| self.order.rank(e.stage).unwrap_or(usize::MAX));
        Ok(entries)
    }

    pub fn log_by_file(&self) -> Result<ProjectLog> {
        Ok(self.metadata()?.log)
    }

    /// Resolve the current data location.
    ///
    /// Candidates are completed, non-skipped entries whose run stored a new
    /// version of the data, restricted to data-writing stages and to the
    /// stage and file filters. With `before_stage`, only stages ranked
    /// strictly below it qualify (a `before_stage` outside this pipeline variant places no
    /// restriction). The highest-ranked candidate wins; ties go to the most
    /// recently ended one.
    pub fn last_written(
        &self,
        stage_filter: Option<StageId>,
        file_filter: Option<&str>,
        before_stage: Option<StageId>,
    ) -> Result<Location> {
        let meta = self.metadata()?;
        let ceiling = before_stage.and_then(|stage| self.order.rank(stage));

        let best = meta
            .log
            .iter()
            .filter(|(file, _)| file_filter.is_none_or(|wanted| wanted == file.as_str()))
            .flat_map(|(_, stages)| stages.values())
            .filter(|entry| entry.holds_data() && self.order.writes_data(entry.stage))
            .filter(|entry| stage_filter.is_none_or(|wanted| wanted == entry.stage))
            .filter_map(|entry| self.order.rank(entry.stage).map(|rank| (rank, entry)))
            .filter(|(rank, _)| ceiling.is_none_or(|max| *rank < max))
            .max_by(|(rank_a, a), (rank_b, b)| {
                rank_a
                    .cmp(rank_b)
                    .then_with(|| a.ended_at.cmp(&b.ended_at))
                    .then_with(|| b.file.cmp(&a.file))
            });

        match best {
            Some((_, entry)) => Ok(Location {
                stage: entry.stage,
                file: entry.file.clone(),
                ended_at: entry.ended_at,
            }),
            None => Err(StoreError::not_found(describe_query(
                stage_filter,
                file_filter,
                before_stage,
            ))),
        }
    }

    /// Every completed `(stage, file)` pair.
    pub fn completed(&self) -> Result<Vec<(StageId, String)>> {
        let meta = self.metadata()?;
        Ok(meta
            .log
            .iter()
            .flat_map(|(file, stages)| {
                stages
                    .values()
                    .filter(|e| e.completed)
                    .map(move |e| (e.stage, file.clone()))
            })
            .collect())
    }

    /// Entries that were started and never ended.
    pub fn dangling(&self) -> Result<Vec<LogEntry>> {
        let meta = self.metadata()?;
        Ok(meta
            .log
            .values()
            .flat_map(|stages| stages.values())
            .filter(|e| e.is_active())
            .cloned()
            .collect())
    }

    /// Fail with [`StoreError::DanglingActiveEntry`] if `(stage, file)` is
    /// active. Callers that know no other worker runs the stage use this to
    /// surface a dead run instead of silently replacing it.
    pub fn check_settled(&self, stage: StageId, file: &str) -> Result<()> {
        match self.entry(stage, file)? {
            Some(entry) if entry.is_active() => Err(StoreError::DanglingActiveEntry {
                stage: stage.to_string(),
                file: file.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Operator action: close every dangling entry as failed so the stage
    /// can be re-run. Returns the closed entries.
    pub fn fail_dangling(&self) -> Result<Vec<LogEntry>> {
        let closed = self.mutate(|meta| {
            let mut closed = Vec::new();
            for stages in meta.log.values_mut() {
                for entry in stages.values_mut().filter(|e| e.is_active()) {
                    let failed = entry.clone().end(Some(ErrorInfo::new(
                        ABANDONED_KIND,
                        "run was started but never ended; closed by operator",
                    )));
                    *entry = failed.clone();
                    closed.push(failed);
                }
            }
            Ok(closed)
        })?;

        for entry in &closed {
            warn!(stage = %entry.stage, file = %entry.file, "dangling entry closed as failed");
        }
        Ok(closed)
    }

    /// Add columns introduced by a stage to the column tracker of a
    /// normalize project.
    pub fn record_created_columns(&self, columns: &[String]) -> Result<()> {
        self.mutate(|meta| {
            let tracker = meta
                .normalize_mut()?
                .column_tracker
                .as_mut()
                .ok_or_else(|| StoreError::InvalidSelection("no file uploaded yet".into()))?;
            for column in columns {
                tracker.add_created(column.as_str())?;
            }
            Ok(())
        })
    }

    pub fn write_run_info(&self, record: &RunInfoRecord) -> Result<()> {
        let coord = Coordinate::stage(record.stage, run_info_file_name(&record.file))?;
        self.documents.write(&coord, record)
    }

    pub fn read_run_info(&self, stage: StageId, file: &str) -> Result<Option<RunInfoRecord>> {
        let coord = Coordinate::stage(stage, run_info_file_name(file))?;
        self.documents.read_existing(&coord)
    }

    /// Time of the most recent activity: creation or the latest stage end.
    pub fn last_action_at(&self) -> Result<DateTime<Utc>> {
        let meta = self.metadata()?;
        let latest_end = meta
            .log
            .values()
            .flat_map(|stages| stages.values())
            .filter_map(|e| e.ended_at)
            .max();
        Ok(latest_end.map_or(meta.created_at, |end| end.max(meta.created_at)))
    }

    pub fn time_since_last_action(&self) -> Result<chrono::Duration> {
        Ok(Utc::now() - self.last_action_at()?)
    }

    fn check_stage(&self, stage: StageId) -> Result<()> {
        if self.order.contains(stage) {
            Ok(())
        } else {
            Err(StoreError::InvalidName(format!(
                "stage {stage} is not part of the {} pipeline",
                self.order.kind()
            )))
        }
    }
}

fn describe_query(
    stage: Option<StageId>,
    file: Option<&str>,
    before: Option<StageId>,
) -> String {
    let mut parts = vec!["completed entry".to_string()];
    if let Some(stage) = stage {
        parts.push(format!("stage={stage}"));
    }
    if let Some(file) = file {
        parts.push(format!("file={file}"));
    }
    if let Some(before) = before {
        parts.push(format!("before={before}"));
    }
    parts.join(" ")
}
