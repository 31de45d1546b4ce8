//! Glue between a job executor and the stage log.
//!
//! A stage body only sees its input bytes and parameters; everything it
//! touches in the store (input resolution, begin/end, artifact and run-info
//! writes) happens here so that a failure anywhere leaves the entry ended
//! with an error instead of completed.

use chrono::Utc;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::fs::documents::{log_file_name, Document};
use crate::models::{Coordinate, ErrorInfo, Location, LogEntry, RunInfoRecord, StageId};
use crate::pipeline::state::PipelineState;

/// Parameters of a stage, shared by every file it processes.
pub const PARAMS_FILE: &str = "config.json";

/// What a stage body gets to work with.
#[derive(Debug, Clone)]
pub struct StageInput {
    pub file: String,
    /// Where the input was read from; `None` when no upstream stage completed.
    pub location: Option<Location>,
    pub data: Option<Vec<u8>>,
}

/// What a stage body hands back.
#[derive(Debug, Clone, Default)]
pub struct StageOutput {
    /// New version of the data, stored at `(stage, file)`.
    pub artifact: Option<Vec<u8>>,
    /// Free-form run log, stored at `(stage, "<file>__log.json")`.
    pub log: Option<serde_json::Value>,
    pub stats: serde_json::Value,
    /// Columns the stage added to the data, recorded in the column tracker.
    pub created_columns: Vec<String>,
}

pub trait StageBody {
    fn stage(&self) -> StageId;

    fn run(
        &self,
        input: &StageInput,
        params: &Document,
    ) -> std::result::Result<StageOutput, ErrorInfo>;
}

/// Entries begun but not yet ended by one invocation.
#[derive(Debug, Clone, Default)]
pub struct ActiveRuns(Arc<Mutex<Vec<LogEntry>>>);

impl ActiveRuns {
    pub(crate) fn insert(&self, entry: LogEntry) {
        self.lock().push(entry);
    }

    pub(crate) fn remove(&self, stage: StageId, file: &str) {
        self.lock().retain(|e| !(e.stage == stage && e.file == file));
    }

    /// Drain every tracked entry.
    pub fn take(&self) -> Vec<LogEntry> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<LogEntry>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Run one stage for one file.
///
/// Returns the ended entry. A body failure is recorded in the entry and is
/// not an `Err`; `Err` means the store itself could not be used.
pub fn run_stage(state: &PipelineState, body: &dyn StageBody, file: &str) -> Result<LogEntry> {
    run_tracked(state, body, file, &ActiveRuns::default())
}

/// Run every full-run stage for `file` in rank order.
///
/// Skipped stages are passed over. Stops after the first stage that fails,
/// since later stages would read stale input.
pub fn run_all(
    state: &PipelineState,
    file: &str,
    bodies: &[&dyn StageBody],
) -> Result<Vec<LogEntry>> {
    run_all_tracked(state, file, bodies, &ActiveRuns::default())
}

pub(crate) fn run_all_tracked(
    state: &PipelineState,
    file: &str,
    bodies: &[&dyn StageBody],
    active: &ActiveRuns,
) -> Result<Vec<LogEntry>> {
    let order = *state.order();
    let planned: Vec<StageId> = order.full_run_stages().collect();

    // Resolve every body up front so a missing one fails before anything runs.
    let mut plan = Vec::with_capacity(planned.len());
    for stage in planned {
        let body = bodies
            .iter()
            .find(|b| b.stage() == stage)
            .ok_or_else(|| StoreError::not_found(format!("stage body for {stage}")))?;
        plan.push(*body);
    }

    let mut ended = Vec::new();
    for body in plan {
        let stage = body.stage();
        if state.entry(stage, file)?.is_some_and(|e| e.skipped) {
            info!(stage = %stage, file, "stage skipped");
            continue;
        }
        let entry = run_tracked(state, body, file, active)?;
        let failed = entry.failed();
        ended.push(entry);
        if failed {
            break;
        }
    }
    Ok(ended)
}

pub(crate) fn run_tracked(
    state: &PipelineState,
    body: &dyn StageBody,
    file: &str,
    active: &ActiveRuns,
) -> Result<LogEntry> {
    let stage = body.stage();
    let input = resolve_input(state, stage, file)?;
    let params: Document = state
        .documents()
        .read(&Coordinate::stage(stage, PARAMS_FILE)?)?;

    let entry = state.begin_stage(stage, file)?;
    active.insert(entry.clone());

    let (written, error) = match body.run(&input, &params) {
        Ok(output) => match persist(state, &entry, &params, output) {
            Ok(written) => (written, None),
            Err(e) => (false, Some(ErrorInfo::from(&e))),
        },
        Err(info) => (false, Some(info)),
    };

    let ended = state.end_stage(entry.with_written(written), error);
    active.remove(stage, file);
    ended
}

fn resolve_input(state: &PipelineState, stage: StageId, file: &str) -> Result<StageInput> {
    let location = match state.last_written(None, Some(file), Some(stage)) {
        Ok(location) => Some(location),
        Err(StoreError::NotFound(_)) => None,
        Err(e) => return Err(e),
    };
    let data = match &location {
        Some(loc) => {
            debug!(stage = %stage, from = %loc.stage, file, "reading stage input");
            state
                .documents()
                .read_bytes(&Coordinate::stage(loc.stage, loc.file.clone())?)?
        }
        None => None,
    };
    Ok(StageInput {
        file: file.to_string(),
        location,
        data,
    })
}

/// Store everything the body produced. Returns whether a new artifact was
/// written.
fn persist(
    state: &PipelineState,
    entry: &LogEntry,
    params: &Document,
    output: StageOutput,
) -> Result<bool> {
    let documents = state.documents();
    let written = match &output.artifact {
        Some(artifact) => {
            documents
                .write_bytes(&Coordinate::stage(entry.stage, entry.file.clone())?, artifact)?;
            true
        }
        None => false,
    };
    if let Some(log) = &output.log {
        let coord = Coordinate::stage(entry.stage, log_file_name(&entry.file))?;
        documents.write(&coord, log)?;
    }
    if !output.created_columns.is_empty() {
        state.record_created_columns(&output.created_columns)?;
    }

    let record = RunInfoRecord {
        ended_at: Some(Utc::now()),
        ..RunInfoRecord::from_entry(
            entry,
            serde_json::Value::Object(params.clone()),
            output.stats,
        )
    };
    state.write_run_info(&record)?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::documents::DocumentStore;
    use crate::fs::locking::{LockMode, LockedResource, RetryPolicy};
    use crate::models::{ColumnTracker, ModuleOrder, ProjectId, ProjectKind, ProjectMetadata};
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Appends a marker line to its input.
    struct Append(StageId);

    impl StageBody for Append {
        fn stage(&self) -> StageId {
            self.0
        }

        fn run(
            &self,
            input: &StageInput,
            params: &Document,
        ) -> std::result::Result<StageOutput, ErrorInfo> {
            let mut data = input.data.clone().unwrap_or_default();
            data.extend_from_slice(format!("{}\n", self.0).as_bytes());
            Ok(StageOutput {
                artifact: Some(data),
                log: None,
                stats: json!({"params": params.len()}),
                created_columns: Vec::new(),
            })
        }
    }

    /// Records stats only.
    struct Inspect(StageId);

    impl StageBody for Inspect {
        fn stage(&self) -> StageId {
            self.0
        }

        fn run(
            &self,
            input: &StageInput,
            _: &Document,
        ) -> std::result::Result<StageOutput, ErrorInfo> {
            Ok(StageOutput {
                artifact: None,
                log: None,
                stats: json!({"bytes": input.data.as_ref().map_or(0, Vec::len)}),
                created_columns: Vec::new(),
            })
        }
    }

    /// Adds a derived column next to its input.
    struct Derive(StageId, &'static str);

    impl StageBody for Derive {
        fn stage(&self) -> StageId {
            self.0
        }

        fn run(
            &self,
            input: &StageInput,
            _: &Document,
        ) -> std::result::Result<StageOutput, ErrorInfo> {
            Ok(StageOutput {
                artifact: input.data.clone(),
                log: Some(json!({"derived": self.1})),
                stats: serde_json::Value::Null,
                created_columns: vec![self.1.to_string()],
            })
        }
    }

    struct Fail(StageId);

    impl StageBody for Fail {
        fn stage(&self) -> StageId {
            self.0
        }

        fn run(&self, _: &StageInput, _: &Document) -> std::result::Result<StageOutput, ErrorInfo> {
            Err(ErrorInfo::new("stage_failed", "cannot recode"))
        }
    }

    fn state(temp: &TempDir) -> PipelineState {
        let documents = DocumentStore::new(
            temp.path(),
            RetryPolicy::new(3, Duration::from_millis(5)),
        );
        let meta = ProjectMetadata::new(
            ProjectId::generate(),
            ProjectKind::Normalize,
            None,
            None,
            false,
        );
        documents
            .write(&PipelineState::metadata_coord(), &meta)
            .unwrap();
        PipelineState::new(documents, ModuleOrder::for_kind(ProjectKind::Normalize))
    }

    fn upload(state: &PipelineState, file: &str) {
        let entry = state
            .begin_stage(StageId::Init, file)
            .unwrap()
            .with_written(true);
        state
            .documents()
            .write_bytes(&Coordinate::stage(StageId::Init, file).unwrap(), b"INIT\n")
            .unwrap();
        state.end_stage(entry, None).unwrap();
    }

    fn artifact(state: &PipelineState, stage: StageId, file: &str) -> String {
        let bytes = state
            .documents()
            .read_bytes(&Coordinate::stage(stage, file).unwrap())
            .unwrap()
            .unwrap();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_run_stage_reads_upstream_and_records_run_info() {
        let temp = TempDir::new().unwrap();
        let state = state(&temp);
        upload(&state, "source.csv");
        state
            .documents()
            .write(
                &Coordinate::stage(StageId::ReplaceMvs, PARAMS_FILE).unwrap(),
                &json!({"thresh": 0.6}),
            )
            .unwrap();

        let entry = run_stage(&state, &Append(StageId::ReplaceMvs), "source.csv").unwrap();
        assert!(entry.completed);
        assert_eq!(artifact(&state, StageId::ReplaceMvs, "source.csv"), "INIT\nreplace_mvs\n");

        let info = state
            .read_run_info(StageId::ReplaceMvs, "source.csv")
            .unwrap()
            .unwrap();
        assert_eq!(info.params, json!({"thresh": 0.6}));
        assert_eq!(info.stats, json!({"params": 1}));
        assert_eq!(info.started_at, entry.started_at);
    }

    #[test]
    fn test_stage_without_artifact_leaves_data_upstream() {
        let temp = TempDir::new().unwrap();
        let state = state(&temp);
        upload(&state, "source.csv");

        let entry = run_stage(&state, &Inspect(StageId::ReplaceMvs), "source.csv").unwrap();
        assert!(entry.completed);
        assert!(!entry.written);
        let loc = state.last_written(None, Some("source.csv"), None).unwrap();
        assert_eq!(loc.stage, StageId::Init);

        run_stage(&state, &Append(StageId::RecodeTypes), "source.csv").unwrap();
        assert_eq!(artifact(&state, StageId::RecodeTypes, "source.csv"), "INIT\nrecode_types\n");
    }

    #[test]
    fn test_created_columns_reach_the_tracker() {
        let temp = TempDir::new().unwrap();
        let state = state(&temp);
        upload(&state, "source.csv");
        state
            .mutate(|meta| {
                meta.normalize_mut()?.column_tracker =
                    Some(ColumnTracker::from_header(vec!["a".into(), "b".into()]));
                Ok(())
            })
            .unwrap();

        let entry = run_stage(&state, &Derive(StageId::RecodeTypes, "a__NORMALIZED"), "source.csv")
            .unwrap();
        assert!(entry.written);
        let tracker = state.metadata().unwrap().normalize().unwrap().column_tracker.clone();
        assert_eq!(tracker.unwrap().created, vec!["a__NORMALIZED".to_string()]);
        assert!(state
            .documents()
            .exists(&Coordinate::stage(StageId::RecodeTypes, "source.csv__log.json").unwrap()));

        // A created column may not shadow an uploaded one.
        let entry = run_stage(&state, &Derive(StageId::ConcatWithInit, "b"), "source.csv").unwrap();
        assert!(!entry.completed);
        assert!(!entry.written);
        assert_eq!(entry.error.unwrap().kind, "invalid_selection");
    }

    #[test]
    fn test_failed_body_is_recorded_not_raised() {
        let temp = TempDir::new().unwrap();
        let state = state(&temp);
        upload(&state, "source.csv");

        let entry = run_stage(&state, &Fail(StageId::RecodeTypes), "source.csv").unwrap();
        assert!(!entry.completed);
        assert_eq!(entry.error.unwrap().kind, "stage_failed");
        assert!(state
            .read_run_info(StageId::RecodeTypes, "source.csv")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_failed_artifact_write_ends_entry_with_error() {
        let temp = TempDir::new().unwrap();
        let state = state(&temp);
        upload(&state, "source.csv");
        let target = Coordinate::stage(StageId::ReplaceMvs, "source.csv").unwrap();
        state.documents().write_bytes(&target, b"old").unwrap();

        let _holder = LockedResource::acquire(
            &state.documents().path_of(&target),
            LockMode::Exclusive,
            state.documents().policy(),
        )
        .unwrap();
        let entry = run_stage(&state, &Append(StageId::ReplaceMvs), "source.csv").unwrap();

        assert!(!entry.completed);
        assert_eq!(entry.error.unwrap().kind, "lock_timeout");
    }

    #[test]
    fn test_run_all_chains_stages_and_honours_skip() {
        let temp = TempDir::new().unwrap();
        let state = state(&temp);
        upload(&state, "source.csv");
        state
            .set_skip(StageId::RecodeTypes, "source.csv", true)
            .unwrap();

        let bodies: [&dyn StageBody; 3] = [
            &Append(StageId::ReplaceMvs),
            &Append(StageId::RecodeTypes),
            &Append(StageId::ConcatWithInit),
        ];
        let ended = run_all(&state, "source.csv", &bodies).unwrap();

        let stages: Vec<StageId> = ended.iter().map(|e| e.stage).collect();
        assert_eq!(stages, vec![StageId::ReplaceMvs, StageId::ConcatWithInit]);
        assert_eq!(
            artifact(&state, StageId::ConcatWithInit, "source.csv"),
            "INIT\nreplace_mvs\nconcat_with_init\n"
        );
    }

    #[test]
    fn test_run_all_stops_after_failure() {
        let temp = TempDir::new().unwrap();
        let state = state(&temp);
        upload(&state, "source.csv");

        let bodies: [&dyn StageBody; 3] = [
            &Append(StageId::ReplaceMvs),
            &Fail(StageId::RecodeTypes),
            &Append(StageId::ConcatWithInit),
        ];
        let ended = run_all(&state, "source.csv", &bodies).unwrap();
        assert_eq!(ended.len(), 2);
        assert!(state
            .entry(StageId::ConcatWithInit, "source.csv")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_run_all_requires_every_body() {
        let temp = TempDir::new().unwrap();
        let state = state(&temp);
        upload(&state, "source.csv");

        let bodies: [&dyn StageBody; 1] = [&Append(StageId::ReplaceMvs)];
        let err = run_all(&state, "source.csv", &bodies).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(state
            .entry(StageId::ReplaceMvs, "source.csv")
            .unwrap()
            .is_none());
    }
}
