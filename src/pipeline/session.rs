use tracing::warn;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{ErrorInfo, LogEntry, StageId};
use crate::pipeline::runner::{self, ActiveRuns, StageBody};
use crate::pipeline::state::PipelineState;

/// Error kind recorded on entries closed by a session teardown.
pub const TERMINATED_KIND: &str = "terminated";

/// One job-executor invocation against a project.
///
/// Tracks the entries it began so that a termination (or an early return
/// that drops the session) ends them as failed rather than leaving them
/// dangling. Call [`PipelineSession::finish`] on normal completion.
#[derive(Debug)]
pub struct PipelineSession {
    id: String,
    state: PipelineState,
    active: ActiveRuns,
    closed: bool,
}

/// Cloneable handle for terminating a session from another thread, such as
/// a signal handler.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: String,
    state: PipelineState,
    active: ActiveRuns,
}

impl PipelineSession {
    pub fn new(state: PipelineState) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            state,
            active: ActiveRuns::default(),
            closed: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            id: self.id.clone(),
            state: self.state.clone(),
            active: self.active.clone(),
        }
    }

    /// Begin a stage whose body the caller runs itself.
    pub fn begin(&self, stage: StageId, file: &str) -> Result<LogEntry> {
        let entry = self.state.begin_stage(stage, file)?;
        self.active.insert(entry.clone());
        Ok(entry)
    }

    pub fn end(&self, entry: LogEntry, error: Option<ErrorInfo>) -> Result<LogEntry> {
        let (stage, file) = (entry.stage, entry.file.clone());
        let ended = self.state.end_stage(entry, error)?;
        self.active.remove(stage, &file);
        Ok(ended)
    }

    pub fn run_stage(&self, body: &dyn StageBody, file: &str) -> Result<LogEntry> {
        runner::run_tracked(&self.state, body, file, &self.active)
    }

    pub fn run_all(&self, file: &str, bodies: &[&dyn StageBody]) -> Result<Vec<LogEntry>> {
        runner::run_all_tracked(&self.state, file, bodies, &self.active)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Close the session after normal completion. Entries still open at this
    /// point were never ended by the caller and are closed as terminated.
    pub fn finish(mut self) -> Result<()> {
        self.closed = true;
        if !self.active.is_empty() {
            warn!(session = %self.id, open = self.active.len(), "finishing with open stages");
        }
        terminate_active(
            &self.state,
            &self.active,
            &self.id,
            "session finished with the stage still open",
        )?;
        Ok(())
    }

    /// Close the session because the invocation is being torn down.
    pub fn terminate(mut self, reason: &str) -> Result<Vec<LogEntry>> {
        self.closed = true;
        terminate_active(&self.state, &self.active, &self.id, reason)
    }
}

impl Drop for PipelineSession {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = terminate_active(&self.state, &self.active, &self.id, "session dropped") {
            warn!(session = %self.id, error = %e, "failed to close stages of dropped session");
        }
    }
}

impl SessionHandle {
    pub fn terminate(&self, reason: &str) -> Result<Vec<LogEntry>> {
        terminate_active(&self.state, &self.active, &self.id, reason)
    }
}

fn terminate_active(
    state: &PipelineState,
    active: &ActiveRuns,
    session: &str,
    reason: &str,
) -> Result<Vec<LogEntry>> {
    let mut closed = Vec::new();
    let mut first_error = None;
    for entry in active.take() {
        warn!(session, stage = %entry.stage, file = %entry.file, reason, "terminating stage");
        match state.end_stage(entry.clone(), Some(ErrorInfo::new(TERMINATED_KIND, reason))) {
            Ok(ended) => closed.push(ended),
            Err(e) => {
                // Still open: keep tracking it so a later terminate can retry.
                warn!(
                    session,
                    stage = %entry.stage,
                    file = %entry.file,
                    error = %e,
                    "could not close stage"
                );
                active.insert(entry);
                first_error.get_or_insert(e);
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(closed),
    }
}
