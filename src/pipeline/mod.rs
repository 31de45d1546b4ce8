pub mod invalidation;
pub mod runner;
pub mod session;
pub mod state;

pub use invalidation::InvalidationEngine;
pub use runner::{run_all, run_stage, StageBody, StageInput, StageOutput};
pub use session::{PipelineSession, SessionHandle};
pub use state::PipelineState;
