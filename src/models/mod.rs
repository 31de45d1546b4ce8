pub mod coordinate;
pub mod log;
pub mod order;
pub mod project;
pub mod stage;

pub use coordinate::{Coordinate, ProjectId};
pub use log::{ErrorInfo, Location, LogEntry, RunInfoRecord};
pub use order::{ModuleOrder, OrderEntry};
pub use project::{ColumnTracker, FileRole, ProjectMetadata, METADATA_FILE};
pub use stage::{ProjectKind, StageId};
