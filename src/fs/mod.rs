pub mod data_dir;
pub mod documents;
pub mod locking;

pub use data_dir::DataDir;
pub use documents::{Document, DocumentStore, FullConfig};
pub use locking::{LockMode, LockedResource, RetryPolicy};
