//! Integration tests for pipeledger
//!
//! These tests drive the public API the way a job executor and an API layer
//! would: projects on a temporary data root, stage runs through the runner,
//! selection changes, and concurrent access from several threads.

pub mod concurrency;
pub mod helpers;
pub mod selection_rerun;
pub mod skip_stage;
pub mod store_properties;
