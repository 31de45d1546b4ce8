pub mod commands;
pub mod config;
pub mod error;
pub mod fs;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod project;
pub mod validation;

pub use error::{Result, StoreError};
