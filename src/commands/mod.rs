pub mod common;
pub mod project;
pub mod stage;
pub mod status;
pub mod transfer;
