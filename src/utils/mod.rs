//! Utility modules shared by the pipeline steps and the dev server.

pub mod exec;
pub mod fs;
pub mod log;
