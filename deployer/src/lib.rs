//! Hot deployment engine
//!
//! Discovers deployable units in directories, archives and repository tags,
//! expands them and drives each one through a start/stop/redeploy lifecycle
//! inside a long-running host process.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod expand;
pub mod filesys;
pub mod logs;
pub mod repository;
pub mod server;
pub mod storage;
pub mod utils;
pub mod workers;
