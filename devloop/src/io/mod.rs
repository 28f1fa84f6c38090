//! I/O helpers: configuration, files, child processes and external services.

pub mod backlog_store;
pub mod config;
pub mod generator;
pub mod process;
pub mod prompt;
pub mod run_log;
pub mod verifier;
pub mod workspace;
