//! Verification-gated task execution engine.
//!
//! Takes a backlog of development tasks, orders it by dependency and drives
//! each task through a bounded loop: ask a generation service for work, let it
//! act on a sandboxed workspace through a fixed tool catalog, then ask a
//! verification gate whether the task's acceptance criteria hold. The crate
//! keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (ordering, sampling schedule,
//!   path containment, marker edits, verdict parsing). No process or network I/O.
//! - **[`io`]**: Side-effecting operations (config, backlog files, child
//!   processes, generation and verification backends, run logs).
//!
//! [`tools`] exposes the workspace to the generation service, [`transcript`]
//! holds each task's conversation, and [`engine`] coordinates them.

pub mod backlog;
pub mod core;
pub mod engine;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tools;
pub mod transcript;
