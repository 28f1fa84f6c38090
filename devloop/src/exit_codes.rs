//! Stable exit codes for devloop CLI commands.

/// Command succeeded; for `run`, every task passed.
pub const OK: i32 = 0;
/// Invalid input (config, backlog, workspace) or an infrastructure failure.
pub const INVALID: i32 = 1;
/// `devloop run` finished but at least one task was abandoned.
pub const ABANDONED: i32 = 3;
