//! Stable exit codes for `ralph` commands.

/// Command succeeded, or `ralph run` finished with every task passing.
pub const OK: i32 = 0;
/// A prerequisite is missing, or the command failed for another reason.
pub const FAILED: i32 = 1;
/// `ralph run` used its whole iteration budget without completing.
pub const MAX_ITERATIONS: i32 = 2;
/// The task list is malformed or violates its schema.
pub const DOCUMENT_INVALID: i32 = 3;
/// `ralph run` halted because a task kept being reported stuck.
pub const STUCK: i32 = 4;
/// Interrupted by SIGINT/SIGTERM.
pub const INTERRUPTED: i32 = 130;
