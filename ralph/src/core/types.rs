//! Shared types passed between the executor, classifier and controller.
//!
//! These types define stable contracts between core components. They should not
//! depend on external state or I/O and must remain deterministic across runs.

/// Verdict extracted from one iteration's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// The agent declared every task done.
    Completed,
    /// The agent declared it cannot proceed on `task_id`.
    StuckReported { task_id: String, reason: String },
    /// No protocol marker found.
    None,
}

/// Result of one agent invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Child exit code. `None` when the child was terminated by a signal.
    pub exit_code: Option<i32>,
    /// Combined stdout/stderr, in arrival order.
    pub output: String,
    /// The per-iteration timeout fired and the child was killed.
    pub timed_out: bool,
    /// Cancellation was requested and the child was killed.
    pub interrupted: bool,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}
