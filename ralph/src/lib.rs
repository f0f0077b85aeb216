//! Autonomous agent loop controller.
//!
//! `ralph` repeatedly launches an external coding agent against a project until
//! every task in `ralph/prd.json` passes, the agent declares completion, or an
//! iteration budget runs out. The agent owns the task list and the progress
//! log; the controller only reads them to decide whether to go again.
//!
//! - **[`core`]**: Pure logic (task selection, output classification, invariants).
//! - **[`io`]**: Side effects (task-list storage, agent processes, config, signals).
//!
//! [`controller`] runs the loop and [`status`] renders a read-only summary.

pub mod controller;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod status;
pub mod task_list;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
