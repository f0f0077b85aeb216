//! Completion/stuck protocol detection over captured agent output.
//!
//! The agent signals through literal tags anywhere in its output:
//!
//! - `<complete>ALL_STORIES_PASSED</complete>`: all work is done.
//! - `<stuck>TASK_ID: reason</stuck>`: the agent cannot make progress on a task.
//!
//! Matching is substring-based and case-sensitive. Completion wins over stuck.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::Signal;

pub const COMPLETION_MARKER: &str = "<complete>ALL_STORIES_PASSED</complete>";

static STUCK_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<stuck>\s*([^:<]+?)\s*:(.*?)</stuck>").expect("stuck marker regex is valid")
});

/// Classify an iteration's captured output.
pub fn classify(output: &str) -> Signal {
    if output.contains(COMPLETION_MARKER) {
        return Signal::Completed;
    }
    if let Some(caps) = STUCK_MARKER.captures(output) {
        return Signal::StuckReported {
            task_id: caps[1].to_string(),
            reason: caps[2].trim().to_string(),
        };
    }
    Signal::None
}
