//! Deadline helpers for bounded waits.

use std::time::{Duration, Instant};

/// Remaining time until `deadline`, or `None` when no deadline is set.
///
/// Returns `Some(Duration::ZERO)` once the deadline has passed.
pub fn remaining(deadline: Option<Instant>) -> Option<Duration> {
    deadline.map(|deadline| {
        deadline
            .checked_duration_since(Instant::now())
            .unwrap_or(Duration::ZERO)
    })
}

/// Length of the next wait slice: `poll`, capped by whatever remains of `deadline`.
pub fn next_slice(deadline: Option<Instant>, poll: Duration) -> Duration {
    match remaining(deadline) {
        Some(left) => left.min(poll),
        None => poll,
    }
}
