//! Deterministic selection logic for the task list.

use crate::task_list::Task;

/// Pick the pending task (`passes=false`) with the lowest `priority`.
///
/// Ties resolve to the task that appears first in `tasks`. Returns `None` when
/// every task passes (the list is complete).
pub fn select_next(tasks: &[Task]) -> Option<&Task> {
    // `min_by_key` keeps the last minimum, so fold manually to keep the first.
    tasks
        .iter()
        .filter(|task| !task.passes)
        .fold(None, |best: Option<&Task>, task| match best {
            Some(current) if current.priority <= task.priority => Some(current),
            _ => Some(task),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::task;

    #[test]
    fn selects_lowest_priority() {
        let tasks = vec![task("A", 2, false), task("B", 1, false)];
        assert_eq!(select_next(&tasks).map(|t| t.id.as_str()), Some("B"));
    }

    #[test]
    fn ties_resolve_to_input_order() {
        let tasks = vec![task("A", 1, false), task("B", 1, false)];
        assert_eq!(select_next(&tasks).map(|t| t.id.as_str()), Some("A"));

        let reversed = vec![task("B", 1, false), task("A", 1, false)];
        assert_eq!(select_next(&reversed).map(|t| t.id.as_str()), Some("B"));
    }

    #[test]
    fn skips_passed_tasks() {
        let tasks = vec![
            task("A", 0, true),
            task("B", 5, false),
            task("C", 3, true),
            task("D", 5, false),
        ];
        assert_eq!(select_next(&tasks).map(|t| t.id.as_str()), Some("B"));
    }

    #[test]
    fn negative_priorities_win() {
        let tasks = vec![task("A", 0, false), task("B", -1, false)];
        assert_eq!(select_next(&tasks).map(|t| t.id.as_str()), Some("B"));
    }

    #[test]
    fn complete_when_all_pass() {
        let tasks = vec![task("A", 1, true), task("B", 2, true)];
        assert!(select_next(&tasks).is_none());
        assert!(select_next(&[]).is_none());
    }
}
