//! Semantic invariants not expressible via JSON Schema.

use std::collections::HashSet;

use crate::task_list::TaskList;

/// Check semantic invariants not expressible in JSON Schema:
/// - No duplicate task ids
pub fn validate_invariants(list: &TaskList) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    for (index, task) in list.tasks.iter().enumerate() {
        if !seen.insert(task.id.as_str()) {
            errors.push(format!("duplicate id '{}' at tasks[{}]", task.id, index));
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{task, task_list};

    #[test]
    fn unique_ids_pass() {
        let list = task_list(vec![task("A", 1, false), task("B", 1, true)]);
        assert!(validate_invariants(&list).is_empty());
    }

    #[test]
    fn duplicate_ids_are_reported_with_position() {
        let list = task_list(vec![
            task("A", 1, false),
            task("B", 2, false),
            task("A", 3, false),
        ]);
        let errors = validate_invariants(&list);
        assert_eq!(errors, vec!["duplicate id 'A' at tasks[2]".to_string()]);
    }
}
