//! Task-list loading with schema + invariant validation.
//!
//! Every `load` re-reads storage. The agent rewrites the document during each
//! iteration, so a cached copy would hide its progress from the selector.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use jsonschema::validator_for;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::core::invariants::validate_invariants;
use crate::task_list::TaskList;

const TASK_LIST_SCHEMA: &str = include_str!("../../schemas/task_list.schema.json");

/// Why the task list could not be loaded.
#[derive(Debug, Error)]
pub enum TaskStoreError {
    #[error("task list not found at {}", path.display())]
    NotFound { path: PathBuf },

    #[error("read task list {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("parse task list {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid task list {}:\n- {}", path.display(), messages.join("\n- "))]
    Invalid { path: PathBuf, messages: Vec<String> },
}

impl TaskStoreError {
    /// True for malformed or schema-violating content (as opposed to storage failures).
    pub fn is_document_error(&self) -> bool {
        matches!(self, Self::Parse { .. } | Self::Invalid { .. })
    }
}

/// Read-only access to the task list.
pub trait TaskStore {
    /// Return a fresh snapshot of the stored task list.
    fn load(&self) -> Result<TaskList, TaskStoreError>;
}

/// Task list stored as a JSON file.
#[derive(Debug, Clone)]
pub struct FileTaskStore {
    path: PathBuf,
}

impl FileTaskStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TaskStore for FileTaskStore {
    #[instrument(skip_all, fields(path = %self.path.display()))]
    fn load(&self) -> Result<TaskList, TaskStoreError> {
        let list = load_task_list(&self.path)?;
        debug!(
            tasks = list.tasks.len(),
            completed = list.completed_count(),
            "task list loaded"
        );
        Ok(list)
    }
}

/// Load and validate a task list from disk (schema + invariants).
pub fn load_task_list(path: &Path) -> Result<TaskList, TaskStoreError> {
    let contents = fs::read_to_string(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            TaskStoreError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            TaskStoreError::Read {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    parse_task_list(path, &contents)
}

/// Parse and validate task-list JSON. `path` is only used for diagnostics.
pub fn parse_task_list(path: &Path, contents: &str) -> Result<TaskList, TaskStoreError> {
    let parse_err = |source: serde_json::Error| TaskStoreError::Parse {
        path: path.to_path_buf(),
        source,
    };
    let value: Value = serde_json::from_str(contents).map_err(parse_err)?;
    validate_schema(path, &value)?;
    let list: TaskList = serde_json::from_value(value).map_err(parse_err)?;
    let errors = validate_invariants(&list);
    if !errors.is_empty() {
        return Err(TaskStoreError::Invalid {
            path: path.to_path_buf(),
            messages: errors,
        });
    }
    Ok(list)
}

fn validate_schema(path: &Path, value: &Value) -> Result<(), TaskStoreError> {
    let invalid = |messages: Vec<String>| TaskStoreError::Invalid {
        path: path.to_path_buf(),
        messages,
    };
    let schema: Value = serde_json::from_str(TASK_LIST_SCHEMA)
        .map_err(|err| invalid(vec![format!("embedded schema: {err}")]))?;
    let compiled =
        validator_for(&schema).map_err(|err| invalid(vec![format!("invalid schema: {err}")]))?;
    if compiled.is_valid(value) {
        return Ok(());
    }
    let messages = compiled
        .iter_errors(value)
        .map(|err| err.to_string())
        .collect::<Vec<_>>();
    Err(invalid(messages))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(contents: &str) -> (tempfile::TempDir, FileTaskStore) {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("prd.json");
        fs::write(&path, contents).expect("write prd");
        (temp, FileTaskStore::new(path))
    }

    #[test]
    fn loads_valid_document() {
        let (_temp, store) = store_with(
            r#"{"project": "demo", "tasks": [
                {"id": "A", "title": "a", "priority": 2, "passes": false},
                {"id": "B", "title": "b", "priority": 1, "passes": true, "attempts": 3}
            ]}"#,
        );
        let list = store.load().expect("load");
        assert_eq!(list.tasks.len(), 2);
        assert_eq!(list.completed_count(), 1);
    }

    #[test]
    fn missing_file_is_not_found() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FileTaskStore::new(temp.path().join("prd.json"));
        let err = store.load().unwrap_err();
        assert!(matches!(err, TaskStoreError::NotFound { .. }));
        assert!(!err.is_document_error());
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let (_temp, store) = store_with("{\"tasks\": [");
        let err = store.load().unwrap_err();
        assert!(matches!(err, TaskStoreError::Parse { .. }));
        assert!(err.is_document_error());
        assert!(err.to_string().contains("prd.json"));
    }

    #[test]
    fn schema_violation_is_invalid() {
        let (_temp, store) = store_with(
            r#"{"tasks": [{"id": "A", "title": "a", "priority": "high", "passes": false}]}"#,
        );
        let err = store.load().unwrap_err();
        assert!(matches!(err, TaskStoreError::Invalid { .. }));
        assert!(err.is_document_error());
    }

    #[test]
    fn missing_task_array_is_invalid() {
        let (_temp, store) = store_with(r#"{"project": "demo"}"#);
        assert!(matches!(store.load().unwrap_err(), TaskStoreError::Invalid { .. }));
    }

    #[test]
    fn duplicate_ids_are_invalid() {
        let (_temp, store) = store_with(
            r#"{"tasks": [
                {"id": "A", "title": "a", "priority": 1, "passes": false},
                {"id": "A", "title": "again", "priority": 2, "passes": false}
            ]}"#,
        );
        let err = store.load().unwrap_err();
        assert!(err.to_string().contains("duplicate id 'A'"));
    }

    /// Each load observes the latest file contents.
    #[test]
    fn load_rereads_storage() {
        let (_temp, store) = store_with(
            r#"{"tasks": [{"id": "A", "title": "a", "priority": 1, "passes": false}]}"#,
        );
        assert_eq!(store.load().expect("first").completed_count(), 0);

        fs::write(
            store.path(),
            r#"{"tasks": [{"id": "A", "title": "a", "priority": 1, "passes": true}]}"#,
        )
        .expect("rewrite");
        assert_eq!(store.load().expect("second").completed_count(), 1);
    }
}
