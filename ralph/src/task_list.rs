//! Task-list document (`ralph/prd.json`).
//!
//! The document is owned by the agent: it flips `passes`, bumps `attempts` and
//! appends stats while it works. The runner only reads it, but the model stays
//! lossless: unknown keys live in flattened maps, optional fields are only
//! written back when they were present, `stats` is kept as raw JSON (explicit
//! `null`s included) and the task array keeps the key it was read from.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default iteration budget when neither the CLI nor the document sets one.
pub const DEFAULT_MAX_ITERATIONS: u32 = 50;
/// Default number of consecutive stuck reports tolerated for one task.
pub const DEFAULT_STUCK_THRESHOLD: u32 = 3;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "TaskListRepr", into = "TaskListRepr")]
pub struct TaskList {
    pub project: Option<String>,
    pub branch_name: Option<String>,
    pub tasks: Vec<Task>,
    /// Key the task array is stored under.
    pub tasks_key: TasksKey,
    pub stats: Option<RunStats>,
    pub config: Option<DocumentConfig>,
    pub extra: Map<String, Value>,
}

/// Accepted names for the task array.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TasksKey {
    #[default]
    Tasks,
    /// Older documents call their tasks user stories.
    UserStories,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub priority: i64,
    pub passes: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Task {
    pub fn attempts(&self) -> u32 {
        self.attempts.unwrap_or(0)
    }
}

/// Counters maintained by the agent, kept verbatim.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct RunStats(pub Map<String, Value>);

impl RunStats {
    pub fn iterations_run(&self) -> u64 {
        self.0
            .get("iterationsRun")
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }

    pub fn started_at(&self) -> Option<&str> {
        self.0.get("startedAt").and_then(Value::as_str)
    }

    pub fn completed_at(&self) -> Option<&str> {
        self.0.get("completedAt").and_then(Value::as_str)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stuck_threshold: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// On-disk shape, with both spellings of the task array.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskListRepr {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    branch_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tasks: Option<Vec<Task>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_stories: Option<Vec<Task>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stats: Option<RunStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    config: Option<DocumentConfig>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl TryFrom<TaskListRepr> for TaskList {
    type Error = String;

    fn try_from(repr: TaskListRepr) -> Result<Self, Self::Error> {
        let mut extra = repr.extra;
        let (tasks, tasks_key) = match (repr.tasks, repr.user_stories) {
            (Some(tasks), None) => (tasks, TasksKey::Tasks),
            (None, Some(stories)) => (stories, TasksKey::UserStories),
            // `tasks` wins; the other array is carried along untouched.
            (Some(tasks), Some(stories)) => {
                let stories = serde_json::to_value(stories).map_err(|err| err.to_string())?;
                extra.insert("userStories".to_string(), stories);
                (tasks, TasksKey::Tasks)
            }
            (None, None) => return Err("missing field `tasks`".to_string()),
        };
        Ok(Self {
            project: repr.project,
            branch_name: repr.branch_name,
            tasks,
            tasks_key,
            stats: repr.stats,
            config: repr.config,
            extra,
        })
    }
}

impl From<TaskList> for TaskListRepr {
    fn from(list: TaskList) -> Self {
        let (tasks, user_stories) = match list.tasks_key {
            TasksKey::Tasks => (Some(list.tasks), None),
            TasksKey::UserStories => (None, Some(list.tasks)),
        };
        Self {
            project: list.project,
            branch_name: list.branch_name,
            tasks,
            user_stories,
            stats: list.stats,
            config: list.config,
            extra: list.extra,
        }
    }
}

impl TaskList {
    pub fn max_iterations(&self) -> u32 {
        self.config
            .as_ref()
            .and_then(|cfg| cfg.max_iterations)
            .unwrap_or(DEFAULT_MAX_ITERATIONS)
    }

    pub fn stuck_threshold(&self) -> u32 {
        self.config
            .as_ref()
            .and_then(|cfg| cfg.stuck_threshold)
            .unwrap_or(DEFAULT_STUCK_THRESHOLD)
    }

    pub fn display_name(&self) -> &str {
        self.project.as_deref().unwrap_or("Unknown")
    }

    pub fn pending(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter(|task| !task.passes)
    }

    pub fn completed_count(&self) -> usize {
        self.tasks.iter().filter(|task| task.passes).count()
    }

    pub fn find(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == id)
    }
}
