//! Test-only helpers: task builders, a scratch project and a scripted agent.

use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::core::types::ExecutionResult;
use crate::io::executor::{AgentExecutor, ExecRequest};
use crate::io::init::RalphPaths;
use crate::io::prereq::PrerequisiteError;
use crate::task_list::{Task, TaskList};

/// Create a deterministic task with no attempts and no extra fields.
pub fn task(id: &str, priority: i64, passes: bool) -> Task {
    Task {
        id: id.to_string(),
        title: format!("{id} title"),
        priority,
        passes,
        attempts: None,
        extra: Default::default(),
    }
}

/// Wrap tasks in a task list for project `test`.
pub fn task_list(tasks: Vec<Task>) -> TaskList {
    TaskList {
        project: Some("test".to_string()),
        tasks,
        ..TaskList::default()
    }
}

/// A temporary project root with an initialized `ralph/` directory and prompt.
///
/// The task list is not written until a test asks for it.
pub struct TestProject {
    _temp: TempDir,
    paths: RalphPaths,
}

impl TestProject {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        let paths = RalphPaths::new(temp.path());
        fs::create_dir_all(&paths.ralph_dir).context("create ralph dir")?;
        fs::write(&paths.prompt_path, "Work on the next task.\n").context("write prompt")?;
        Ok(Self { _temp: temp, paths })
    }

    pub fn paths(&self) -> &RalphPaths {
        &self.paths
    }

    pub fn write_task_list(&self, list: &TaskList) -> Result<()> {
        let json = serde_json::to_string_pretty(list).context("serialize task list")?;
        self.write_raw_task_list(&json)
    }

    pub fn write_raw_task_list(&self, contents: &str) -> Result<()> {
        fs::write(&self.paths.task_list_path, contents).context("write task list")
    }

    pub fn write_prompt(&self, contents: &str) -> Result<()> {
        fs::write(&self.paths.prompt_path, contents).context("write prompt")
    }
}

/// One canned agent invocation.
pub struct ScriptedRun {
    output: String,
    exit_code: Option<i32>,
    timed_out: bool,
    interrupted: bool,
    update: Option<String>,
    on_run: Option<Box<dyn FnOnce()>>,
}

impl ScriptedRun {
    /// Successful run that prints `output`.
    pub fn output(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            exit_code: Some(0),
            timed_out: false,
            interrupted: false,
            update: None,
            on_run: None,
        }
    }

    pub fn exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    pub fn timed_out(mut self) -> Self {
        self.timed_out = true;
        self.exit_code = None;
        self
    }

    pub fn interrupted(mut self) -> Self {
        self.interrupted = true;
        self.exit_code = None;
        self
    }

    /// Rewrite the task list during the run, as the agent would.
    pub fn update(self, list: TaskList) -> Self {
        let json = serde_json::to_string_pretty(&list).unwrap_or_default();
        self.raw_update(&json)
    }

    pub fn raw_update(mut self, contents: &str) -> Self {
        self.update = Some(contents.to_string());
        self
    }

    /// Run `hook` while the agent is "running".
    pub fn on_run(mut self, hook: impl FnOnce() + 'static) -> Self {
        self.on_run = Some(Box::new(hook));
        self
    }
}

/// Executor that replays [`ScriptedRun`]s in order and records every prompt.
pub struct ScriptedExecutor {
    task_list_path: PathBuf,
    runs: Mutex<VecDeque<ScriptedRun>>,
    prompts: Mutex<Vec<String>>,
    available: bool,
}

impl ScriptedExecutor {
    pub fn new(paths: &RalphPaths, runs: Vec<ScriptedRun>) -> Self {
        Self {
            task_list_path: paths.task_list_path.clone(),
            runs: Mutex::new(runs.into()),
            prompts: Mutex::new(Vec::new()),
            available: true,
        }
    }

    /// Report the agent as missing during the prerequisite check.
    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn calls(&self) -> usize {
        self.prompts().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|prompts| prompts.clone())
            .unwrap_or_default()
    }

    /// Fail if scripted runs were left unused.
    pub fn assert_drained(&self) -> Result<()> {
        let left = self
            .runs
            .lock()
            .map_err(|_| anyhow!("scripted runs poisoned"))?
            .len();
        if left > 0 {
            return Err(anyhow!("{left} scripted run(s) were never used"));
        }
        Ok(())
    }
}

impl AgentExecutor for ScriptedExecutor {
    fn ensure_available(&self) -> Result<(), PrerequisiteError> {
        if self.available {
            Ok(())
        } else {
            Err(PrerequisiteError::AgentNotFound {
                program: "scripted".to_string(),
            })
        }
    }

    fn run(&self, request: &ExecRequest) -> Result<ExecutionResult> {
        self.prompts
            .lock()
            .map_err(|_| anyhow!("prompts poisoned"))?
            .push(request.prompt.clone());
        let run = self
            .runs
            .lock()
            .map_err(|_| anyhow!("scripted runs poisoned"))?
            .pop_front()
            .ok_or_else(|| anyhow!("scripted executor exhausted"))?;

        if let Some(hook) = run.on_run {
            hook();
        }
        if let Some(contents) = &run.update {
            fs::write(&self.task_list_path, contents).context("write scripted task list")?;
        }
        Ok(ExecutionResult {
            exit_code: run.exit_code,
            output: run.output,
            timed_out: run.timed_out,
            interrupted: run.interrupted,
        })
    }
}
