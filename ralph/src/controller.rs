//! Iteration loop controller for `ralph run`.
//!
//! The controller is an explicit state machine:
//!
//! ```text
//! CheckingPrerequisites -> SelectingOrIdle -> RunningIteration -> Paused -> SelectingOrIdle ...
//!                                  |                 |
//!                                  v                 v
//!              Completed / MaxIterationsExceeded   Completed / Stuck / Interrupted
//! ```
//!
//! Every cycle reloads the task list from the store, because the agent edits it
//! while it runs. Only one agent process exists at a time: the next selection
//! happens after the executor has returned, i.e. after the child has exited.

use std::fs;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, warn};

use crate::core::selector::select_next;
use crate::core::signal::classify;
use crate::core::types::{ExecutionResult, Signal};
use crate::io::cancel::CancelToken;
use crate::io::executor::{AgentExecutor, ExecRequest};
use crate::io::init::RalphPaths;
use crate::io::prereq::check_layout;
use crate::io::task_store::TaskStore;
use crate::task_list::{Task, TaskList};

/// What to do when the agent reports a task as stuck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StuckPolicy {
    /// Log the report and keep iterating.
    #[default]
    Ignore,
    /// Stop once the same task is reported `stuckThreshold` iterations in a row.
    HaltAtThreshold,
}

/// Knobs for one `ralph run`.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Overrides the task list's `config.maxIterations` when set.
    pub max_iterations: Option<u32>,
    /// Pause between iterations.
    pub cool_down: Duration,
    /// Per-iteration agent timeout.
    pub iteration_timeout: Option<Duration>,
    pub stuck_policy: StuckPolicy,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: None,
            cool_down: Duration::from_secs(2),
            iteration_timeout: None,
            stuck_policy: StuckPolicy::Ignore,
        }
    }
}

/// Why the loop reported completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionReason {
    /// The task list has no pending task.
    AllTasksPass,
    /// The agent emitted the completion marker.
    CompletionMarker,
}

/// Reason why `LoopController::run` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    Completed(CompletionReason),
    /// `max_iterations` iterations ran without completion.
    MaxIterationsExceeded { max_iterations: u32 },
    /// The agent kept reporting the same task as stuck.
    ///
    /// Only reported with [`StuckPolicy::HaltAtThreshold`].
    Stuck {
        task_id: String,
        reason: String,
        reports: u32,
    },
    /// Cancellation was requested by the operator.
    Interrupted,
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub iterations_run: u32,
    pub stop: LoopStop,
}

/// Progress notifications for the caller.
#[derive(Debug)]
pub enum LoopEvent<'a> {
    /// The first task-list load succeeded.
    Started {
        list: &'a TaskList,
        max_iterations: u32,
    },
    IterationStarted {
        iteration: u32,
        max_iterations: u32,
        task: &'a Task,
    },
    IterationFinished {
        iteration: u32,
        result: &'a ExecutionResult,
        signal: &'a Signal,
    },
    CoolingDown { duration: Duration },
}

enum State {
    CheckingPrerequisites,
    SelectingOrIdle,
    RunningIteration(Task),
    Paused,
    Finished(LoopStop),
    Failed(anyhow::Error),
}

/// Bookkeeping carried across states.
#[derive(Debug, Default)]
struct Progress {
    iterations: u32,
    max_iterations: Option<u32>,
    stuck_threshold: u32,
    stuck_streak: Option<(String, u32)>,
}

impl Progress {
    fn max(&self) -> u32 {
        self.max_iterations.unwrap_or(0)
    }

    fn record_stuck(&mut self, task_id: &str) -> u32 {
        let reports = match &self.stuck_streak {
            Some((id, count)) if id == task_id => count + 1,
            _ => 1,
        };
        self.stuck_streak = Some((task_id.to_string(), reports));
        reports
    }
}

/// Drives agent iterations until the task list is satisfied or the budget runs out.
pub struct LoopController<'a, S: TaskStore, E: AgentExecutor> {
    paths: &'a RalphPaths,
    store: &'a S,
    executor: &'a E,
    config: &'a LoopConfig,
    cancel: CancelToken,
}

impl<'a, S: TaskStore, E: AgentExecutor> LoopController<'a, S, E> {
    pub fn new(
        paths: &'a RalphPaths,
        store: &'a S,
        executor: &'a E,
        config: &'a LoopConfig,
        cancel: CancelToken,
    ) -> Self {
        Self {
            paths,
            store,
            executor,
            config,
            cancel,
        }
    }

    /// Run the loop to a terminal state.
    ///
    /// Prerequisite failures ([`crate::io::prereq::PrerequisiteError`]) and
    /// task-list failures ([`crate::io::task_store::TaskStoreError`]) are returned
    /// as errors and can be recovered with `downcast_ref`. Agent failures
    /// (non-zero exit, timeout) never end the loop.
    pub fn run<F: FnMut(&LoopEvent<'_>)>(&self, mut on_event: F) -> Result<LoopOutcome> {
        let mut progress = Progress::default();
        let mut state = State::CheckingPrerequisites;
        loop {
            state = match state {
                State::CheckingPrerequisites => self.check_prerequisites(),
                State::SelectingOrIdle => self.select(&mut progress, &mut on_event),
                State::RunningIteration(task) => {
                    self.run_iteration(task, &mut progress, &mut on_event)
                }
                State::Paused => self.pause(&mut on_event),
                State::Finished(stop) => {
                    info!(iterations = progress.iterations, stop = ?stop, "loop finished");
                    return Ok(LoopOutcome {
                        iterations_run: progress.iterations,
                        stop,
                    });
                }
                State::Failed(err) => return Err(err),
            };
        }
    }

    fn check_prerequisites(&self) -> State {
        if let Err(err) = check_layout(self.paths) {
            return State::Failed(err.into());
        }
        match self.executor.ensure_available() {
            Ok(()) => State::SelectingOrIdle,
            Err(err) => State::Failed(err.into()),
        }
    }

    fn select<F: FnMut(&LoopEvent<'_>)>(&self, progress: &mut Progress, on_event: &mut F) -> State {
        if self.cancel.is_cancelled() {
            return State::Finished(LoopStop::Interrupted);
        }
        let list = match self.store.load() {
            Ok(list) => list,
            Err(err) => return State::Failed(err.into()),
        };

        if progress.max_iterations.is_none() {
            let max_iterations = self
                .config
                .max_iterations
                .unwrap_or_else(|| list.max_iterations());
            if max_iterations == 0 {
                return State::Failed(anyhow!("max iterations must be at least 1"));
            }
            progress.max_iterations = Some(max_iterations);
            on_event(&LoopEvent::Started {
                list: &list,
                max_iterations,
            });
        }
        progress.stuck_threshold = list.stuck_threshold();

        match select_next(&list.tasks) {
            None => State::Finished(LoopStop::Completed(CompletionReason::AllTasksPass)),
            Some(_) if progress.iterations >= progress.max() => {
                State::Finished(LoopStop::MaxIterationsExceeded {
                    max_iterations: progress.max(),
                })
            }
            Some(task) => {
                debug!(task_id = %task.id, priority = task.priority, "selected task");
                State::RunningIteration(task.clone())
            }
        }
    }

    fn run_iteration<F: FnMut(&LoopEvent<'_>)>(
        &self,
        task: Task,
        progress: &mut Progress,
        on_event: &mut F,
    ) -> State {
        progress.iterations += 1;
        let iteration = progress.iterations;
        on_event(&LoopEvent::IterationStarted {
            iteration,
            max_iterations: progress.max(),
            task: &task,
        });

        let prompt = match fs::read_to_string(&self.paths.prompt_path)
            .with_context(|| format!("read prompt {}", self.paths.prompt_path.display()))
        {
            Ok(prompt) => prompt,
            Err(err) => return State::Failed(err),
        };
        let request = ExecRequest {
            workdir: self.paths.root.clone(),
            prompt,
            timeout: self.config.iteration_timeout,
            cancel: self.cancel.clone(),
        };
        let result = match self.executor.run(&request) {
            Ok(result) => result,
            Err(err) => {
                return State::Failed(err.context(format!("iteration {iteration}")));
            }
        };
        if result.interrupted {
            return State::Finished(LoopStop::Interrupted);
        }
        if !result.success() {
            // The agent records its own failures in the task list and progress log.
            warn!(
                iteration,
                exit_code = ?result.exit_code,
                "agent exited unsuccessfully, continuing"
            );
        }

        let signal = if result.timed_out {
            warn!(iteration, "agent timed out, treating iteration as non-completing");
            Signal::None
        } else {
            classify(&result.output)
        };
        on_event(&LoopEvent::IterationFinished {
            iteration,
            result: &result,
            signal: &signal,
        });

        match signal {
            Signal::Completed => {
                info!(iteration, "completion marker received");
                State::Finished(LoopStop::Completed(CompletionReason::CompletionMarker))
            }
            Signal::StuckReported { task_id, reason } => {
                let reports = progress.record_stuck(&task_id);
                warn!(
                    iteration,
                    task_id = %task_id,
                    reports,
                    reason = %reason,
                    "agent reported stuck"
                );
                if self.config.stuck_policy == StuckPolicy::HaltAtThreshold
                    && reports >= progress.stuck_threshold
                {
                    return State::Finished(LoopStop::Stuck {
                        task_id,
                        reason,
                        reports,
                    });
                }
                self.after_iteration(progress)
            }
            Signal::None => {
                progress.stuck_streak = None;
                self.after_iteration(progress)
            }
        }
    }

    /// No cool-down after the final iteration: go straight to the last selection.
    fn after_iteration(&self, progress: &Progress) -> State {
        if progress.iterations >= progress.max() {
            State::SelectingOrIdle
        } else {
            State::Paused
        }
    }

    fn pause<F: FnMut(&LoopEvent<'_>)>(&self, on_event: &mut F) -> State {
        let duration = self.config.cool_down;
        if duration.is_zero() {
            return State::SelectingOrIdle;
        }
        on_event(&LoopEvent::CoolingDown { duration });
        if self.cancel.wait_timeout(duration) {
            return State::Finished(LoopStop::Interrupted);
        }
        State::SelectingOrIdle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::signal::COMPLETION_MARKER;
    use crate::io::prereq::PrerequisiteError;
    use crate::io::task_store::{FileTaskStore, TaskStoreError};
    use crate::test_support::{ScriptedExecutor, ScriptedRun, TestProject, task, task_list};

    fn fast_config(max_iterations: Option<u32>) -> LoopConfig {
        LoopConfig {
            max_iterations,
            cool_down: Duration::ZERO,
            ..LoopConfig::default()
        }
    }

    fn run_loop(
        project: &TestProject,
        executor: &ScriptedExecutor,
        config: &LoopConfig,
    ) -> Result<LoopOutcome> {
        let store = FileTaskStore::new(&project.paths().task_list_path);
        LoopController::new(
            project.paths(),
            &store,
            executor,
            config,
            CancelToken::new(),
        )
        .run(|_| {})
    }

    #[test]
    fn completes_without_spawning_when_all_tasks_pass() {
        let project = TestProject::new().expect("project");
        project
            .write_task_list(&task_list(vec![task("A", 1, true), task("B", 2, true)]))
            .expect("write");
        let executor = ScriptedExecutor::new(project.paths(), Vec::new());

        let outcome = run_loop(&project, &executor, &fast_config(None)).expect("loop");

        assert_eq!(
            outcome.stop,
            LoopStop::Completed(CompletionReason::AllTasksPass)
        );
        assert_eq!(outcome.iterations_run, 0);
        assert_eq!(executor.calls(), 0);
    }

    #[test]
    fn completion_marker_wins_over_pending_tasks() {
        let project = TestProject::new().expect("project");
        project
            .write_task_list(&task_list(vec![task("A", 1, false), task("B", 2, false)]))
            .expect("write");
        let executor = ScriptedExecutor::new(
            project.paths(),
            vec![ScriptedRun::output(format!("done {COMPLETION_MARKER}"))],
        );

        let outcome = run_loop(&project, &executor, &fast_config(None)).expect("loop");

        assert_eq!(
            outcome.stop,
            LoopStop::Completed(CompletionReason::CompletionMarker)
        );
        assert_eq!(outcome.iterations_run, 1);
        executor.assert_drained().expect("drained");
    }

    #[test]
    fn stops_after_exactly_max_iterations() {
        let project = TestProject::new().expect("project");
        project
            .write_task_list(&task_list(vec![task("A", 1, false)]))
            .expect("write");
        let executor = ScriptedExecutor::new(
            project.paths(),
            vec![
                ScriptedRun::output("working"),
                ScriptedRun::output("still working").exit_code(1),
                ScriptedRun::output("nope"),
            ],
        );

        let outcome = run_loop(&project, &executor, &fast_config(Some(3))).expect("loop");

        assert_eq!(
            outcome.stop,
            LoopStop::MaxIterationsExceeded { max_iterations: 3 }
        );
        assert_eq!(outcome.iterations_run, 3);
        assert_eq!(executor.calls(), 3);
    }

    #[test]
    fn document_max_iterations_applies_without_override() {
        let project = TestProject::new().expect("project");
        let mut list = task_list(vec![task("A", 1, false)]);
        list.config = Some(crate::task_list::DocumentConfig {
            max_iterations: Some(2),
            ..Default::default()
        });
        project.write_task_list(&list).expect("write");
        let executor = ScriptedExecutor::new(
            project.paths(),
            vec![ScriptedRun::output("a"), ScriptedRun::output("b")],
        );

        let outcome = run_loop(&project, &executor, &fast_config(None)).expect("loop");

        assert_eq!(
            outcome.stop,
            LoopStop::MaxIterationsExceeded { max_iterations: 2 }
        );
        executor.assert_drained().expect("drained");
    }

    /// The task list is re-read every cycle, so tasks flipped by the agent are skipped.
    #[test]
    fn rereads_task_list_between_iterations() {
        let project = TestProject::new().expect("project");
        project
            .write_task_list(&task_list(vec![task("A", 2, false), task("B", 1, false)]))
            .expect("write");

        let executor = ScriptedExecutor::new(
            project.paths(),
            vec![
                ScriptedRun::output("did B")
                    .update(task_list(vec![task("A", 2, false), task("B", 1, true)])),
                ScriptedRun::output("did A")
                    .update(task_list(vec![task("A", 2, true), task("B", 1, true)])),
            ],
        );

        let mut selected = Vec::new();
        let store = FileTaskStore::new(&project.paths().task_list_path);
        let config = fast_config(Some(10));
        let outcome = LoopController::new(
            project.paths(),
            &store,
            &executor,
            &config,
            CancelToken::new(),
        )
        .run(|event| {
            if let LoopEvent::IterationStarted { task, .. } = event {
                selected.push(task.id.clone());
            }
        })
        .expect("loop");

        assert_eq!(selected, vec!["B".to_string(), "A".to_string()]);
        assert_eq!(
            outcome.stop,
            LoopStop::Completed(CompletionReason::AllTasksPass)
        );
        assert_eq!(outcome.iterations_run, 2);
    }

    /// Finishing the work on the final iteration counts as completion, not budget exhaustion.
    #[test]
    fn final_iteration_completing_the_list_is_completed() {
        let project = TestProject::new().expect("project");
        project
            .write_task_list(&task_list(vec![task("A", 1, false)]))
            .expect("write");
        let executor = ScriptedExecutor::new(
            project.paths(),
            vec![ScriptedRun::output("did A").update(task_list(vec![task("A", 1, true)]))],
        );

        let outcome = run_loop(&project, &executor, &fast_config(Some(1))).expect("loop");

        assert_eq!(
            outcome.stop,
            LoopStop::Completed(CompletionReason::AllTasksPass)
        );
    }

    #[test]
    fn malformed_task_list_fails_before_agent_runs() {
        let project = TestProject::new().expect("project");
        project.write_raw_task_list("{ not json").expect("write");
        let executor = ScriptedExecutor::new(project.paths(), Vec::new());

        let err = run_loop(&project, &executor, &fast_config(None)).unwrap_err();

        let store_err = err
            .downcast_ref::<TaskStoreError>()
            .expect("task store error");
        assert!(matches!(store_err, TaskStoreError::Parse { .. }));
        assert_eq!(executor.calls(), 0);
    }

    #[test]
    fn task_list_corrupted_mid_run_fails() {
        let project = TestProject::new().expect("project");
        project
            .write_task_list(&task_list(vec![task("A", 1, false)]))
            .expect("write");
        let executor = ScriptedExecutor::new(
            project.paths(),
            vec![ScriptedRun::output("oops").raw_update("[]")],
        );

        let err = run_loop(&project, &executor, &fast_config(Some(5))).unwrap_err();

        assert!(
            err.downcast_ref::<TaskStoreError>()
                .is_some_and(TaskStoreError::is_document_error)
        );
        assert_eq!(executor.calls(), 1);
    }

    #[test]
    fn missing_prompt_is_a_prerequisite_failure() {
        let project = TestProject::new().expect("project");
        project
            .write_task_list(&task_list(vec![task("A", 1, false)]))
            .expect("write");
        fs::remove_file(&project.paths().prompt_path).expect("rm prompt");
        let executor = ScriptedExecutor::new(project.paths(), Vec::new());

        let err = run_loop(&project, &executor, &fast_config(None)).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<PrerequisiteError>(),
            Some(PrerequisiteError::MissingPrompt { .. })
        ));
        assert_eq!(executor.calls(), 0);
    }

    #[test]
    fn unavailable_agent_is_a_prerequisite_failure() {
        let project = TestProject::new().expect("project");
        project
            .write_task_list(&task_list(vec![task("A", 1, false)]))
            .expect("write");
        let executor = ScriptedExecutor::new(project.paths(), Vec::new()).unavailable();

        let err = run_loop(&project, &executor, &fast_config(None)).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<PrerequisiteError>(),
            Some(PrerequisiteError::AgentNotFound { .. })
        ));
    }

    #[test]
    fn prompt_is_passed_verbatim_and_reread() {
        let project = TestProject::new().expect("project");
        project
            .write_task_list(&task_list(vec![task("A", 1, false)]))
            .expect("write");
        project.write_prompt("first {{ not a template }}").expect("prompt");
        let prompt_path = project.paths().prompt_path.clone();
        let executor = ScriptedExecutor::new(
            project.paths(),
            vec![
                ScriptedRun::output("one").on_run(move || {
                    fs::write(&prompt_path, "second").expect("rewrite prompt");
                }),
                ScriptedRun::output("two"),
            ],
        );

        run_loop(&project, &executor, &fast_config(Some(2))).expect("loop");

        assert_eq!(
            executor.prompts(),
            vec!["first {{ not a template }}".to_string(), "second".to_string()]
        );
    }

    #[test]
    fn stuck_reports_are_ignored_by_default() {
        let project = TestProject::new().expect("project");
        project
            .write_task_list(&task_list(vec![task("A", 1, false)]))
            .expect("write");
        let stuck = "<stuck>A: cannot reach database</stuck>";
        let executor = ScriptedExecutor::new(
            project.paths(),
            vec![
                ScriptedRun::output(stuck),
                ScriptedRun::output(stuck),
                ScriptedRun::output(stuck),
                ScriptedRun::output(stuck),
            ],
        );

        let outcome = run_loop(&project, &executor, &fast_config(Some(4))).expect("loop");

        assert_eq!(
            outcome.stop,
            LoopStop::MaxIterationsExceeded { max_iterations: 4 }
        );
    }

    #[test]
    fn stuck_policy_halts_at_threshold() {
        let project = TestProject::new().expect("project");
        let mut list = task_list(vec![task("A", 1, false), task("B", 2, false)]);
        list.config = Some(crate::task_list::DocumentConfig {
            stuck_threshold: Some(2),
            ..Default::default()
        });
        project.write_task_list(&list).expect("write");
        let executor = ScriptedExecutor::new(
            project.paths(),
            vec![
                ScriptedRun::output("<stuck>A: flaky</stuck>"),
                ScriptedRun::output("<stuck>B: other</stuck>"),
                ScriptedRun::output("<stuck>A: flaky</stuck>"),
                ScriptedRun::output("<stuck>A: still flaky</stuck>"),
            ],
        );
        let config = LoopConfig {
            stuck_policy: StuckPolicy::HaltAtThreshold,
            ..fast_config(Some(10))
        };

        let outcome = run_loop(&project, &executor, &config).expect("loop");

        assert_eq!(
            outcome.stop,
            LoopStop::Stuck {
                task_id: "A".to_string(),
                reason: "still flaky".to_string(),
                reports: 2,
            }
        );
        assert_eq!(outcome.iterations_run, 4);
    }

    #[test]
    fn timed_out_iteration_ignores_markers() {
        let project = TestProject::new().expect("project");
        project
            .write_task_list(&task_list(vec![task("A", 1, false)]))
            .expect("write");
        let executor = ScriptedExecutor::new(
            project.paths(),
            vec![ScriptedRun::output(COMPLETION_MARKER).timed_out()],
        );

        let outcome = run_loop(&project, &executor, &fast_config(Some(1))).expect("loop");

        assert_eq!(
            outcome.stop,
            LoopStop::MaxIterationsExceeded { max_iterations: 1 }
        );
    }

    #[test]
    fn interrupted_agent_stops_loop() {
        let project = TestProject::new().expect("project");
        project
            .write_task_list(&task_list(vec![task("A", 1, false)]))
            .expect("write");
        let executor = ScriptedExecutor::new(
            project.paths(),
            vec![ScriptedRun::output("partial").interrupted()],
        );

        let outcome = run_loop(&project, &executor, &fast_config(Some(5))).expect("loop");

        assert_eq!(outcome.stop, LoopStop::Interrupted);
        assert_eq!(outcome.iterations_run, 1);
    }

    #[test]
    fn cancellation_during_cool_down_stops_loop() {
        let project = TestProject::new().expect("project");
        project
            .write_task_list(&task_list(vec![task("A", 1, false)]))
            .expect("write");
        let cancel = CancelToken::new();
        let remote = cancel.clone();
        let executor = ScriptedExecutor::new(
            project.paths(),
            vec![ScriptedRun::output("working").on_run(move || remote.cancel())],
        );
        let store = FileTaskStore::new(&project.paths().task_list_path);
        let config = LoopConfig {
            cool_down: Duration::from_secs(60),
            ..fast_config(Some(5))
        };

        let mut cooled = false;
        let outcome = LoopController::new(project.paths(), &store, &executor, &config, cancel)
            .run(|event| {
                if matches!(event, LoopEvent::CoolingDown { .. }) {
                    cooled = true;
                }
            })
            .expect("loop");

        assert!(cooled);
        assert_eq!(outcome.stop, LoopStop::Interrupted);
        assert_eq!(executor.calls(), 1);
    }

    #[test]
    fn executor_error_is_fatal() {
        let project = TestProject::new().expect("project");
        project
            .write_task_list(&task_list(vec![task("A", 1, false)]))
            .expect("write");
        let executor = ScriptedExecutor::new(project.paths(), Vec::new());

        let err = run_loop(&project, &executor, &fast_config(Some(2))).unwrap_err();

        assert!(format!("{err:#}").contains("scripted executor exhausted"));
    }

    #[test]
    fn zero_max_iterations_is_rejected() {
        let project = TestProject::new().expect("project");
        project
            .write_task_list(&task_list(vec![task("A", 1, false)]))
            .expect("write");
        let executor = ScriptedExecutor::new(project.paths(), Vec::new());

        let err = run_loop(&project, &executor, &fast_config(Some(0))).unwrap_err();
        assert!(err.to_string().contains("at least 1"));
    }
}
