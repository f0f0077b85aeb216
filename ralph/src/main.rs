//! `ralph`: run an autonomous coding agent in a loop until the task list passes.
//!
//! Works on `ralph/` under the project root: `prd.json` (task list, owned by the
//! agent), `prompt.md` (instructions sent every iteration), `progress.txt`
//! (agent's log) and `config.toml` (runner settings).

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;

use ralph::controller::{
    CompletionReason, LoopConfig, LoopController, LoopEvent, LoopStop, StuckPolicy,
};
use ralph::core::types::Signal;
use ralph::exit_codes;
use ralph::io::cancel::{CancelToken, watch_signals};
use ralph::io::config::load_config;
use ralph::io::executor::CliAgentExecutor;
use ralph::io::init::{InitOptions, RalphPaths, detect_quality_gates, init_project};
use ralph::io::prereq::PrerequisiteError;
use ralph::io::task_store::{FileTaskStore, TaskStoreError};
use ralph::logging;
use ralph::status::collect_status;

#[derive(Parser)]
#[command(name = "ralph", version, about = "Autonomous agent loop runner")]
struct Cli {
    /// Project root containing `ralph/`.
    #[arg(long, global = true, default_value = ".")]
    dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `ralph/` with a prompt template, example task list and progress log.
    Init {
        /// Overwrite existing files (never touches prd.json).
        #[arg(short, long)]
        force: bool,
    },
    /// Run the agent repeatedly until every task passes.
    Run {
        /// Maximum iterations (overrides `config.maxIterations` in prd.json).
        #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..))]
        max: Option<u32>,
        /// Stop once a task is reported stuck `stuckThreshold` times in a row.
        #[arg(long)]
        halt_on_stuck: bool,
    },
    /// Show task progress without running anything.
    Status,
}

fn main() -> ExitCode {
    logging::init();
    let cli = Cli::parse();
    let code = match dispatch(cli) {
        Ok(code) => code,
        Err(err) => report_error(&err),
    };
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn dispatch(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Init { force } => cmd_init(&cli.dir, force),
        Command::Run { max, halt_on_stuck } => cmd_run(&cli.dir, max, halt_on_stuck),
        Command::Status => cmd_status(&cli.dir),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_project(root, &InitOptions { force })?;
    println!("Initialized {}", paths.ralph_dir.display());
    println!();
    print_quality_gates(root);
    println!();
    println!("Next steps:");
    println!(
        "  1. Copy {} to {} and describe your tasks",
        paths.task_list_example_path.display(),
        paths.task_list_path.display()
    );
    println!("  2. Adjust {} if needed", paths.prompt_path.display());
    println!("  3. Run `ralph run`");
    Ok(exit_codes::OK)
}

fn print_quality_gates(root: &Path) {
    println!("Detecting quality gates...");
    match detect_quality_gates(root) {
        Ok(Some(gates)) if gates.is_empty() => {
            println!("  No quality gate scripts in package.json - configure them manually");
        }
        Ok(Some(gates)) => {
            for gate in gates {
                println!("  {}: {}", gate.label, gate.command);
            }
        }
        Ok(None) => println!("  No package.json found - configure quality gates manually"),
        Err(err) => println!("  {err:#} - configure quality gates manually"),
    }
}

fn cmd_status(root: &Path) -> Result<i32> {
    let report = collect_status(&RalphPaths::new(root))?;
    print!("{report}");
    Ok(exit_codes::OK)
}

fn cmd_run(root: &Path, max: Option<u32>, halt_on_stuck: bool) -> Result<i32> {
    let paths = RalphPaths::new(root);
    let config = load_config(&paths.config_path).context("load runner config")?;
    let loop_config = LoopConfig {
        max_iterations: max,
        cool_down: config.cool_down(),
        iteration_timeout: config.iteration_timeout(),
        stuck_policy: if halt_on_stuck || config.halt_on_stuck {
            StuckPolicy::HaltAtThreshold
        } else {
            StuckPolicy::Ignore
        },
    };
    debug!(?loop_config, "resolved loop config");

    let cancel = CancelToken::new();
    watch_signals(cancel.clone())?;

    let store = FileTaskStore::new(&paths.task_list_path);
    let executor = CliAgentExecutor::new(config.agent.clone());
    let outcome = LoopController::new(&paths, &store, &executor, &loop_config, cancel)
        .run(print_event)?;

    let code = match outcome.stop {
        LoopStop::Completed(CompletionReason::AllTasksPass) if outcome.iterations_run == 0 => {
            println!("All tasks complete!");
            exit_codes::OK
        }
        LoopStop::Completed(_) => {
            println!();
            println!("RALPH COMPLETE after {} iteration(s)", outcome.iterations_run);
            exit_codes::OK
        }
        LoopStop::MaxIterationsExceeded { max_iterations } => {
            println!();
            println!("MAX ITERATIONS REACHED ({max_iterations})");
            println!("Run `ralph run` again to continue");
            exit_codes::MAX_ITERATIONS
        }
        LoopStop::Stuck {
            task_id,
            reason,
            reports,
        } => {
            println!();
            println!("STUCK on {task_id} after {reports} consecutive report(s): {reason}");
            println!("Fix the blocker, then run `ralph run` again");
            exit_codes::STUCK
        }
        LoopStop::Interrupted => {
            println!();
            println!("Interrupted after {} iteration(s)", outcome.iterations_run);
            exit_codes::INTERRUPTED
        }
    };
    Ok(code)
}

fn print_event(event: &LoopEvent<'_>) {
    match event {
        LoopEvent::Started {
            list,
            max_iterations,
        } => {
            println!("Project: {}", list.display_name());
            println!("Tasks: {}/{} complete", list.completed_count(), list.tasks.len());
            println!("Max iterations: {max_iterations}");
            println!();
        }
        LoopEvent::IterationStarted {
            iteration,
            max_iterations,
            task,
        } => {
            println!("=== Iteration {iteration}/{max_iterations}: {} ===", task.id);
            println!("  {}", task.title);
            println!();
        }
        LoopEvent::IterationFinished { result, signal, .. } => {
            if result.timed_out {
                println!("Agent timed out");
            } else if !result.success() {
                println!("Agent exited with {:?}, continuing", result.exit_code);
            }
            if let Signal::StuckReported { task_id, reason } = signal {
                println!("Agent reports {task_id} stuck: {reason}");
            }
        }
        LoopEvent::CoolingDown { duration } => {
            debug!(?duration, "cooling down");
        }
    }
}

/// Print `err` and pick the exit code for it.
fn report_error(err: &anyhow::Error) -> i32 {
    eprintln!("error: {err:#}");
    if let Some(prereq) = err.downcast_ref::<PrerequisiteError>() {
        eprintln!("  {}", prereq.remediation());
        return exit_codes::FAILED;
    }
    match err.downcast_ref::<TaskStoreError>() {
        Some(store_err) if store_err.is_document_error() => exit_codes::DOCUMENT_INVALID,
        _ => exit_codes::FAILED,
    }
}
