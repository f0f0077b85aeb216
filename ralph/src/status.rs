//! Read-only summary for `ralph status`.

use std::fmt;
use std::fs;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::io::init::RalphPaths;
use crate::io::task_store::load_task_list;
use crate::task_list::TaskList;

const BAR_WIDTH: usize = 40;
const PENDING_SHOWN: usize = 5;
const RECENT_ITERATIONS: usize = 3;
const QUALITY_GATES: [(&str, &str); 4] = [
    ("typecheck", "Typecheck"),
    ("test", "Test"),
    ("lint", "Lint"),
    ("build", "Build"),
];

#[derive(Debug)]
pub enum StatusReport {
    NotInitialized,
    MissingTaskList,
    Ready(Box<StatusSummary>),
}

#[derive(Debug)]
pub struct StatusSummary {
    pub list: TaskList,
    /// Last `## Iteration` headings from the progress log, oldest first.
    pub recent_iterations: Vec<String>,
}

/// Inspect `ralph/` without modifying anything.
///
/// A malformed task list is an error, the same one `ralph run` would report.
pub fn collect_status(paths: &RalphPaths) -> Result<StatusReport> {
    if !paths.ralph_dir.is_dir() {
        return Ok(StatusReport::NotInitialized);
    }
    if !paths.task_list_path.is_file() {
        return Ok(StatusReport::MissingTaskList);
    }
    let list = load_task_list(&paths.task_list_path)?;
    let recent_iterations = if paths.progress_path.is_file() {
        let progress = fs::read_to_string(&paths.progress_path)
            .with_context(|| format!("read {}", paths.progress_path.display()))?;
        recent_iterations(&progress)
    } else {
        Vec::new()
    };
    Ok(StatusReport::Ready(Box::new(StatusSummary {
        list,
        recent_iterations,
    })))
}

fn recent_iterations(progress: &str) -> Vec<String> {
    let headings: Vec<&str> = progress
        .lines()
        .filter_map(|line| line.strip_prefix("## "))
        .filter(|heading| heading.starts_with("Iteration"))
        .collect();
    let skip = headings.len().saturating_sub(RECENT_ITERATIONS);
    headings[skip..].iter().map(|s| s.to_string()).collect()
}

fn progress_bar(done: usize, total: usize) -> String {
    let filled = if total == 0 {
        0
    } else {
        (done * BAR_WIDTH + total / 2) / total
    };
    format!(
        "[{}{}]",
        "#".repeat(filled),
        "-".repeat(BAR_WIDTH.saturating_sub(filled))
    )
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInitialized => {
                writeln!(f, "Ralph not initialized")?;
                writeln!(f, "  Run `ralph init` to get started")
            }
            Self::MissingTaskList => {
                writeln!(f, "No prd.json found")?;
                writeln!(
                    f,
                    "  Copy ralph/prd.json.example to ralph/prd.json and configure your tasks"
                )
            }
            Self::Ready(summary) => summary.fmt(f),
        }
    }
}

impl fmt::Display for StatusSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let list = &self.list;
        writeln!(f, "Project:     {}", list.display_name())?;
        writeln!(
            f,
            "Branch:      {}",
            list.branch_name.as_deref().unwrap_or("N/A")
        )?;
        writeln!(f)?;

        let total = list.tasks.len();
        let done = list.completed_count();
        let pct = if total == 0 {
            0
        } else {
            (done * 100 + total / 2) / total
        };
        writeln!(
            f,
            "Progress:    {} {done}/{total} ({pct}%)",
            progress_bar(done, total)
        )?;

        if let Some(stats) = &list.stats {
            writeln!(f)?;
            writeln!(f, "Iterations:  {}", stats.iterations_run())?;
            if let Some(started) = stats.started_at() {
                writeln!(f, "Started:     {started}")?;
            }
            if let Some(completed) = stats.completed_at() {
                writeln!(f, "Completed:   {completed}")?;
            }
        }

        if let Some(config) = &list.config {
            writeln!(f)?;
            writeln!(f, "Configuration:")?;
            writeln!(f, "  Max iterations: {}", list.max_iterations())?;
            writeln!(f, "  Stuck threshold: {}", list.stuck_threshold())?;
            if let Some(Value::Object(gates)) = config.extra.get("qualityGates") {
                for (key, label) in QUALITY_GATES {
                    if let Some(Value::String(command)) = gates.get(key) {
                        writeln!(f, "  {label}: {command}")?;
                    }
                }
            }
        }

        let pending: Vec<_> = list.pending().collect();
        if !pending.is_empty() {
            writeln!(f)?;
            writeln!(f, "Pending tasks:")?;
            for task in pending.iter().take(PENDING_SHOWN) {
                write!(f, "  {}: {}", task.id, task.title)?;
                if task.attempts() > 0 {
                    write!(f, " ({} attempts)", task.attempts())?;
                }
                writeln!(f)?;
            }
            if pending.len() > PENDING_SHOWN {
                writeln!(f, "  ... and {} more", pending.len() - PENDING_SHOWN)?;
            }
        }

        if !self.recent_iterations.is_empty() {
            writeln!(f)?;
            writeln!(f, "Recent iterations:")?;
            for heading in &self.recent_iterations {
                writeln!(f, "  {heading}")?;
            }
        }
        Ok(())
    }
}
