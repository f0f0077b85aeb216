//! Prerequisite checks performed before the loop starts.

use std::env;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use super::init::RalphPaths;

/// A missing prerequisite. The loop never starts when one is reported.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PrerequisiteError {
    #[error("ralph/ directory not found at {}", path.display())]
    MissingWorkArea { path: PathBuf },

    #[error("task list not found at {}", path.display())]
    MissingTaskList { path: PathBuf },

    #[error("prompt not found at {}", path.display())]
    MissingPrompt { path: PathBuf },

    #[error("agent executable `{program}` not found on PATH")]
    AgentNotFound { program: String },
}

impl PrerequisiteError {
    /// Actionable next step for the operator.
    pub fn remediation(&self) -> &'static str {
        match self {
            Self::MissingWorkArea { .. } => "run `ralph init` first to initialize your project",
            Self::MissingTaskList { .. } => {
                "copy ralph/prd.json.example to ralph/prd.json and configure your tasks"
            }
            Self::MissingPrompt { .. } => {
                "run `ralph init --force` to recreate the prompt template"
            }
            Self::AgentNotFound { .. } => {
                "install the agent CLI or set `agent.program` in ralph/config.toml"
            }
        }
    }
}

/// Check that the working area, task list and prompt exist.
pub fn check_layout(paths: &RalphPaths) -> Result<(), PrerequisiteError> {
    if !paths.ralph_dir.is_dir() {
        return Err(PrerequisiteError::MissingWorkArea {
            path: paths.ralph_dir.clone(),
        });
    }
    if !paths.task_list_path.is_file() {
        return Err(PrerequisiteError::MissingTaskList {
            path: paths.task_list_path.clone(),
        });
    }
    if !paths.prompt_path.is_file() {
        return Err(PrerequisiteError::MissingPrompt {
            path: paths.prompt_path.clone(),
        });
    }
    Ok(())
}

/// Resolve `program` to an executable path.
///
/// Names containing a path separator are checked directly; bare names are
/// searched on `PATH`.
pub fn resolve_program(program: &str) -> Result<PathBuf, PrerequisiteError> {
    resolve_program_in(program, env::var_os("PATH").as_deref())
}

fn resolve_program_in(
    program: &str,
    search_path: Option<&OsStr>,
) -> Result<PathBuf, PrerequisiteError> {
    let not_found = || PrerequisiteError::AgentNotFound {
        program: program.to_string(),
    };
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return if is_executable(candidate) {
            Ok(candidate.to_path_buf())
        } else {
            Err(not_found())
        };
    }

    let search_path = search_path.ok_or_else(not_found)?;
    let found = env::split_paths(search_path)
        .map(|dir| dir.join(program))
        .find(|path| is_executable(path))
        .ok_or_else(not_found)?;
    debug!(program, resolved = %found.display(), "agent executable resolved");
    Ok(found)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
