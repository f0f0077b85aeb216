//! Executor abstraction for agent invocation.
//!
//! The [`AgentExecutor`] trait decouples the loop controller from the actual
//! agent backend (an external CLI, `claude` by default). Tests use scripted
//! executors that return predetermined outputs without spawning processes.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::types::ExecutionResult;
use crate::io::cancel::CancelToken;
use crate::io::config::AgentConfig;
use crate::io::prereq::{PrerequisiteError, resolve_program};
use crate::io::process::{Sinks, StreamOptions, run_streaming};

/// Parameters for one agent invocation.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Working directory for the agent process.
    pub workdir: PathBuf,
    /// Prompt text, passed verbatim.
    pub prompt: String,
    /// Kill the agent after this long. `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Kill the agent when cancelled.
    pub cancel: CancelToken,
}

/// Abstraction over agent execution backends.
pub trait AgentExecutor {
    /// Fail with a prerequisite error if the backend cannot run on this host.
    fn ensure_available(&self) -> Result<(), PrerequisiteError> {
        Ok(())
    }

    /// Run the agent once and block until it has exited.
    fn run(&self, request: &ExecRequest) -> Result<ExecutionResult>;
}

/// Executor that spawns an agent CLI with the prompt as its final argument.
pub struct CliAgentExecutor {
    config: AgentConfig,
    live_output: bool,
}

impl CliAgentExecutor {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            live_output: true,
        }
    }

    /// Capture output without echoing it to the runner's stdout/stderr.
    pub fn quiet(mut self) -> Self {
        self.live_output = false;
        self
    }

    fn command(&self, request: &ExecRequest) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .arg(&request.prompt)
            .current_dir(&request.workdir);
        cmd
    }
}

impl AgentExecutor for CliAgentExecutor {
    fn ensure_available(&self) -> Result<(), PrerequisiteError> {
        resolve_program(&self.config.program).map(|_| ())
    }

    #[instrument(skip_all, fields(program = %self.config.program, timeout = ?request.timeout))]
    fn run(&self, request: &ExecRequest) -> Result<ExecutionResult> {
        info!(workdir = %request.workdir.display(), "starting agent");

        let sinks = if self.live_output {
            Sinks::inherit()
        } else {
            Sinks::discard()
        };
        let output = run_streaming(
            self.command(request),
            &StreamOptions {
                timeout: request.timeout,
                cancel: request.cancel.clone(),
                process_group: self.config.process_group,
            },
            sinks,
        )
        .with_context(|| format!("run agent `{}`", self.config.program))?;

        if output.timed_out {
            warn!(timeout = ?request.timeout, "agent timed out");
        } else if !output.status.success() && !output.interrupted {
            warn!(exit_code = ?output.status.code(), "agent exited with failure");
        } else {
            debug!(exit_code = ?output.status.code(), "agent finished");
        }

        Ok(ExecutionResult {
            exit_code: output.status.code(),
            output: String::from_utf8_lossy(&output.captured).into_owned(),
            timed_out: output.timed_out,
            interrupted: output.interrupted,
        })
    }
}
