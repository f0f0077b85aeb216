//! Runner configuration stored under `ralph/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Runner configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to the
/// behavior of a plain `ralph run`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunnerConfig {
    /// Pause between iterations, in milliseconds.
    pub cool_down_ms: u64,

    /// Per-iteration wall-clock budget for the agent. Unset means no limit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration_timeout_secs: Option<u64>,

    /// Stop the loop once a task is reported stuck `stuckThreshold` times in a row.
    pub halt_on_stuck: bool,

    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Executable to launch, resolved on `PATH` unless it contains a separator.
    pub program: String,

    /// Arguments placed before the prompt text (which is always the last argument).
    pub args: Vec<String>,

    /// Spawn the agent in its own process group so kills reach its children too.
    ///
    /// Off by default: a background group cannot read from the controlling
    /// terminal, so an agent that prompts on stdin would be stopped. Without it a
    /// timeout kills only the agent itself; descendants still holding its output
    /// pipes are abandoned after a short grace period.
    pub process_group: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            args: vec![
                "--print".to_string(),
                "--dangerously-skip-permissions".to_string(),
                "-p".to_string(),
            ],
            process_group: false,
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            cool_down_ms: 2_000,
            iteration_timeout_secs: None,
            halt_on_stuck: false,
            agent: AgentConfig::default(),
        }
    }
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.iteration_timeout_secs == Some(0) {
            return Err(anyhow!("iteration_timeout_secs must be > 0 when set"));
        }
        if self.agent.program.trim().is_empty() {
            return Err(anyhow!("agent.program must be non-empty"));
        }
        Ok(())
    }

    pub fn cool_down(&self) -> Duration {
        Duration::from_millis(self.cool_down_ms)
    }

    pub fn iteration_timeout(&self) -> Option<Duration> {
        self.iteration_timeout_secs.map(Duration::from_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RunnerConfig::default()`.
pub fn load_config(path: &Path) -> Result<RunnerConfig> {
    if !path.exists() {
        let cfg = RunnerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RunnerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RunnerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
