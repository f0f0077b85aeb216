//! Initialization helpers for `ralph/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use minijinja::{Environment, context};
use serde_json::Value;
use tracing::{debug, info};

use super::config::{RunnerConfig, write_config};

const PROMPT_TEMPLATE: &str = include_str!("../templates/prompt.md");
const TASK_LIST_EXAMPLE: &str = include_str!("../templates/prd.json.example");
const PROGRESS_TEMPLATE: &str = include_str!("../templates/progress.txt.j2");

/// `package.json` scripts recognized as quality gates, first matching name wins.
const PACKAGE_SCRIPTS: [(&str, &[&str]); 4] = [
    ("Typecheck", &["typecheck", "type-check"]),
    ("Tests", &["test"]),
    ("Lint", &["lint"]),
    ("Build", &["build"]),
];

/// All canonical paths within `ralph/` for a project root.
#[derive(Debug, Clone)]
pub struct RalphPaths {
    pub root: PathBuf,
    pub ralph_dir: PathBuf,
    pub task_list_path: PathBuf,
    pub task_list_example_path: PathBuf,
    pub prompt_path: PathBuf,
    pub progress_path: PathBuf,
    pub config_path: PathBuf,
}

impl RalphPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let ralph_dir = root.join("ralph");
        Self {
            root: root.clone(),
            ralph_dir: ralph_dir.clone(),
            task_list_path: ralph_dir.join("prd.json"),
            task_list_example_path: ralph_dir.join("prd.json.example"),
            prompt_path: ralph_dir.join("prompt.md"),
            progress_path: ralph_dir.join("progress.txt"),
            config_path: ralph_dir.join("config.toml"),
        }
    }
}

/// Options for `init_project`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing ralph-owned files.
    pub force: bool,
}

/// Create `ralph/` scaffolding in `root`.
///
/// Writes the prompt template, an example task list, a fresh progress log and a
/// default `config.toml`. `prd.json` is never written: the operator creates it
/// from the example. Fails if `ralph/` already exists unless `options.force` is set.
pub fn init_project(root: &Path, options: &InitOptions) -> Result<RalphPaths> {
    let paths = RalphPaths::new(root);
    if paths.ralph_dir.exists() && !paths.ralph_dir.is_dir() {
        return Err(anyhow!("ralph init: ralph exists but is not a directory"));
    }
    if paths.ralph_dir.exists() && !options.force {
        return Err(anyhow!(
            "ralph init: ralph/ already exists (use --force to overwrite, or `ralph run` to continue)"
        ));
    }

    debug!(root = %root.display(), force = options.force, "initializing ralph/");
    create_dir(&paths.ralph_dir)?;
    write_file(&paths.prompt_path, PROMPT_TEMPLATE)?;
    write_file(&paths.task_list_example_path, TASK_LIST_EXAMPLE)?;
    write_file(
        &paths.progress_path,
        &render_progress_header(&project_name(root), &chrono::Utc::now().to_rfc3339())?,
    )?;
    if options.force || !paths.config_path.exists() {
        write_config(&paths.config_path, &RunnerConfig::default())?;
    }

    info!(dir = %paths.ralph_dir.display(), "ralph initialized");
    Ok(paths)
}

/// A check the agent should run before marking a task as passing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityGate {
    pub label: &'static str,
    pub command: String,
}

/// Look for quality gates among the npm scripts in `root/package.json`.
///
/// Returns `None` when there is no `package.json`; the operator then has to
/// configure gates by hand.
pub fn detect_quality_gates(root: &Path) -> Result<Option<Vec<QualityGate>>> {
    let path = root.join("package.json");
    if !path.is_file() {
        return Ok(None);
    }
    let raw = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    let package: Value =
        serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
    let Some(scripts) = package.get("scripts").and_then(Value::as_object) else {
        return Ok(Some(Vec::new()));
    };

    let gates = PACKAGE_SCRIPTS
        .iter()
        .filter_map(|&(label, names)| {
            let name = names.iter().find(|name| scripts.contains_key(**name))?;
            let command = match *name {
                "test" => "npm test".to_string(),
                _ => format!("npm run {name}"),
            };
            Some(QualityGate { label, command })
        })
        .collect();
    Ok(Some(gates))
}

/// Render the progress log header for a new project.
pub fn render_progress_header(project: &str, started_at: &str) -> Result<String> {
    let env = Environment::new();
    let rendered = env
        .render_str(
            PROGRESS_TEMPLATE,
            context! { project => project, started_at => started_at },
        )
        .context("render progress header")?;
    Ok(format!("{rendered}\n"))
}

fn project_name(root: &Path) -> String {
    root.canonicalize()
        .ok()
        .and_then(|path| path.file_name().map(|name| name.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "project".to_string())
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir(parent)?;
    }
    fs::write(path, contents).with_context(|| format!("write file {}", path.display()))
}
