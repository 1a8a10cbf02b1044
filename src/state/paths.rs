use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

pub const STATE_DIR_NAME: &str = ".waypoint";

#[derive(Debug, Clone)]
pub struct StatePaths {
    pub project_root: PathBuf,
    pub state_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub docs_dir: PathBuf,
    pub ledger_file: PathBuf,
    pub session_file: PathBuf,
    pub status_file: PathBuf,
    pub journal_file: PathBuf,
    pub cache_dir: PathBuf,
    pub scratch_dir: PathBuf,
    pub tests_dir: PathBuf,
    pub root_is_explicit: bool,
}

impl StatePaths {
    /// Layout rooted at `project_root` with the default state and docs dirs.
    pub fn under(project_root: &Path) -> Self {
        Self::from_inputs(project_root.to_path_buf(), false, None, None)
    }

    fn from_inputs(
        project_root: PathBuf,
        root_is_explicit: bool,
        state_dir: Option<PathBuf>,
        docs_dir: Option<PathBuf>,
    ) -> Self {
        let state_dir = state_dir.unwrap_or_else(|| project_root.join(STATE_DIR_NAME));
        let docs_dir = docs_dir.unwrap_or_else(|| project_root.join("docs"));
        let logs_dir = state_dir.join("logs");
        Self {
            ledger_file: logs_dir.join("usage.json"),
            session_file: logs_dir.join("session.json"),
            status_file: logs_dir.join("status"),
            journal_file: logs_dir.join("handler.log"),
            cache_dir: state_dir.join("cache").join("knowledge"),
            scratch_dir: state_dir.join("tmp"),
            tests_dir: state_dir.join("tests"),
            logs_dir,
            docs_dir,
            state_dir,
            project_root,
            root_is_explicit,
        }
    }
}

fn env_path(var: &str) -> Option<PathBuf> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(PathBuf::from(v.trim())),
        _ => None,
    }
}

pub fn resolve_paths() -> Result<StatePaths> {
    let (project_root, is_explicit) = match env_path("WAYPOINT_HOME") {
        Some(root) => (root, true),
        None => (
            env::current_dir().context("failed to resolve current working directory")?,
            false,
        ),
    };

    Ok(StatePaths::from_inputs(
        project_root,
        is_explicit,
        env_path("WAYPOINT_STATE_DIR"),
        env_path("WAYPOINT_DOCS_DIR"),
    ))
}
