//! Keeps write-capable tools from dropping markdown files in the project root.

use crate::state::paths::StatePaths;
use serde::Serialize;
use serde_json::Value;
use std::path::{Component, Path, PathBuf};

const WRITE_TOOLS: &[&str] = &["Write", "Edit", "MultiEdit", "create_text_file"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Documentation,
    Validation,
    Test,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteVerdict {
    pub safe: bool,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_type: Option<ArtifactKind>,
}

impl WriteVerdict {
    fn allow(reason: impl Into<String>) -> Self {
        Self {
            safe: true,
            reason: reason.into(),
            suggested_path: None,
            file_type: None,
        }
    }
}

/// Host tool names may carry a namespace prefix (`mcp__server__create_text_file`).
fn base_tool_name(tool_name: &str) -> &str {
    tool_name.rsplit("__").next().unwrap_or(tool_name)
}

fn target_path<'a>(tool: &str, input: &'a Value) -> Option<&'a str> {
    let key = if tool == "create_text_file" {
        "relative_path"
    } else {
        "file_path"
    };
    input
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|p| !p.is_empty())
}

/// Lexically resolve `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn lands_in_root(paths: &StatePaths, raw: &str) -> bool {
    let candidate = Path::new(raw);
    let root = normalize(&paths.project_root);
    let resolved = if candidate.is_absolute() {
        normalize(candidate)
    } else {
        normalize(&root.join(candidate))
    };
    match resolved.strip_prefix(&root) {
        Ok(relative) => relative.components().count() <= 1,
        Err(_) => false,
    }
}

fn classify(paths: &StatePaths, raw: &str, content: &str) -> (PathBuf, ArtifactKind) {
    let name = Path::new(raw)
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(raw));
    let lowered_name = raw.to_lowercase();
    let lowered_content = content.to_lowercase();

    if ["test", "integration"]
        .iter()
        .any(|word| lowered_name.contains(word))
    {
        return (paths.tests_dir.join(name), ArtifactKind::Test);
    }
    if ["validation", "test"]
        .iter()
        .any(|word| lowered_content.contains(word))
    {
        return (
            paths.docs_dir.join("validations").join(name),
            ArtifactKind::Validation,
        );
    }
    (paths.docs_dir.join(name), ArtifactKind::Documentation)
}

pub fn validate_write(tool_name: &str, tool_input: &Value, paths: &StatePaths) -> WriteVerdict {
    let tool = base_tool_name(tool_name);
    if !WRITE_TOOLS.contains(&tool) {
        return WriteVerdict::allow("tool does not create files");
    }
    let Some(raw) = target_path(tool, tool_input) else {
        return WriteVerdict::allow("no file path specified");
    };
    let is_markdown = Path::new(raw)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("md"));
    if !is_markdown || !lands_in_root(paths, raw) {
        return WriteVerdict::allow("path validation passed");
    }

    let content = tool_input
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let (suggested, kind) = classify(paths, raw, content);
    let reason = format!(
        "'{raw}' would be created in the project root. Markdown artifacts belong under \
         docs/ (docs/validations/ for validation reports) or the state tests directory. \
         Use: {}",
        suggested.display()
    );
    WriteVerdict {
        safe: false,
        reason,
        suggested_path: Some(suggested),
        file_type: Some(kind),
    }
}
