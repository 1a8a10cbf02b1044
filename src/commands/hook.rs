//! Host hook entry point.
//!
//! Reads one event from stdin and prints a decision only when a tool call is
//! denied. Every internal failure is journaled and the call is let through.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{self, Read};

use crate::commands::StateContext;
use crate::state::knowledge::extract_keywords;
use crate::state::path_guard::validate_write;
use crate::state::phases::{KNOWLEDGE_QUERY_AGENT, estimate_usage};
use crate::state::util::truncate_with_ellipsis;
use crate::state::warn::{self, WarnEvent};
use crate::state::worker::{ProcessQueryRunner, QueryRunner};

pub const MAX_HOOK_INPUT_BYTES: u64 = 512 * 1024;
const PROMPT_LOG_CHARS: usize = 100;
const REPORTED_DOCS: usize = 3;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HookEvent {
    #[serde(default)]
    pub hook_event_name: String,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_input: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HookDecision {
    pub permission_decision: String,
    pub permission_decision_reason: String,
}

impl HookDecision {
    fn deny(reason: impl Into<String>) -> Self {
        Self {
            permission_decision: "deny".to_string(),
            permission_decision_reason: reason.into(),
        }
    }
}

#[derive(Debug)]
pub enum HookInputError {
    Read(io::Error),
    TooLarge,
    Parse(serde_json::Error),
}

impl HookInputError {
    fn action(&self) -> &'static str {
        match self {
            Self::Read(_) => "input_error",
            Self::TooLarge => "input_too_large",
            Self::Parse(_) => "json_error",
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Read(err) => format!("failed to read hook input: {err}"),
            Self::TooLarge => format!("hook input exceeds {MAX_HOOK_INPUT_BYTES} bytes"),
            Self::Parse(err) => format!("invalid hook JSON: {err}"),
        }
    }
}

pub fn read_event(reader: impl Read) -> Result<HookEvent, HookInputError> {
    let mut raw = Vec::new();
    reader
        .take(MAX_HOOK_INPUT_BYTES + 1)
        .read_to_end(&mut raw)
        .map_err(HookInputError::Read)?;
    if raw.len() as u64 > MAX_HOOK_INPUT_BYTES {
        return Err(HookInputError::TooLarge);
    }
    serde_json::from_slice(&raw).map_err(HookInputError::Parse)
}

pub fn handle_event(
    ctx: &StateContext,
    event: &HookEvent,
    runner: Option<&dyn QueryRunner>,
) -> Option<HookDecision> {
    let decision = match event.hook_event_name.as_str() {
        "UserPromptSubmit" => {
            on_prompt(ctx, event);
            None
        }
        "PreToolUse" => on_tool_use(ctx, event, runner),
        "" => None,
        other => {
            ctx.journal
                .append("unknown_hook", &format!("unknown hook event: {other}"));
            None
        }
    };
    let label = if event.hook_event_name.is_empty() {
        "unknown"
    } else {
        event.hook_event_name.as_str()
    };
    ctx.journal.append(label, "processed");
    decision
}

fn on_prompt(ctx: &StateContext, event: &HookEvent) {
    let Some(prompt) = event.prompt.as_deref().filter(|p| !p.trim().is_empty()) else {
        return;
    };
    ctx.journal.append(
        "prompt_routing",
        &truncate_with_ellipsis(prompt, PROMPT_LOG_CHARS),
    );
    ctx.sessions().touch();
}

fn on_tool_use(
    ctx: &StateContext,
    event: &HookEvent,
    runner: Option<&dyn QueryRunner>,
) -> Option<HookDecision> {
    let tool_name = event.tool_name.as_deref().unwrap_or_default();
    let null = Value::Null;
    let tool_input = event.tool_input.as_ref().unwrap_or(&null);

    let verdict = validate_write(tool_name, tool_input, &ctx.paths);
    if !verdict.safe {
        let target = verdict
            .suggested_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        ctx.journal
            .append("blocked_root_write", &format!("{tool_name} -> {target}"));
        return Some(HookDecision::deny(verdict.reason));
    }

    if tool_name != "Task" {
        return None;
    }
    let agent = tool_input
        .get("subagent_type")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    let prompt = tool_input
        .get("prompt")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let prefix = ctx.config.activity.agent_prefix.as_str();
    if agent.is_empty() || prefix.is_empty() || !agent.starts_with(prefix) {
        return None;
    }

    let estimate = estimate_usage(agent, prompt, Some(tool_input), prefix);
    ctx.ledger().record(agent, estimate);
    ctx.sessions().touch();
    ctx.journal
        .append("token_tracking", &format!("{agent}: {estimate} estimated"));
    ctx.journal.append("agent_active", agent);

    if agent == KNOWLEDGE_QUERY_AGENT {
        return knowledge_query(ctx, prompt, runner);
    }
    None
}

fn knowledge_query(
    ctx: &StateContext,
    prompt: &str,
    runner: Option<&dyn QueryRunner>,
) -> Option<HookDecision> {
    let Some(runner) = runner else {
        ctx.journal
            .append("knowledge_query_skipped", "no query worker available");
        return None;
    };
    let keywords = extract_keywords(prompt);
    ctx.journal.append(
        "knowledge_query",
        &format!("keywords: {}", keywords.join(", ")),
    );

    let resolution = ctx.cache().resolve(prompt, &keywords, runner).ok()?;
    let payload = &resolution.payload;
    let status = payload
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("completed");
    let docs: Vec<&str> = payload
        .get("docs_analysis")
        .and_then(Value::as_object)
        .map(|map| map.keys().take(REPORTED_DOCS).map(String::as_str).collect())
        .unwrap_or_default();
    let docs = if docs.is_empty() {
        "none".to_string()
    } else {
        docs.join(", ")
    };
    Some(HookDecision::deny(format!(
        "{KNOWLEDGE_QUERY_AGENT} ran in an isolated worker: {status}{}\n\nMatching documents: {docs}",
        if resolution.from_cache { " (cached)" } else { "" }
    )))
}

pub fn run() -> Result<()> {
    let ctx = match StateContext::load_lenient() {
        Ok(ctx) => ctx,
        Err(err) => {
            warn::emit(WarnEvent {
                code: "HOOK_SETUP_FAILED",
                component: "hook",
                action: "resolve-paths",
                path: "",
                fallback: "allow",
                err: &format!("{err:#}"),
            });
            return Ok(());
        }
    };

    let event = match read_event(io::stdin().lock()) {
        Ok(event) => event,
        Err(err) => {
            ctx.journal.append(err.action(), &err.describe());
            warn::emit(WarnEvent {
                code: "HOOK_INPUT_INVALID",
                component: "hook",
                action: err.action(),
                path: "",
                fallback: "allow",
                err: &err.describe(),
            });
            return Ok(());
        }
    };

    let runner = match ProcessQueryRunner::from_config(&ctx.paths, &ctx.config.query) {
        Ok(runner) => Some(runner),
        Err(failure) => {
            ctx.journal
                .append("knowledge_subprocess_setup_error", &failure.to_string());
            None
        }
    };
    let runner = runner.as_ref().map(|r| r as &dyn QueryRunner);

    if let Some(decision) = handle_event(&ctx, &event, runner) {
        println!("{}", serde_json::to_string(&decision)?);
    }
    Ok(())
}
