use anyhow::Result;

use crate::commands::{CommandReport, StateContext};
use crate::state::config::resolve_config_path;
use crate::state::integrity::{self, LoadOutcome, MAX_LEDGER_BYTES};
use crate::state::lock::lock_path_for;

pub fn run() -> Result<CommandReport> {
    let ctx = StateContext::load()?;
    let paths = &ctx.paths;
    let cfg = &ctx.config;
    let mut report = CommandReport::new("status");

    report.detail(format!("build_id={}", env!("WAYPOINT_BUILD_ID")));
    report.detail(format!("project_root={}", paths.project_root.display()));
    report.detail(format!("project_root_explicit={}", paths.root_is_explicit));
    report.detail(format!("state_dir={}", paths.state_dir.display()));
    report.detail(format!("docs_dir={}", paths.docs_dir.display()));
    report.detail(format!("ledger_file={}", paths.ledger_file.display()));
    report.detail(format!(
        "ledger_lock={}",
        lock_path_for(&paths.ledger_file).display()
    ));
    report.detail(format!("session_file={}", paths.session_file.display()));
    report.detail(format!("journal_file={}", paths.journal_file.display()));
    report.detail(format!("cache_dir={}", paths.cache_dir.display()));
    if let Some(config_path) = resolve_config_path(paths) {
        report.detail(format!(
            "config_path={} (exists={})",
            config_path.display(),
            config_path.exists()
        ));
    }

    report.detail(format!(
        "activity.windows=session:{}s,activity:{}s",
        cfg.activity.session_window_secs, cfg.activity.activity_window_secs
    ));
    report.detail(format!("activity.agent_prefix={}", cfg.activity.agent_prefix));
    report.detail(format!("cache.ttl_secs={}", cfg.cache.ttl_secs));
    report.detail(format!("query.timeout_secs={}", cfg.query.timeout_secs));
    report.detail(format!("query.memory_limit_mb={}", cfg.query.memory_limit_mb));
    report.detail(format!(
        "query.command={}",
        cfg.query.command.as_deref().unwrap_or("builtin")
    ));
    report.detail(format!("journal.max_bytes={}", cfg.journal.max_bytes));

    match integrity::inspect_bounded(&paths.ledger_file, MAX_LEDGER_BYTES) {
        LoadOutcome::Missing => report.detail("ledger=absent"),
        LoadOutcome::Loaded(record) => report.detail(format!("ledger=ok total={}", record.total)),
        LoadOutcome::Invalid(failure) => report.issue(format!(
            "ledger invalid ({}): {failure}; next record resets it",
            failure.kind().as_str()
        )),
    }

    Ok(report)
}
