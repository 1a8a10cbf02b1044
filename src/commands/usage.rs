use anyhow::Result;

use crate::commands::{CommandReport, StateContext};

pub fn run() -> Result<CommandReport> {
    let ctx = StateContext::load()?;
    let mut report = CommandReport::new("usage");
    let record = ctx.ledger().read();

    report.detail(format!("ledger_file={}", ctx.paths.ledger_file.display()));
    report.detail(format!("total={}", record.total));
    report.detail(format!("session_start={}", record.session_start));
    report.detail(format!("last_update={}", record.last_update));
    for (agent, count) in &record.by_agent {
        report.detail(format!("agent.{agent}={count}"));
    }
    for (phase, count) in &record.by_phase {
        report.detail(format!("phase.{phase}={count}"));
    }
    Ok(report)
}
