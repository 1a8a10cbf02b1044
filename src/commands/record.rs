use anyhow::Result;

use crate::commands::{CommandReport, StateContext};
use crate::state::phases::phase_for_agent;

#[derive(Debug, Clone)]
pub struct RecordOptions {
    pub agent: String,
    pub amount: u64,
}

pub fn run(opts: &RecordOptions) -> Result<CommandReport> {
    let ctx = StateContext::load()?;
    let mut report = CommandReport::new("record");

    ctx.ledger().record(&opts.agent, opts.amount);
    ctx.sessions().touch();
    ctx.journal.append(
        "token_tracking",
        &format!("{}: {} recorded", opts.agent, opts.amount),
    );

    let record = ctx.ledger().read();
    report.detail(format!("agent={}", opts.agent));
    report.detail(format!("amount={}", opts.amount));
    if let Some(phase) = phase_for_agent(&opts.agent) {
        report.detail(format!("phase={phase}"));
    }
    report.detail(format!("total={}", record.total));
    Ok(report)
}
