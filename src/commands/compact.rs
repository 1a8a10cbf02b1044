use anyhow::Result;

use crate::commands::{CommandReport, StateContext};

pub fn run() -> Result<CommandReport> {
    let ctx = StateContext::load()?;
    let mut report = CommandReport::new("compact");
    let ledger = ctx.ledger();

    let outcome = ledger.compact();
    report.detail(format!("ledger_file={}", ledger.path().display()));
    report.detail(format!("outcome={}", outcome.as_str()));
    report.detail(format!("total={}", ledger.read().total));
    Ok(report)
}
