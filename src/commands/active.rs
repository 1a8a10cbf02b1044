use anyhow::Result;

use crate::commands::{CommandReport, StateContext};
use crate::state::util::now_epoch_secs;

pub fn run() -> Result<CommandReport> {
    let ctx = StateContext::load()?;
    let mut report = CommandReport::new("active");
    let verdict = ctx.sensor().verdict_at(now_epoch_secs()?);

    report.detail(format!("active={}", verdict.is_some()));
    if let Some(signal) = verdict {
        report.detail(format!("signal={}", signal.as_str()));
    }
    Ok(report)
}
