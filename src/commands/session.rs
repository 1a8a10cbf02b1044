use anyhow::Result;

use crate::commands::{CommandReport, StateContext};
use crate::state::session::TouchOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    Start,
    Touch,
    End,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub action: SessionAction,
    pub summary: Option<String>,
}

fn touch_label(outcome: TouchOutcome) -> &'static str {
    match outcome {
        TouchOutcome::Created => "created",
        TouchOutcome::Updated => "updated",
        TouchOutcome::Recreated => "recreated",
        TouchOutcome::Failed => "failed",
    }
}

pub fn run(opts: &SessionOptions) -> Result<CommandReport> {
    let ctx = StateContext::load()?;
    let sessions = ctx.sessions();
    let mut report = CommandReport::new(match opts.action {
        SessionAction::Start => "session-start",
        SessionAction::Touch => "session-touch",
        SessionAction::End => "session-end",
    });

    match opts.action {
        SessionAction::Start => {
            let outcome = sessions.touch();
            report.detail(format!("marker={}", touch_label(outcome)));
            if outcome == TouchOutcome::Failed {
                report.issue(format!(
                    "failed to write session marker ({})",
                    sessions.marker_path().display()
                ));
            }
            let summary = opts.summary.as_deref().unwrap_or("session started");
            sessions.write_status_marker(summary)?;
            report.detail(format!("status_file={}", sessions.status_path().display()));
        }
        SessionAction::Touch => {
            let outcome = sessions.touch();
            report.detail(format!("marker={}", touch_label(outcome)));
            if outcome == TouchOutcome::Failed {
                report.issue(format!(
                    "failed to write session marker ({})",
                    sessions.marker_path().display()
                ));
            }
        }
        SessionAction::End => {
            let removed = sessions.clear_status_marker()?;
            report.detail(format!("status_marker_removed={removed}"));
        }
    }

    if let Some(marker) = sessions.load() {
        report.detail(format!("session_start={}", marker.session_start));
        report.detail(format!("last_activity={}", marker.last_activity));
    }
    Ok(report)
}
