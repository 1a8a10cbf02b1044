use anyhow::Result;

use crate::commands::{CommandReport, StateContext};
use crate::state::knowledge::extract_keywords;
use crate::state::worker::ProcessQueryRunner;

#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub description: String,
    pub keywords: Vec<String>,
    pub cached_only: bool,
}

pub fn run(opts: &QueryOptions) -> Result<CommandReport> {
    let ctx = StateContext::load()?;
    let mut report = CommandReport::new("query");
    let cache = ctx.cache();

    let keywords = if opts.keywords.is_empty() {
        extract_keywords(&opts.description)
    } else {
        opts.keywords.clone()
    };
    report.detail(format!("keywords={}", keywords.join(",")));

    if opts.cached_only {
        match cache.get(&opts.description, &keywords) {
            Some(payload) => {
                report.detail("from_cache=true");
                report.detail(format!("payload={payload}"));
            }
            None => report.issue("cache miss"),
        }
        return Ok(report);
    }

    let runner = match ProcessQueryRunner::from_config(&ctx.paths, &ctx.config.query) {
        Ok(runner) => runner,
        Err(failure) => {
            report.issue(failure.to_value().to_string());
            return Ok(report);
        }
    };
    match cache.resolve(&opts.description, &keywords, &runner) {
        Ok(resolution) => {
            report.detail(format!("from_cache={}", resolution.from_cache));
            report.detail(format!("payload={}", resolution.payload));
        }
        Err(failure) => report.issue(failure.to_value().to_string()),
    }
    Ok(report)
}
