use anyhow::Result;

use crate::commands::{CommandReport, StateContext};
use crate::state::ledger::UsageRecord;

const REPORTED_AGENTS: usize = 10;
const COST_PER_UNIT_USD: f64 = 0.00001;
const DELEGATION_AGENT: &str = "delegation_chain";
// Parallel phases carry roughly 10% coordination overhead.
const PARALLEL_PHASE_PREFIXES: &[&str] = &["phase2_", "phase5_"];
// Checked in order; the first phase with usage wins.
const HIGH_VALUE_PHASES: &[&str] = &["phase4_enhanced_analysis", "phase1_knowledge_query"];

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    part as f64 * 100.0 / whole as f64
}

pub fn format_duration(record: &UsageRecord) -> String {
    if record.session_start == 0 || record.last_update < record.session_start {
        return "unknown".to_string();
    }
    let secs = record.last_update - record.session_start;
    format!("{}m {}s", secs / 60, secs % 60)
}

pub fn usage_per_minute(record: &UsageRecord) -> u64 {
    let secs = record.last_update.saturating_sub(record.session_start);
    if record.session_start == 0 || secs == 0 {
        return 0;
    }
    (record.total as f64 / (secs as f64 / 60.0)) as u64
}

pub fn estimated_cost(record: &UsageRecord) -> f64 {
    record.total as f64 * COST_PER_UNIT_USD
}

/// What the phases would have cost run one after another, without the
/// coordination overhead of the parallel phases.
pub fn sequential_estimate(record: &UsageRecord) -> u64 {
    let (parallel, other): (Vec<(&String, &u64)>, Vec<(&String, &u64)>) = record
        .by_phase
        .iter()
        .partition(|(phase, _)| PARALLEL_PHASE_PREFIXES.iter().any(|p| phase.starts_with(p)));
    let without_overhead: u64 = PARALLEL_PHASE_PREFIXES
        .iter()
        .map(|prefix| {
            let sum: u64 = parallel
                .iter()
                .filter(|(phase, _)| phase.starts_with(prefix))
                .map(|(_, count)| **count)
                .sum();
            sum.saturating_mul(10) / 11
        })
        .sum();
    without_overhead + other.iter().map(|(_, count)| **count).sum::<u64>()
}

/// Percentage saved against [`sequential_estimate`]; negative when the
/// session cost more than the sequential baseline.
pub fn parallel_efficiency(record: &UsageRecord) -> f64 {
    let sequential = sequential_estimate(record);
    if sequential == 0 {
        return 0.0;
    }
    (sequential as f64 - record.total as f64) * 100.0 / sequential as f64
}

pub fn most_efficient_agent(record: &UsageRecord) -> Option<(&str, u64)> {
    record
        .by_agent
        .iter()
        .min_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)))
        .map(|(agent, count)| (agent.as_str(), *count))
}

pub fn highest_value_phase(record: &UsageRecord) -> Option<(&'static str, u64)> {
    HIGH_VALUE_PHASES.iter().find_map(|phase| {
        record
            .by_phase
            .get(*phase)
            .filter(|count| **count > 0)
            .map(|count| (*phase, *count))
    })
}

pub fn optimization_hints(record: &UsageRecord) -> Vec<&'static str> {
    let total = record.total as f64;
    let mut hints = Vec::new();
    let delegation = record.by_agent.get(DELEGATION_AGENT).copied().unwrap_or(0);
    if delegation as f64 > total * 0.3 {
        hints.push("optimize specialist delegation chains");
    }
    let phase2: u64 = record
        .by_phase
        .iter()
        .filter(|(phase, _)| phase.starts_with("phase2_"))
        .map(|(_, count)| *count)
        .sum();
    if phase2 as f64 > total * 0.4 {
        hints.push("consider phase 2 optimization");
    }
    if hints.is_empty() {
        hints.push("current allocation appears optimal");
    }
    hints
}

/// Report lines for `record`, largest agents first.
pub fn summarize(record: &UsageRecord) -> Vec<String> {
    if record.total == 0 {
        return vec!["no usage recorded for this session".to_string()];
    }

    let mut lines = vec![
        format!("total={}", record.total),
        format!("duration={}", format_duration(record)),
        format!("per_minute={}", usage_per_minute(record)),
        format!("estimated_cost_usd={:.4}", estimated_cost(record)),
        format!("sequential_estimate={}", sequential_estimate(record)),
        format!("parallel_efficiency={:.1}%", parallel_efficiency(record)),
    ];
    if let Some((phase, count)) = record.most_expensive_phase() {
        lines.push(format!("most_expensive_phase={phase} ({count})"));
    }
    if let Some((agent, count)) = most_efficient_agent(record) {
        lines.push(format!("most_efficient_agent={agent} ({count})"));
    }
    match highest_value_phase(record) {
        Some((phase, count)) => lines.push(format!("highest_value_phase={phase} ({count})")),
        None => lines.push("highest_value_phase=unknown".to_string()),
    }
    lines.push(format!("optimizations={}", optimization_hints(record).join("; ")));

    let agent_sum: u64 = record.by_agent.values().sum();
    let mut agents: Vec<(&String, &u64)> = record.by_agent.iter().collect();
    agents.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    for (agent, count) in agents.into_iter().take(REPORTED_AGENTS) {
        lines.push(format!(
            "agent.{agent}={count} ({:.1}%)",
            percent(*count, agent_sum)
        ));
    }

    let phase_sum: u64 = record.by_phase.values().sum();
    for (phase, count) in &record.by_phase {
        lines.push(format!(
            "phase.{phase}={count} ({:.1}%)",
            percent(*count, phase_sum)
        ));
    }
    lines
}

pub fn run() -> Result<CommandReport> {
    let ctx = StateContext::load()?;
    let mut report = CommandReport::new("report");
    for line in summarize(&ctx.ledger().read()) {
        report.detail(line);
    }
    Ok(report)
}
