use serde_json::Value;

pub const DEFAULT_AGENT_PREFIX: &str = "waypoint-";
pub const KNOWLEDGE_QUERY_AGENT: &str = "waypoint-knowledge-query";

const PHASE_TABLE: &[(&str, &str)] = &[
    ("waypoint-captain", "coordination"),
    ("waypoint-knowledge-query", "phase1_knowledge_query"),
    ("waypoint-pattern-apply", "phase2_pattern_application"),
    ("waypoint-doc-planning", "phase2_documentation_planning"),
    ("waypoint-data-flow", "phase2_data_flow_analysis"),
    ("waypoint-gap-analysis", "phase3_gap_analysis"),
    ("waypoint-enhanced-analysis", "phase4_enhanced_analysis"),
    ("waypoint-cross-reference", "phase5_cross_reference"),
    ("waypoint-coder", "phase6_execution_bridge"),
];

// Relative cost of each agent against the chars/4 baseline.
const COMPLEXITY_MULTIPLIERS: &[(&str, f64)] = &[
    ("waypoint-captain", 1.2),
    ("waypoint-knowledge-query", 1.5),
    ("waypoint-pattern-apply", 1.3),
    ("waypoint-gap-analysis", 1.4),
    ("waypoint-doc-planning", 1.1),
    ("waypoint-enhanced-analysis", 2.0),
    ("waypoint-cross-reference", 1.6),
    ("waypoint-coder", 1.8),
    ("waypoint-data-flow", 1.5),
    ("waypoint-second-opinion", 1.8),
    ("Code", 1.4),
    ("Task", 1.2),
    ("Debugger", 1.6),
];

const CONTEXT_OVERHEAD_RATIO: f64 = 0.2;
const CONTEXT_OVERHEAD_CAP: f64 = 500.0;

pub fn phase_for_agent(agent: &str) -> Option<&'static str> {
    PHASE_TABLE
        .iter()
        .find(|(name, _)| *name == agent)
        .map(|(_, phase)| *phase)
}

fn multiplier_for(agent: &str) -> f64 {
    COMPLEXITY_MULTIPLIERS
        .iter()
        .find(|(name, _)| *name == agent)
        .map(|(_, m)| *m)
        .unwrap_or(1.0)
}

/// Rough usage estimate for one delegated agent call.
pub fn estimate_usage(agent: &str, prompt: &str, tool_input: Option<&Value>, prefix: &str) -> u64 {
    if prompt.is_empty() {
        return 0;
    }

    let base = (prompt.chars().count() / 4) as f64;
    let mut estimate = base * multiplier_for(agent);
    if !prefix.is_empty() && agent.starts_with(prefix) {
        estimate += (base * CONTEXT_OVERHEAD_RATIO).min(CONTEXT_OVERHEAD_CAP);
    }
    if let Some(input) = tool_input {
        estimate += (input.to_string().chars().count() / 10) as f64;
    }
    estimate as u64
}
