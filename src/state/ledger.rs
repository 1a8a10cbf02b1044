use crate::state::integrity::{self, CompactOutcome, LoadOutcome, MAX_LEDGER_BYTES, retain_top};
use crate::state::journal::Journal;
use crate::state::lock;
use crate::state::paths::StatePaths;
use crate::state::phases::phase_for_agent;
use crate::state::util::{now_or_zero, write_atomic};
use crate::state::warn::{self, WarnEvent};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const MAX_AGENT_ENTRIES: usize = 50;
pub const MAX_PHASE_ENTRIES: usize = 8;
pub const MAX_AGENT_NAME_CHARS: usize = 128;

/// Accumulated usage for the current session.
///
/// `total` only ever grows through [`UsageRecord::apply`]; bucket eviction
/// never touches it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub total: u64,
    #[serde(default)]
    pub by_agent: BTreeMap<String, u64>,
    #[serde(default)]
    pub by_phase: BTreeMap<String, u64>,
    #[serde(default)]
    pub session_start: u64,
    #[serde(default)]
    pub last_update: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Eviction {
    pub agents: usize,
    pub phases: usize,
}

impl UsageRecord {
    pub fn started_at(now_epoch: u64) -> Self {
        Self {
            session_start: now_epoch,
            last_update: now_epoch,
            ..Self::default()
        }
    }

    pub fn apply(&mut self, agent: &str, amount: u64, now_epoch: u64) {
        let agent = normalize_agent(agent);
        self.total = self.total.saturating_add(amount);
        let slot = self.by_agent.entry(agent.clone()).or_insert(0);
        *slot = slot.saturating_add(amount);
        if let Some(phase) = phase_for_agent(&agent) {
            let slot = self.by_phase.entry(phase.to_string()).or_insert(0);
            *slot = slot.saturating_add(amount);
        }
        if self.session_start == 0 {
            self.session_start = now_epoch;
        }
        self.last_update = now_epoch;
    }

    pub fn enforce_bounds(&mut self) -> Eviction {
        Eviction {
            agents: retain_top(&mut self.by_agent, MAX_AGENT_ENTRIES),
            phases: retain_top(&mut self.by_phase, MAX_PHASE_ENTRIES),
        }
    }

    pub fn to_compact_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn most_expensive_phase(&self) -> Option<(&str, u64)> {
        self.by_phase
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(name, count)| (name.as_str(), *count))
    }
}

fn normalize_agent(agent: &str) -> String {
    let trimmed = agent.trim();
    let name = if trimmed.is_empty() { "unknown" } else { trimmed };
    name.chars().take(MAX_AGENT_NAME_CHARS).collect()
}

/// Persistent usage accounting shared by every hook invocation.
#[derive(Debug, Clone)]
pub struct UsageLedger {
    path: PathBuf,
    journal: Journal,
}

impl UsageLedger {
    pub fn new(path: impl Into<PathBuf>, journal: Journal) -> Self {
        Self {
            path: path.into(),
            journal,
        }
    }

    pub fn for_paths(paths: &StatePaths, journal: Journal) -> Self {
        Self::new(paths.ledger_file.clone(), journal)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, agent: &str, amount: u64) {
        self.record_at(agent, amount, now_or_zero());
    }

    pub fn record_at(&self, agent: &str, amount: u64, now_epoch: u64) {
        let written =
            lock::with_exclusive_access(&self.path, || self.record_locked(agent, amount, now_epoch));
        if let Err(err) = written {
            self.journal.append_at(
                "ledger_write_error",
                &format!("failed to persist usage for {agent}: {err:#}"),
                now_epoch,
            );
            warn::emit(WarnEvent {
                code: "LEDGER_WRITE_FAILED",
                component: "ledger",
                action: "record",
                path: &self.path.display().to_string(),
                fallback: "usage-dropped",
                err: &format!("{err:#}"),
            });
        }
    }

    fn record_locked(&self, agent: &str, amount: u64, now_epoch: u64) -> Result<()> {
        let mut record = match integrity::load_bounded(&self.path, MAX_LEDGER_BYTES, now_epoch) {
            LoadOutcome::Missing => UsageRecord::started_at(now_epoch),
            LoadOutcome::Loaded(record) => record,
            LoadOutcome::Invalid(failure) => {
                self.journal.append_at(
                    "ledger_reset",
                    &format!("{}: {failure}", failure.kind().as_str()),
                    now_epoch,
                );
                UsageRecord::started_at(now_epoch)
            }
        };

        record.apply(agent, amount, now_epoch);
        let eviction = record.enforce_bounds();
        if eviction.agents > 0 {
            self.journal.append_at(
                "agent_cleanup",
                &format!("evicted {} low-usage agents", eviction.agents),
                now_epoch,
            );
        }
        if eviction.phases > 0 {
            self.journal.append_at(
                "phase_cleanup",
                &format!("evicted {} low-usage phases", eviction.phases),
                now_epoch,
            );
        }

        let bytes = fit_within_bound(&mut record);
        write_atomic(&self.path, &bytes)
    }

    /// Current ledger contents; all-zero when absent or unreadable. Never
    /// modifies the file, so repeated reads agree.
    pub fn read(&self) -> UsageRecord {
        match integrity::inspect_bounded(&self.path, MAX_LEDGER_BYTES) {
            LoadOutcome::Loaded(mut record) => {
                record.enforce_bounds();
                record
            }
            LoadOutcome::Missing | LoadOutcome::Invalid(_) => UsageRecord::default(),
        }
    }

    pub fn compact(&self) -> CompactOutcome {
        self.compact_at(now_or_zero())
    }

    pub fn compact_at(&self, now_epoch: u64) -> CompactOutcome {
        let outcome =
            lock::with_exclusive_access(&self.path, || integrity::compact(&self.path, now_epoch));
        self.journal
            .append_at("ledger_compacted", outcome.as_str(), now_epoch);
        outcome
    }
}

/// Halve the agent buckets until the serialized form fits the file bound.
fn fit_within_bound(record: &mut UsageRecord) -> Vec<u8> {
    let mut bytes = record.to_compact_bytes();
    while bytes.len() as u64 > MAX_LEDGER_BYTES && !record.by_agent.is_empty() {
        let keep = record.by_agent.len() / 2;
        retain_top(&mut record.by_agent, keep);
        bytes = record.to_compact_bytes();
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::{MAX_AGENT_ENTRIES, MAX_PHASE_ENTRIES, UsageLedger, UsageRecord};
    use crate::state::integrity::MAX_LEDGER_BYTES;
    use crate::state::journal::Journal;
    use std::fs;
    use std::thread;
    use tempfile::{TempDir, tempdir};

    const NOW: u64 = 1_760_000_000;

    fn ledger() -> (TempDir, UsageLedger) {
        let tmp = tempdir().expect("tempdir");
        let journal = Journal::new(tmp.path().join("logs/handler.log"), 1024 * 1024);
        let ledger = UsageLedger::new(tmp.path().join("logs/usage.json"), journal);
        (tmp, ledger)
    }

    #[test]
    fn read_without_file_is_zeroed() {
        let (_tmp, ledger) = ledger();
        assert_eq!(ledger.read(), UsageRecord::default());
    }

    #[test]
    fn concurrent_writers_lose_no_updates() {
        let (_tmp, ledger) = ledger();
        let writers: Vec<_> = (0..8)
            .map(|t| {
                let ledger = ledger.clone();
                thread::spawn(move || {
                    for _ in 0..25 {
                        ledger.record_at(&format!("agent-{t}"), 1, NOW);
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().expect("writer thread");
        }

        let record = ledger.read();
        assert_eq!(record.total, 200);
        assert_eq!(record.by_agent.len(), 8);
        assert!(record.by_agent.values().all(|count| *count == 25));
    }

    #[test]
    fn two_agents_accumulate() {
        let (_tmp, ledger) = ledger();
        ledger.record_at("agent-a", 100, NOW);
        ledger.record_at("agent-b", 50, NOW + 5);

        let record = ledger.read();
        assert_eq!(record.total, 150);
        assert_eq!(record.by_agent.get("agent-a"), Some(&100));
        assert_eq!(record.by_agent.get("agent-b"), Some(&50));
        assert_eq!(record.by_agent.len(), 2);
        assert!(record.by_phase.is_empty());
        assert_eq!(record.session_start, NOW);
        assert_eq!(record.last_update, NOW + 5);
    }

    #[test]
    fn total_equals_sum_of_amounts() {
        let (_tmp, ledger) = ledger();
        let amounts = [0, 7, 13, 1_000, 42, 0, 9];
        for (i, amount) in amounts.iter().enumerate() {
            ledger.record_at(&format!("agent-{}", i % 3), *amount, NOW + i as u64);
        }
        assert_eq!(ledger.read().total, amounts.iter().sum::<u64>());
    }

    #[test]
    fn mapped_agents_feed_phase_buckets() {
        let (_tmp, ledger) = ledger();
        ledger.record_at("waypoint-captain", 30, NOW);
        ledger.record_at("waypoint-captain", 12, NOW);
        ledger.record_at("waypoint-coder", 5, NOW);
        let record = ledger.read();
        assert_eq!(record.by_phase.get("coordination"), Some(&42));
        assert_eq!(record.by_phase.get("phase6_execution_bridge"), Some(&5));
        assert_eq!(
            record.most_expensive_phase(),
            Some(("coordination", 42))
        );
    }

    #[test]
    fn fifty_first_agent_evicts_smallest_bucket() {
        let (_tmp, ledger) = ledger();
        for i in 1..=51u64 {
            ledger.record_at(&format!("agent-{i}"), i, NOW);
        }
        let record = ledger.read();
        assert_eq!(record.by_agent.len(), MAX_AGENT_ENTRIES);
        assert!(!record.by_agent.contains_key("agent-1"));
        assert!(record.by_agent.contains_key("agent-51"));
        assert_eq!(record.total, 1326);
    }

    #[test]
    fn phase_buckets_stay_bounded() {
        let (_tmp, ledger) = ledger();
        let agents = [
            "waypoint-captain",
            "waypoint-knowledge-query",
            "waypoint-pattern-apply",
            "waypoint-doc-planning",
            "waypoint-data-flow",
            "waypoint-gap-analysis",
            "waypoint-enhanced-analysis",
            "waypoint-cross-reference",
            "waypoint-coder",
        ];
        for (i, agent) in agents.iter().enumerate() {
            ledger.record_at(agent, (i as u64 + 1) * 10, NOW);
        }
        let record = ledger.read();
        assert_eq!(record.by_phase.len(), MAX_PHASE_ENTRIES);
        assert!(!record.by_phase.contains_key("coordination"));
        assert_eq!(record.total, (1..=9).map(|i| i * 10).sum::<u64>());
    }

    #[test]
    fn invalid_content_resets_before_recording() {
        let (_tmp, ledger) = ledger();
        fs::create_dir_all(ledger.path().parent().expect("parent")).expect("mkdir");
        fs::write(ledger.path(), "]]] definitely not a ledger").expect("write");

        ledger.record_at("x", 10, NOW);
        let record = ledger.read();
        assert_eq!(record.total, 10);
        assert_eq!(record.by_agent.get("x"), Some(&10));
    }

    #[test]
    fn oversized_file_recovers_on_next_record() {
        let (_tmp, ledger) = ledger();
        fs::create_dir_all(ledger.path().parent().expect("parent")).expect("mkdir");
        fs::write(ledger.path(), "x".repeat(MAX_LEDGER_BYTES as usize + 10)).expect("write");

        ledger.record_at("x", 10, NOW);
        assert_eq!(ledger.read().total, 10);
        assert!(fs::metadata(ledger.path()).expect("meta").len() <= MAX_LEDGER_BYTES);
    }

    #[test]
    fn read_is_idempotent() {
        let (_tmp, ledger) = ledger();
        ledger.record_at("agent-a", 3, NOW);
        assert_eq!(ledger.read(), ledger.read());

        fs::write(ledger.path(), "garbage").expect("write");
        assert_eq!(ledger.read(), ledger.read());
    }

    #[test]
    fn persisted_form_is_compact_and_bounded() {
        let (_tmp, ledger) = ledger();
        let long_name = "n".repeat(10_000);
        for i in 0..60u64 {
            ledger.record_at(&format!("{i}-{long_name}"), i, NOW);
        }
        let raw = fs::read_to_string(ledger.path()).expect("read");
        assert!(!raw.contains('\n'));
        assert!(raw.len() as u64 <= MAX_LEDGER_BYTES);
        let record = ledger.read();
        assert!(record.by_agent.len() <= MAX_AGENT_ENTRIES);
        assert!(record.by_agent.keys().all(|k| k.chars().count() <= 128));
    }

    #[test]
    fn journal_records_reset_and_eviction() {
        let (tmp, ledger) = ledger();
        fs::create_dir_all(ledger.path().parent().expect("parent")).expect("mkdir");
        fs::write(ledger.path(), "{").expect("write");
        ledger.record_at("x", 1, NOW);
        for i in 0..51u64 {
            ledger.record_at(&format!("a{i}"), i + 2, NOW);
        }
        let journal = Journal::new(tmp.path().join("logs/handler.log"), 1024 * 1024);
        let actions: Vec<String> = journal.tail(100).into_iter().map(|e| e.action).collect();
        assert!(actions.iter().any(|a| a == "ledger_reset"));
        assert!(actions.iter().any(|a| a == "agent_cleanup"));
    }
}
