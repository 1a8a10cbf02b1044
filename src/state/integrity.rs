//! Size and shape checks for the persisted ledger.
//!
//! Every branch here ends in either a valid bounded file or no file at all;
//! nothing in this module returns an error to its caller.

use crate::error::StateFailure;
use crate::state::ledger::{MAX_AGENT_NAME_CHARS, UsageRecord};
use crate::state::util::write_atomic;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

pub const MAX_LEDGER_BYTES: u64 = 256 * 1024;
pub const COMPACT_TOTAL_CAP: u64 = 1_000_000;
pub const COMPACT_AGENT_KEEP: usize = 5;
pub const COMPACT_PHASE_KEEP: usize = 8;
// Compaction streams at most this much of an oversized file before giving up
// and deleting it.
const COMPACT_READ_LIMIT: u64 = 4 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Missing,
    Loaded(UsageRecord),
    Invalid(StateFailure),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactOutcome {
    Compacted,
    Removed,
    Absent,
}

impl CompactOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Compacted => "compacted",
            Self::Removed => "removed",
            Self::Absent => "absent",
        }
    }
}

/// Keep the `keep` largest buckets, ties broken by name. Returns how many
/// buckets were dropped.
pub fn retain_top(map: &mut BTreeMap<String, u64>, keep: usize) -> usize {
    if map.len() <= keep {
        return 0;
    }
    let mut entries: Vec<(String, u64)> = std::mem::take(map).into_iter().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let dropped = entries.len() - keep;
    entries.truncate(keep);
    *map = entries.into_iter().collect();
    dropped
}

/// Load the ledger at `path`, compacting it when the file is over `max_bytes`.
pub fn load_bounded(path: &Path, max_bytes: u64, now_epoch: u64) -> LoadOutcome {
    let outcome = inspect_bounded(path, max_bytes);
    if matches!(outcome, LoadOutcome::Invalid(StateFailure::Oversize { .. }))
        && on_disk_len(path).is_some_and(|len| len > max_bytes)
    {
        compact(path, now_epoch);
    }
    outcome
}

/// Same checks as [`load_bounded`] but never touches the file.
pub fn inspect_bounded(path: &Path, max_bytes: u64) -> LoadOutcome {
    let found = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == ErrorKind::NotFound => return LoadOutcome::Missing,
        Err(err) => return LoadOutcome::Invalid(StateFailure::Io(err.to_string())),
    };
    if found > max_bytes {
        return LoadOutcome::Invalid(StateFailure::Oversize {
            found,
            limit: max_bytes,
        });
    }

    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return LoadOutcome::Missing,
        Err(err) => return LoadOutcome::Invalid(StateFailure::Io(err.to_string())),
    };
    let record: UsageRecord = match serde_json::from_slice(&raw) {
        Ok(record) => record,
        Err(err) => return LoadOutcome::Invalid(StateFailure::Parse(err.to_string())),
    };

    let reserialized = record.to_compact_bytes().len() as u64;
    if reserialized > max_bytes {
        return LoadOutcome::Invalid(StateFailure::Oversize {
            found: reserialized,
            limit: max_bytes,
        });
    }
    LoadOutcome::Loaded(record)
}

fn on_disk_len(path: &Path) -> Option<u64> {
    fs::metadata(path).ok().map(|meta| meta.len())
}

/// Shrink the ledger at `path` to its essentials, or delete it when it cannot
/// be read back.
pub fn compact(path: &Path, now_epoch: u64) -> CompactOutcome {
    if !path.exists() {
        return CompactOutcome::Absent;
    }

    let parsed = File::open(path).ok().and_then(|file| {
        let reader = BufReader::new(file.take(COMPACT_READ_LIMIT));
        serde_json::from_reader::<_, UsageRecord>(reader).ok()
    });
    let Some(record) = parsed else {
        return remove(path);
    };

    let mut compacted = UsageRecord {
        total: record.total.min(COMPACT_TOTAL_CAP),
        by_agent: record.by_agent,
        by_phase: record.by_phase,
        session_start: now_epoch,
        last_update: now_epoch,
    };
    retain_top(&mut compacted.by_agent, COMPACT_AGENT_KEEP);
    retain_top(&mut compacted.by_phase, COMPACT_PHASE_KEEP);
    compacted.by_agent = clip_names(compacted.by_agent);
    compacted.by_phase = clip_names(compacted.by_phase);

    let bytes = compacted.to_compact_bytes();
    if bytes.is_empty() || bytes.len() as u64 > MAX_LEDGER_BYTES {
        return remove(path);
    }
    match write_atomic(path, &bytes) {
        Ok(()) => CompactOutcome::Compacted,
        Err(_) => remove(path),
    }
}

/// Cap bucket names at the ledger's name length; clipped duplicates merge.
fn clip_names(map: BTreeMap<String, u64>) -> BTreeMap<String, u64> {
    let mut out = BTreeMap::new();
    for (name, count) in map {
        let name: String = name.chars().take(MAX_AGENT_NAME_CHARS).collect();
        let slot = out.entry(name).or_insert(0u64);
        *slot = slot.saturating_add(count);
    }
    out
}

fn remove(path: &Path) -> CompactOutcome {
    match fs::remove_file(path) {
        Ok(()) => CompactOutcome::Removed,
        Err(err) if err.kind() == ErrorKind::NotFound => CompactOutcome::Absent,
        // Nothing left to try; the next load resets anyway.
        Err(_) => CompactOutcome::Removed,
    }
}
