//! Heuristic "is a phased session running right now" verdict.
//!
//! Each signal is an independent predicate over on-disk state. They are
//! evaluated in a fixed order and the first one that holds decides. Nothing
//! is cached between calls.

use crate::state::config::ActivityConfig;
use crate::state::integrity::{self, LoadOutcome, MAX_LEDGER_BYTES};
use crate::state::journal::Journal;
use crate::state::paths::StatePaths;
use crate::state::session::SessionStore;
use crate::state::util::{modified_epoch_secs, now_or_zero, within_window};
use std::fs;

/// Journal actions that count as evidence of an ongoing session.
pub const ACTIVITY_TAGS: &[&str] = &[
    "methodology_required",
    "agent_active",
    "token_tracking",
    "prompt_routing",
    "phase_update",
    "session_complete",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivitySignal {
    StatusMarker,
    SessionMarker,
    JournalActivity,
    RecentDocs,
    LedgerActivity,
}

impl ActivitySignal {
    pub const ORDER: [ActivitySignal; 5] = [
        Self::StatusMarker,
        Self::SessionMarker,
        Self::JournalActivity,
        Self::RecentDocs,
        Self::LedgerActivity,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::StatusMarker => "status-marker",
            Self::SessionMarker => "session-marker",
            Self::JournalActivity => "journal-activity",
            Self::RecentDocs => "recent-docs",
            Self::LedgerActivity => "ledger-activity",
        }
    }
}

pub struct ActivitySensor<'a> {
    paths: &'a StatePaths,
    cfg: &'a ActivityConfig,
    sessions: SessionStore,
    journal: Journal,
}

impl<'a> ActivitySensor<'a> {
    pub fn new(paths: &'a StatePaths, cfg: &'a ActivityConfig, journal: Journal) -> Self {
        Self {
            paths,
            cfg,
            sessions: SessionStore::for_paths(paths, journal.clone()),
            journal,
        }
    }

    pub fn is_active(&self) -> bool {
        self.verdict_at(now_or_zero()).is_some()
    }

    /// First signal that holds at `now_epoch`, or `None` when inactive.
    pub fn verdict_at(&self, now_epoch: u64) -> Option<ActivitySignal> {
        ActivitySignal::ORDER
            .into_iter()
            .find(|signal| self.signal_holds(*signal, now_epoch))
    }

    pub fn signal_holds(&self, signal: ActivitySignal, now_epoch: u64) -> bool {
        match signal {
            ActivitySignal::StatusMarker => self.sessions.status_marker_present(),
            ActivitySignal::SessionMarker => self.session_marker_fresh(now_epoch),
            ActivitySignal::JournalActivity => self.journal_shows_activity(now_epoch),
            ActivitySignal::RecentDocs => self.docs_recently_modified(now_epoch),
            ActivitySignal::LedgerActivity => self.ledger_shows_activity(now_epoch),
        }
    }

    fn session_marker_fresh(&self, now_epoch: u64) -> bool {
        let Some(marker) = self.sessions.load() else {
            return false;
        };
        within_window(marker.session_start, now_epoch, self.cfg.session_window_secs)
            || within_window(marker.last_activity, now_epoch, self.cfg.activity_window_secs)
    }

    fn journal_shows_activity(&self, now_epoch: u64) -> bool {
        self.journal
            .tail(self.cfg.journal_scan_entries)
            .iter()
            .filter(|entry| ACTIVITY_TAGS.contains(&entry.action.as_str()))
            .filter_map(|entry| entry.epoch_secs())
            .any(|ts| within_window(ts, now_epoch, self.cfg.activity_window_secs))
    }

    fn docs_recently_modified(&self, now_epoch: u64) -> bool {
        let Ok(entries) = fs::read_dir(&self.paths.docs_dir) else {
            return false;
        };
        entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter(|path| path.extension().is_some_and(|ext| ext == "md"))
            .filter_map(|path| modified_epoch_secs(&path))
            .any(|ts| within_window(ts, now_epoch, self.cfg.activity_window_secs))
    }

    fn ledger_shows_activity(&self, now_epoch: u64) -> bool {
        let LoadOutcome::Loaded(record) =
            integrity::inspect_bounded(&self.paths.ledger_file, MAX_LEDGER_BYTES)
        else {
            return false;
        };
        if record.last_update > 0
            && within_window(record.last_update, now_epoch, self.cfg.activity_window_secs)
        {
            return true;
        }
        let prefix = self.cfg.agent_prefix.as_str();
        !prefix.is_empty() && record.by_agent.keys().any(|agent| agent.starts_with(prefix))
    }
}
