pub mod active;
pub mod compact;
pub mod hook;
pub mod query;
pub mod record;
pub mod report;
pub mod scan_knowledge;
pub mod session;
pub mod status;
pub mod usage;

use anyhow::Result;
use serde::Serialize;

use crate::state::activity::ActivitySensor;
use crate::state::cache::QueryCache;
use crate::state::config::{self, WaypointConfig};
use crate::state::journal::Journal;
use crate::state::ledger::UsageLedger;
use crate::state::paths::{StatePaths, resolve_paths};
use crate::state::session::SessionStore;

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }
}

/// Resolved paths, effective config and the shared journal for one invocation.
pub struct StateContext {
    pub paths: StatePaths,
    pub config: WaypointConfig,
    pub journal: Journal,
}

impl StateContext {
    pub fn load() -> Result<Self> {
        let paths = resolve_paths()?;
        let config = config::load_config(&paths)?;
        Ok(Self::with_config(paths, config))
    }

    /// Like [`StateContext::load`] but an invalid config file falls back to
    /// defaults instead of failing.
    pub fn load_lenient() -> Result<Self> {
        let paths = resolve_paths()?;
        let config = config::load_config_or_default(&paths);
        Ok(Self::with_config(paths, config))
    }

    pub fn with_config(paths: StatePaths, config: WaypointConfig) -> Self {
        let journal = Journal::for_paths(&paths, config.journal.max_bytes);
        Self {
            paths,
            config,
            journal,
        }
    }

    pub fn ledger(&self) -> UsageLedger {
        UsageLedger::for_paths(&self.paths, self.journal.clone())
    }

    pub fn sessions(&self) -> SessionStore {
        SessionStore::for_paths(&self.paths, self.journal.clone())
    }

    pub fn cache(&self) -> QueryCache {
        QueryCache::for_paths(&self.paths, self.config.cache.ttl_secs, self.journal.clone())
    }

    pub fn sensor(&self) -> ActivitySensor<'_> {
        ActivitySensor::new(&self.paths, &self.config.activity, self.journal.clone())
    }
}
