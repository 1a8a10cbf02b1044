use crate::state::journal::Journal;
use crate::state::paths::StatePaths;
use crate::state::util::{now_or_zero, write_atomic};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const SESSION_MARKER_VERSION: &str = "1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMarker {
    pub session_start: u64,
    pub last_activity: u64,
    pub activated: bool,
    pub version: String,
}

impl SessionMarker {
    fn fresh(now_epoch: u64) -> Self {
        Self {
            session_start: now_epoch,
            last_activity: now_epoch,
            activated: true,
            version: SESSION_MARKER_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchOutcome {
    Created,
    Updated,
    Recreated,
    Failed,
}

/// Owner of the session marker and the status marker.
#[derive(Debug, Clone)]
pub struct SessionStore {
    marker_path: PathBuf,
    status_path: PathBuf,
    journal: Journal,
}

impl SessionStore {
    pub fn new(marker_path: PathBuf, status_path: PathBuf, journal: Journal) -> Self {
        Self {
            marker_path,
            status_path,
            journal,
        }
    }

    pub fn for_paths(paths: &StatePaths, journal: Journal) -> Self {
        Self::new(
            paths.session_file.clone(),
            paths.status_file.clone(),
            journal,
        )
    }

    pub fn marker_path(&self) -> &Path {
        &self.marker_path
    }

    pub fn status_path(&self) -> &Path {
        &self.status_path
    }

    /// `None` when the marker is missing or unreadable.
    pub fn load(&self) -> Option<SessionMarker> {
        let raw = fs::read(&self.marker_path).ok()?;
        serde_json::from_slice(&raw).ok()
    }

    pub fn touch(&self) -> TouchOutcome {
        self.touch_at(now_or_zero())
    }

    /// Create the marker on first activity, otherwise bump `last_activity`
    /// while keeping the original `session_start`.
    pub fn touch_at(&self, now_epoch: u64) -> TouchOutcome {
        let (marker, outcome) = match fs::read(&self.marker_path) {
            Ok(raw) => match serde_json::from_slice::<SessionMarker>(&raw) {
                Ok(mut marker) => {
                    marker.last_activity = now_epoch;
                    marker.activated = true;
                    (marker, TouchOutcome::Updated)
                }
                Err(err) => {
                    self.journal.append_at(
                        "session_corruption",
                        &format!("session marker unreadable, recreating: {err}"),
                        now_epoch,
                    );
                    (SessionMarker::fresh(now_epoch), TouchOutcome::Recreated)
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                (SessionMarker::fresh(now_epoch), TouchOutcome::Created)
            }
            Err(err) => {
                self.journal.append_at(
                    "session_read_error",
                    &format!("failed to read session marker: {err}"),
                    now_epoch,
                );
                (SessionMarker::fresh(now_epoch), TouchOutcome::Recreated)
            }
        };

        match self.write_marker(&marker) {
            Ok(()) => {
                self.journal
                    .append_at("session_tracking", "session marker updated", now_epoch);
                outcome
            }
            Err(err) => {
                self.journal.append_at(
                    "session_write_error",
                    &format!("failed to write session marker: {err:#}"),
                    now_epoch,
                );
                TouchOutcome::Failed
            }
        }
    }

    fn write_marker(&self, marker: &SessionMarker) -> Result<()> {
        let data = serde_json::to_string_pretty(marker)?;
        write_atomic(&self.marker_path, format!("{data}\n").as_bytes())
    }

    pub fn status_marker_present(&self) -> bool {
        self.status_path.exists()
    }

    pub fn write_status_marker(&self, summary: &str) -> Result<()> {
        if let Some(parent) = self.status_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&self.status_path, format!("{summary}\n"))
            .with_context(|| format!("failed to write {}", self.status_path.display()))?;
        self.journal.append("phase_update", summary);
        Ok(())
    }

    /// Returns whether a status marker was present.
    pub fn clear_status_marker(&self) -> Result<bool> {
        match fs::remove_file(&self.status_path) {
            Ok(()) => {
                self.journal
                    .append("session_complete", "status marker removed");
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err)
                .with_context(|| format!("failed to remove {}", self.status_path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{SessionStore, TouchOutcome};
    use crate::state::journal::Journal;
    use crate::state::paths::StatePaths;
    use std::fs;
    use tempfile::{TempDir, tempdir};

    const NOW: u64 = 1_760_000_000;

    fn store() -> (TempDir, SessionStore) {
        let tmp = tempdir().expect("tempdir");
        let paths = StatePaths::under(tmp.path());
        let journal = Journal::for_paths(&paths, 1024 * 1024);
        (tmp, SessionStore::for_paths(&paths, journal))
    }

    #[test]
    fn first_touch_creates_marker() {
        let (_tmp, store) = store();
        assert!(store.load().is_none());
        assert_eq!(store.touch_at(NOW), TouchOutcome::Created);
        let marker = store.load().expect("marker");
        assert_eq!(marker.session_start, NOW);
        assert_eq!(marker.last_activity, NOW);
        assert!(marker.activated);
        assert_eq!(marker.version, "1");
    }

    #[test]
    fn later_touch_keeps_session_start() {
        let (_tmp, store) = store();
        store.touch_at(NOW);
        assert_eq!(store.touch_at(NOW + 900), TouchOutcome::Updated);
        let marker = store.load().expect("marker");
        assert_eq!(marker.session_start, NOW);
        assert_eq!(marker.last_activity, NOW + 900);
    }

    #[test]
    fn corrupted_marker_is_recreated() {
        let (_tmp, store) = store();
        fs::create_dir_all(store.marker_path().parent().expect("parent")).expect("mkdir");
        fs::write(store.marker_path(), "[1,2").expect("write");
        assert_eq!(store.touch_at(NOW), TouchOutcome::Recreated);
        assert_eq!(store.load().expect("marker").session_start, NOW);
    }

    #[test]
    fn status_marker_round_trip() {
        let (_tmp, store) = store();
        assert!(!store.status_marker_present());
        store.write_status_marker("phase 1 in progress").expect("write");
        assert!(store.status_marker_present());
        assert!(store.clear_status_marker().expect("clear"));
        assert!(!store.clear_status_marker().expect("clear again"));
    }
}
