use crate::state::paths::StatePaths;
use crate::state::util::now_or_zero;
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const JOURNAL_VERSION: &str = "1";
pub const DEFAULT_JOURNAL_MAX_BYTES: u64 = 2 * 1024 * 1024;
pub const BACKUP_SUFFIX: &str = ".old";
const TAIL_READ_BYTES: u64 = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub timestamp: String,
    pub action: String,
    pub details: String,
    pub version: String,
}

impl JournalEntry {
    fn at(action: &str, details: &str, now_epoch: u64) -> Self {
        Self {
            timestamp: format_timestamp(now_epoch),
            action: action.to_string(),
            details: details.to_string(),
            version: JOURNAL_VERSION.to_string(),
        }
    }

    pub fn epoch_secs(&self) -> Option<u64> {
        parse_timestamp(&self.timestamp)
    }
}

pub fn format_timestamp(epoch_secs: u64) -> String {
    let dt = Utc
        .timestamp_opt(epoch_secs as i64, 0)
        .single()
        .unwrap_or_else(Utc::now);
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_timestamp(raw: &str) -> Option<u64> {
    let parsed = DateTime::parse_from_rfc3339(raw.trim()).ok()?;
    u64::try_from(parsed.timestamp()).ok()
}

/// Append-only action log. Every write path swallows its own failures.
#[derive(Debug, Clone)]
pub struct Journal {
    path: PathBuf,
    max_bytes: u64,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            path: path.into(),
            max_bytes,
        }
    }

    pub fn for_paths(paths: &StatePaths, max_bytes: u64) -> Self {
        Self::new(paths.journal_file.clone(), max_bytes)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> PathBuf {
        backup_path_for(&self.path)
    }

    pub fn append(&self, action: &str, details: &str) {
        self.append_at(action, details, now_or_zero());
    }

    pub fn append_at(&self, action: &str, details: &str, now_epoch: u64) {
        let _ = self.try_append(&JournalEntry::at(action, details, now_epoch), now_epoch);
    }

    fn try_append(&self, entry: &JournalEntry, now_epoch: u64) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        self.rotate_if_needed(now_epoch);

        let line = format!("{}\n", serde_json::to_string(entry)?);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    fn rotate_if_needed(&self, now_epoch: u64) {
        let Ok(meta) = fs::metadata(&self.path) else {
            return;
        };
        if meta.len() <= self.max_bytes {
            return;
        }

        // `rename` replaces an existing backup file; a failed rename leaves it.
        let marker = match fs::rename(&self.path, self.backup_path()) {
            Ok(()) => JournalEntry::at("log_rotated", "rotated journal file", now_epoch),
            Err(err) => JournalEntry::at(
                "log_truncated",
                &format!("rotation failed ({err}); truncated journal file"),
                now_epoch,
            ),
        };
        let _ = write_fresh(&self.path, &marker);
    }

    /// Last `n` well-formed entries, oldest first. Malformed lines are skipped.
    pub fn tail(&self, n: usize) -> Vec<JournalEntry> {
        if n == 0 {
            return Vec::new();
        }
        let Ok(raw) = read_tail_text(&self.path, TAIL_READ_BYTES) else {
            return Vec::new();
        };
        let lines: Vec<&str> = raw.lines().filter(|l| !l.trim().is_empty()).collect();
        let start = lines.len().saturating_sub(n);
        lines[start..]
            .iter()
            .filter_map(|line| serde_json::from_str::<JournalEntry>(line.trim()).ok())
            .collect()
    }
}

fn backup_path_for(path: &Path) -> PathBuf {
    let mut raw = path.as_os_str().to_os_string();
    raw.push(BACKUP_SUFFIX);
    PathBuf::from(raw)
}

fn write_fresh(path: &Path, entry: &JournalEntry) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(format!("{}\n", serde_json::to_string(entry)?).as_bytes())?;
    Ok(())
}

fn read_tail_text(path: &Path, max_bytes: u64) -> Result<String> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    let start = len.saturating_sub(max_bytes);
    file.seek(SeekFrom::Start(start))?;
    let mut buf = Vec::with_capacity((len - start) as usize);
    file.read_to_end(&mut buf)?;
    let text = String::from_utf8_lossy(&buf).into_owned();
    if start == 0 {
        return Ok(text);
    }
    // Drop the partial first line.
    Ok(match text.split_once('\n') {
        Some((_, rest)) => rest.to_string(),
        None => String::new(),
    })
}
