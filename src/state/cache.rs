//! Content-addressed TTL cache for knowledge query results.
//!
//! One file per digest key. The file is a small binary frame:
//! `WPC1 | created_at: u64 LE | len: u32 LE | payload JSON`.

use crate::error::QueryFailure;
use crate::state::journal::Journal;
use crate::state::paths::StatePaths;
use crate::state::util::{now_or_zero, write_atomic};
use crate::state::worker::{QueryRequest, QueryRunner};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const FRAME_MAGIC: &[u8; 4] = b"WPC1";
const FRAME_HEADER_LEN: usize = 4 + 8 + 4;
const ENTRY_EXTENSION: &str = "bin";

/// Digest of the normalized description and the sorted, deduplicated
/// keyword set.
pub fn cache_key(description: &str, keywords: &[String]) -> String {
    let description = description.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut keywords: Vec<String> = keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect();
    keywords.sort();
    keywords.dedup();

    let mut hasher = Sha256::new();
    hasher.update(description.to_lowercase().as_bytes());
    hasher.update([0u8]);
    for keyword in &keywords {
        hasher.update(keyword.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub created_at: u64,
    pub payload: Value,
}

pub fn encode_entry(entry: &CacheEntry) -> Result<Vec<u8>, serde_json::Error> {
    let body = serde_json::to_vec(&entry.payload)?;
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    out.extend_from_slice(FRAME_MAGIC);
    out.extend_from_slice(&entry.created_at.to_le_bytes());
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// `None` for anything that is not a complete, well-formed frame.
pub fn decode_entry(raw: &[u8]) -> Option<CacheEntry> {
    if raw.len() < FRAME_HEADER_LEN || &raw[..4] != FRAME_MAGIC {
        return None;
    }
    let created_at = u64::from_le_bytes(raw[4..12].try_into().ok()?);
    let len = u32::from_le_bytes(raw[12..16].try_into().ok()?) as usize;
    let body = raw.get(FRAME_HEADER_LEN..)?;
    if body.len() != len {
        return None;
    }
    let payload = serde_json::from_slice(body).ok()?;
    Some(CacheEntry {
        created_at,
        payload,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryResolution {
    pub payload: Value,
    pub from_cache: bool,
}

#[derive(Debug, Clone)]
pub struct QueryCache {
    dir: PathBuf,
    ttl_secs: u64,
    journal: Journal,
}

impl QueryCache {
    pub fn new(dir: impl Into<PathBuf>, ttl_secs: u64, journal: Journal) -> Self {
        Self {
            dir: dir.into(),
            ttl_secs,
            journal,
        }
    }

    pub fn for_paths(paths: &StatePaths, ttl_secs: u64, journal: Journal) -> Self {
        Self::new(paths.cache_dir.clone(), ttl_secs, journal)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn entry_path(&self, description: &str, keywords: &[String]) -> PathBuf {
        self.dir
            .join(format!("{}.{ENTRY_EXTENSION}", cache_key(description, keywords)))
    }

    pub fn get(&self, description: &str, keywords: &[String]) -> Option<Value> {
        self.get_at(description, keywords, now_or_zero())
    }

    pub fn get_at(&self, description: &str, keywords: &[String], now_epoch: u64) -> Option<Value> {
        let path = self.entry_path(description, keywords);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return None,
            Err(err) => {
                self.journal.append_at(
                    "cache_read_error",
                    &format!("{}: {err}", path.display()),
                    now_epoch,
                );
                return None;
            }
        };

        match decode_entry(&raw) {
            Some(entry) if now_epoch.saturating_sub(entry.created_at) < self.ttl_secs => {
                self.journal
                    .append_at("cache_hit", &file_label(&path), now_epoch);
                Some(entry.payload)
            }
            Some(_) => {
                self.discard(&path, "cache_expired", now_epoch);
                None
            }
            None => {
                self.discard(&path, "cache_corrupt", now_epoch);
                None
            }
        }
    }

    pub fn put(&self, description: &str, keywords: &[String], payload: &Value) {
        self.put_at(description, keywords, payload, now_or_zero());
    }

    pub fn put_at(&self, description: &str, keywords: &[String], payload: &Value, now_epoch: u64) {
        let path = self.entry_path(description, keywords);
        let entry = CacheEntry {
            created_at: now_epoch,
            payload: payload.clone(),
        };
        let result = encode_entry(&entry)
            .map_err(anyhow::Error::from)
            .and_then(|bytes| write_atomic(&path, &bytes));
        match result {
            Ok(()) => self
                .journal
                .append_at("cache_saved", &file_label(&path), now_epoch),
            Err(err) => self.journal.append_at(
                "cache_write_error",
                &format!("{}: {err:#}", path.display()),
                now_epoch,
            ),
        }
    }

    /// Cached payload when fresh; otherwise run the query and store a
    /// successful result. A failed query leaves the cache as it was.
    pub fn resolve(
        &self,
        description: &str,
        keywords: &[String],
        runner: &dyn QueryRunner,
    ) -> Result<QueryResolution, QueryFailure> {
        if let Some(payload) = self.get(description, keywords) {
            return Ok(QueryResolution {
                payload,
                from_cache: true,
            });
        }

        let request = QueryRequest::new(description, keywords);
        match runner.run(&request) {
            Ok(payload) => {
                self.put(description, keywords, &payload);
                Ok(QueryResolution {
                    payload,
                    from_cache: false,
                })
            }
            Err(failure) => {
                self.journal.append(
                    "knowledge_query_failed",
                    &format!("{}: {failure}", failure.status()),
                );
                Err(failure)
            }
        }
    }

    fn discard(&self, path: &Path, action: &str, now_epoch: u64) {
        match fs::remove_file(path) {
            Ok(()) => self.journal.append_at(action, &file_label(path), now_epoch),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => self.journal.append_at(
                "cache_cleanup_error",
                &format!("{}: {err}", path.display()),
                now_epoch,
            ),
        }
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}
