use crate::state::journal::DEFAULT_JOURNAL_MAX_BYTES;
use crate::state::paths::StatePaths;
use crate::state::phases::DEFAULT_AGENT_PREFIX;
use crate::state::warn::{self, WarnEvent};
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
    pub session_window_secs: u64,
    pub activity_window_secs: u64,
    pub journal_scan_entries: usize,
    pub agent_prefix: String,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            session_window_secs: 2 * 60 * 60,
            activity_window_secs: 30 * 60,
            journal_scan_entries: 20,
            agent_prefix: DEFAULT_AGENT_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 60 * 60 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub timeout_secs: u64,
    pub memory_limit_mb: u64,
    /// External worker program; the built-in scanner runs when unset.
    pub command: Option<String>,
    pub args: Vec<String>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 5 * 60,
            memory_limit_mb: 256,
            command: None,
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    pub max_bytes: u64,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_JOURNAL_MAX_BYTES,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WaypointConfig {
    pub activity: ActivityConfig,
    pub cache: CacheConfig,
    pub query: QueryConfig,
    pub journal: JournalConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PartialWaypointConfig {
    activity: Option<ActivityConfig>,
    cache: Option<CacheConfig>,
    query: Option<QueryConfig>,
    journal: Option<JournalConfig>,
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn env_opt_string(var: &str) -> Option<String> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => None,
    }
}

fn validate(cfg: &WaypointConfig) -> Result<()> {
    if cfg.activity.activity_window_secs == 0 {
        return Err(anyhow!("invalid activity window: must be >= 1 second"));
    }
    if cfg.activity.session_window_secs < cfg.activity.activity_window_secs {
        return Err(anyhow!(
            "invalid activity windows: require activity_window_secs <= session_window_secs"
        ));
    }
    if cfg.activity.journal_scan_entries == 0 {
        return Err(anyhow!("invalid journal scan depth: must be >= 1"));
    }
    if cfg.cache.ttl_secs == 0 {
        return Err(anyhow!("invalid cache ttl: must be >= 1 second"));
    }
    if cfg.query.timeout_secs == 0 {
        return Err(anyhow!("invalid query timeout: must be >= 1 second"));
    }
    if cfg.journal.max_bytes < 1024 {
        return Err(anyhow!("invalid journal bound: must be >= 1024 bytes"));
    }
    if cfg.query.command.as_deref().is_some_and(|c| c.trim().is_empty()) {
        return Err(anyhow!("invalid query command: cannot be empty"));
    }
    Ok(())
}

pub fn resolve_config_path(paths: &StatePaths) -> Option<PathBuf> {
    if let Some(custom) = env_opt_string("WAYPOINT_CONFIG_PATH") {
        return Some(PathBuf::from(custom));
    }
    let local = paths.state_dir.join("waypoint.toml");
    if local.exists() {
        return Some(local);
    }
    Some(dirs::config_dir()?.join("waypoint").join("waypoint.toml"))
}

fn merge_file_config(base: &mut WaypointConfig, path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let raw = fs::read_to_string(path)?;
    merge_toml(base, &raw)
        .map_err(|err| anyhow!("failed to parse waypoint config {}: {err}", path.display()))
}

fn merge_toml(base: &mut WaypointConfig, raw: &str) -> Result<()> {
    let parsed: PartialWaypointConfig = toml::from_str(raw)?;
    if let Some(activity) = parsed.activity {
        base.activity = activity;
    }
    if let Some(cache) = parsed.cache {
        base.cache = cache;
    }
    if let Some(query) = parsed.query {
        base.query = query;
    }
    if let Some(journal) = parsed.journal {
        base.journal = journal;
    }
    Ok(())
}

fn apply_env_overrides(cfg: &mut WaypointConfig) {
    cfg.cache.ttl_secs = env_or_u64("WAYPOINT_CACHE_TTL_SECS", cfg.cache.ttl_secs);
    cfg.query.timeout_secs = env_or_u64("WAYPOINT_QUERY_TIMEOUT_SECS", cfg.query.timeout_secs);
    cfg.query.memory_limit_mb = env_or_u64("WAYPOINT_QUERY_MEMORY_MB", cfg.query.memory_limit_mb);
    if let Some(bin) = env_opt_string("WAYPOINT_QUERY_BIN") {
        cfg.query.command = Some(bin);
    }
    cfg.journal.max_bytes = env_or_u64("WAYPOINT_JOURNAL_MAX_BYTES", cfg.journal.max_bytes);
    cfg.activity.agent_prefix = env_or_string("WAYPOINT_AGENT_PREFIX", &cfg.activity.agent_prefix);
}

pub fn load_config(paths: &StatePaths) -> Result<WaypointConfig> {
    let mut cfg = WaypointConfig::default();
    if let Some(path) = resolve_config_path(paths) {
        merge_file_config(&mut cfg, &path)?;
    }
    apply_env_overrides(&mut cfg);
    validate(&cfg)?;
    Ok(cfg)
}

/// Hook-path variant: a broken config file must not stop the host.
pub fn load_config_or_default(paths: &StatePaths) -> WaypointConfig {
    match load_config(paths) {
        Ok(cfg) => cfg,
        Err(err) => {
            warn::emit(WarnEvent {
                code: "CONFIG_INVALID",
                component: "config",
                action: "load",
                path: &resolve_config_path(paths)
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
                fallback: "defaults",
                err: &format!("{err:#}"),
            });
            WaypointConfig::default()
        }
    }
}
