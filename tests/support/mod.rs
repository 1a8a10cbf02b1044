use assert_cmd::Command;
use std::fs;
use std::path::Path;

/// `waypoint` rooted at `home`, isolated from the caller's environment.
pub fn waypoint(home: &Path) -> Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("waypoint");
    cmd.current_dir(home)
        .env("WAYPOINT_HOME", home)
        .env("WAYPOINT_CONFIG_PATH", home.join("no-config.toml"))
        .env_remove("WAYPOINT_STATE_DIR")
        .env_remove("WAYPOINT_DOCS_DIR")
        .env_remove("WAYPOINT_QUERY_BIN")
        .env_remove("WAYPOINT_CACHE_TTL_SECS")
        .env_remove("WAYPOINT_QUERY_TIMEOUT_SECS")
        .env_remove("WAYPOINT_QUERY_MEMORY_MB")
        .env_remove("WAYPOINT_JOURNAL_MAX_BYTES")
        .env_remove("WAYPOINT_AGENT_PREFIX");
    cmd
}

#[allow(dead_code)]
pub fn write_script(path: &Path, body: &str) {
    fs::write(path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms).expect("chmod");
    }
}
