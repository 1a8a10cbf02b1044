mod support;

use predicates::str::contains;
use std::fs;
use tempfile::tempdir;

#[test]
fn record_then_usage_reports_totals() {
    let tmp = tempdir().expect("tempdir");

    support::waypoint(tmp.path())
        .args(["record", "--agent", "agent-a", "--amount", "100"])
        .assert()
        .success();
    support::waypoint(tmp.path())
        .args(["record", "--agent", "agent-b", "--amount", "50"])
        .assert()
        .success()
        .stdout(contains("total=150"));

    support::waypoint(tmp.path())
        .arg("usage")
        .assert()
        .success()
        .stdout(contains("total=150"))
        .stdout(contains("agent.agent-a=100"))
        .stdout(contains("agent.agent-b=50"));

    let raw = fs::read_to_string(tmp.path().join(".waypoint/logs/usage.json")).expect("ledger");
    let ledger: serde_json::Value = serde_json::from_str(&raw).expect("json");
    assert_eq!(ledger["total"], 150);
    assert!(!raw.contains('\n'), "ledger is stored compactly");
}

#[test]
fn corrupt_ledger_is_reset_by_next_record() {
    let tmp = tempdir().expect("tempdir");
    let logs = tmp.path().join(".waypoint/logs");
    fs::create_dir_all(&logs).expect("mkdir logs");
    fs::write(logs.join("usage.json"), "{\"total\": \"lots\"").expect("write garbage");

    support::waypoint(tmp.path())
        .arg("status")
        .assert()
        .code(2)
        .stdout(contains("ledger invalid"));

    support::waypoint(tmp.path())
        .args(["record", "--agent", "x", "--amount", "10"])
        .assert()
        .success();
    support::waypoint(tmp.path())
        .arg("usage")
        .assert()
        .success()
        .stdout(contains("total=10"));

    let journal = fs::read_to_string(logs.join("handler.log")).expect("journal");
    assert!(journal.contains("ledger_reset"));
}

#[test]
fn report_names_most_expensive_phase() {
    let tmp = tempdir().expect("tempdir");
    for (agent, amount) in [("waypoint-captain", "40"), ("waypoint-coder", "900")] {
        support::waypoint(tmp.path())
            .args(["record", "--agent", agent, "--amount", amount])
            .assert()
            .success();
    }

    support::waypoint(tmp.path())
        .arg("report")
        .assert()
        .success()
        .stdout(contains("total=940"))
        .stdout(contains("most_expensive_phase=phase6_execution_bridge (900)"));
}

#[test]
fn compact_keeps_total_and_top_agents() {
    let tmp = tempdir().expect("tempdir");
    for i in 1..=8 {
        support::waypoint(tmp.path())
            .args(["record", "--agent", &format!("agent-{i}"), "--amount", &i.to_string()])
            .assert()
            .success();
    }

    support::waypoint(tmp.path())
        .args(["--json", "compact"])
        .assert()
        .success()
        .stdout(contains("outcome=compacted"))
        .stdout(contains("total=36"));

    let raw = fs::read_to_string(tmp.path().join(".waypoint/logs/usage.json")).expect("ledger");
    let ledger: serde_json::Value = serde_json::from_str(&raw).expect("json");
    let agents = ledger["by_agent"].as_object().expect("agents");
    assert_eq!(agents.len(), 5);
    assert!(agents.contains_key("agent-8"));
    assert!(!agents.contains_key("agent-1"));
}

#[test]
fn status_lists_resolved_paths() {
    let tmp = tempdir().expect("tempdir");
    support::waypoint(tmp.path())
        .arg("status")
        .assert()
        .success()
        .stdout(contains("ledger=absent"))
        .stdout(contains("cache.ttl_secs=3600"))
        .stdout(contains("query.command=builtin"));
}

#[test]
fn invalid_config_file_is_a_hard_error_outside_hooks() {
    let tmp = tempdir().expect("tempdir");
    let config = tmp.path().join("waypoint.toml");
    fs::write(&config, "[cache]\nttl_secs = 0\n").expect("write config");

    support::waypoint(tmp.path())
        .env("WAYPOINT_CONFIG_PATH", &config)
        .arg("usage")
        .assert()
        .code(1)
        .stderr(contains("invalid cache ttl"));
}
