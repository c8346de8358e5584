//! End-to-end tests of the `testbed` binary.

#[path = "common/mod.rs"]
mod common;

use std::{fs, net::TcpListener};

use assert_cmd::Command;
use common::{SLEEPING_ENTRY_POINT, TestRoot, free_port, is_process_alive, wait_for};
use predicates::prelude::*;

fn testbed(root: &TestRoot) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("testbed"));
    cmd.arg("--root").arg(root.path()).env("RUST_LOG", "info");
    cmd
}

fn recorded_pid(root: &TestRoot) -> Option<u32> {
    fs::read_to_string(root.path().join(".test_server.pid"))
        .ok()
        .and_then(|contents| contents.trim().parse().ok())
}

#[test]
fn status_without_record() {
    let root = TestRoot::new();
    let port = free_port();

    testbed(&root)
        .args(["status", "--no-color", "--port", &port.to_string()])
        .assert()
        .success()
        .stdout(predicate::str::contains("No PID record"))
        .stdout(predicate::str::contains(format!("Port {port}: no listeners")));
}

#[test]
fn status_json_reports_stale_record() {
    let root = TestRoot::new();
    fs::write(root.path().join(".test_server.pid"), "99999\n").unwrap();
    let port = free_port();

    let output = testbed(&root)
        .args(["status", "--json", "--port", &port.to_string()])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["port"], port.get());
    assert_eq!(report["tracked"]["pid"], 99999);
    assert_eq!(report["tracked"]["running"], false);
    assert_eq!(report["listeners"], serde_json::json!([]));
}

#[test]
fn background_start_requires_setup() {
    let root = TestRoot::new();
    fs::remove_dir_all(root.path().join("venv")).unwrap();

    testbed(&root)
        .args(["test_server_bg", "--port", &free_port().to_string()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("testbed setup"));
    assert!(recorded_pid(&root).is_none());
}

#[test]
fn foreground_start_fails_on_busy_port() {
    let root = TestRoot::new();
    root.write_settings("touch launched.txt\n");
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    testbed(&root)
        .args(["test_server", "--port", &port.to_string()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already in use"))
        .stderr(predicate::str::contains(std::process::id().to_string()));
    assert!(!root.path().join("launched.txt").exists());
}

#[test]
fn foreground_start_runs_launcher() {
    let root = TestRoot::new();
    root.write_settings("touch launched.txt\n");

    testbed(&root)
        .args(["test_server", "--port", &free_port().to_string()])
        .assert()
        .success();
    assert!(root.path().join("launched.txt").exists());
    assert!(recorded_pid(&root).is_none());
}

#[test]
fn background_start_and_stop() {
    let root = TestRoot::new();
    root.write_settings(SLEEPING_ENTRY_POINT);
    let port = free_port().to_string();

    testbed(&root)
        .args(["test_server_bg", "--port", &port])
        .assert()
        .success()
        .stdout(predicate::str::contains("running in background"));
    let pid = recorded_pid(&root).expect("PID should be recorded");
    assert!(is_process_alive(pid));

    testbed(&root)
        .args(["status", "--no-color", "--port", &port])
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("Running (PID {pid})")));

    testbed(&root)
        .args(["stop_server", "--port", &port])
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("Stopped test server (PID {pid})")));
    wait_for(|| !is_process_alive(pid), "background server to exit");
    assert!(recorded_pid(&root).is_none());
}

#[test]
fn stop_server_twice_succeeds() {
    let root = TestRoot::new();
    let port = free_port().to_string();

    for _ in 0..2 {
        testbed(&root)
            .args(["stop_server", "--port", &port])
            .assert()
            .success()
            .stdout(predicate::str::contains("No test server running"));
    }
}

#[test]
fn clean_removes_generated_files() {
    let root = TestRoot::new();
    root.write_settings("exit 0\n");

    testbed(&root)
        .args(["test_server", "--port", &free_port().to_string()])
        .assert()
        .success();
    assert!(root.path().join("test_server_config.json").exists());
    assert!(root.path().join("run.sh").exists());

    testbed(&root).arg("clean").assert().success();
    assert!(!root.path().join("test_server_config.json").exists());
    assert!(!root.path().join("run.sh").exists());
    assert!(root.path().join("server_config.json").exists());
    assert!(root.path().join("venv/bin/python").exists());
}

#[test]
fn invalid_port_is_rejected() {
    let root = TestRoot::new();

    testbed(&root)
        .args(["stop_server", "--port", "0"])
        .assert()
        .failure();
}
