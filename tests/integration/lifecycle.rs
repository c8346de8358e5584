//! Integration tests for the background/foreground lifecycle of the test server.

#[path = "common/mod.rs"]
mod common;

use std::fs;

use common::{
    LISTENING_ENTRY_POINT, SLEEPING_ENTRY_POINT, TestRoot, free_port, is_process_alive,
    listeners, python3_available, spawn_unrelated_listener, wait_for,
};
use testbed::{
    error::ManagerError,
    lifecycle::{Phase, StopOutcome},
    ports::TerminationSummary,
};

#[test]
fn stop_without_record_or_listener_succeeds() {
    let root = TestRoot::new();
    let controller = root.controller(SLEEPING_ENTRY_POINT);
    let port = free_port();

    let outcome = controller.stop(port).expect("stop should succeed");
    assert_eq!(outcome, StopOutcome::PortFallback(TerminationSummary::default()));
    assert!(controller.tracker().load().unwrap().is_none());
}

#[test]
fn background_start_is_tracked_and_stoppable() {
    let root = TestRoot::new();
    let controller = root.controller(SLEEPING_ENTRY_POINT);
    let port = free_port();

    let pid = controller.start_background(port).expect("background start");
    assert!(is_process_alive(pid));
    assert_eq!(controller.tracker().load().unwrap().unwrap().pid, pid);
    assert_eq!(controller.state().unwrap().phase(), Phase::BackgroundRunning);

    let outcome = controller.stop(port).expect("stop");
    assert_eq!(
        outcome,
        StopOutcome::Tracked {
            pid,
            was_running: true,
            terminated: true,
        }
    );
    wait_for(|| !is_process_alive(pid), "background server to exit");
    assert!(controller.tracker().load().unwrap().is_none());
    assert_eq!(controller.state().unwrap().phase(), Phase::Idle);
}

#[test]
fn background_start_regenerates_artifacts() {
    let root = TestRoot::new();
    let controller = root.controller(SLEEPING_ENTRY_POINT);
    let port = free_port();

    fs::write(controller.layout().config_copy(), "stale").unwrap();
    controller.start_background(port).expect("background start");

    let config: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(controller.layout().config_copy()).unwrap())
            .unwrap();
    assert_eq!(config["port"], port.get());
    assert_eq!(config["logger"]["max_bytes"], 1_000_000);
    assert_eq!(
        fs::read_to_string(controller.layout().entry_point()).unwrap(),
        SLEEPING_ENTRY_POINT
    );

    controller.stop(port).unwrap();
}

#[test]
fn second_background_start_supersedes_first() {
    let root = TestRoot::new();
    let controller = root.controller(SLEEPING_ENTRY_POINT);

    let first = controller.start_background(free_port()).unwrap();
    // A different port on purpose: the previous run is replaced regardless.
    let port = free_port();
    let second = controller.start_background(port).unwrap();

    assert_ne!(first, second);
    wait_for(|| !is_process_alive(first), "first server to exit");
    assert!(is_process_alive(second));
    assert_eq!(controller.tracker().load().unwrap().unwrap().pid, second);

    controller.stop(port).unwrap();
}

#[test]
fn stale_record_is_reported_not_running() {
    let root = TestRoot::new();
    let controller = root.controller(SLEEPING_ENTRY_POINT);
    controller.tracker().save(99999).unwrap();

    let report = controller.status(free_port()).expect("status must not fail");
    let tracked = report.tracked.expect("record should be reported");
    assert_eq!(tracked.pid, 99999);
    assert!(!tracked.running);
    assert!(report.listeners.is_empty());
}

#[test]
fn stop_clears_record_whether_or_not_process_ran() {
    let root = TestRoot::new();
    let controller = root.controller(SLEEPING_ENTRY_POINT);
    let port = free_port();

    controller.tracker().save(99999).unwrap();
    controller.stop(port).unwrap();
    assert!(!controller.tracker().path().exists());

    let pid = controller.start_background(port).unwrap();
    controller.stop(port).unwrap();
    assert!(!controller.tracker().path().exists());
    wait_for(|| !is_process_alive(pid), "server to exit");

    controller.stop(port).unwrap();
    assert!(!controller.tracker().path().exists());
}

#[test]
fn foreground_on_free_port_launches() {
    let root = TestRoot::new();
    let controller = root.controller("echo \"config=$2\" > launched.txt\n");
    let port = free_port();

    let status = controller
        .start_foreground(port, false, |_| {})
        .expect("free port must not be reported in use");
    assert!(status.success());

    let launched = fs::read_to_string(root.path().join("launched.txt")).unwrap();
    assert!(launched.contains("test_server_config.json"), "{launched}");
    assert!(controller.tracker().load().unwrap().is_none());
}

#[test]
fn foreground_refuses_busy_port_without_force() {
    let root = TestRoot::new();
    let controller = root.controller("touch launched.txt\n");
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = testbed::ports::ServicePort::new(listener.local_addr().unwrap().port()).unwrap();

    let err = controller.start_foreground(port, false, |_| {}).unwrap_err();
    match err {
        ManagerError::PortInUse { port: busy, pids } => {
            assert_eq!(busy, port.get());
            assert!(pids.contains(&std::process::id()));
        }
        other => panic!("expected PortInUse, got {other}"),
    }
    assert!(!root.path().join("launched.txt").exists());
}

#[test]
fn foreground_force_kills_unrelated_listener() {
    if !python3_available() {
        eprintln!("Skipping foreground_force_kills_unrelated_listener: python3 not found");
        return;
    }

    let root = TestRoot::new();
    let controller = root.controller("touch launched.txt\n");
    let port = free_port();
    let mut intruder = spawn_unrelated_listener(port);
    let intruder_pid = intruder.id();

    let err = controller.start_foreground(port, false, |_| {}).unwrap_err();
    assert!(matches!(err, ManagerError::PortInUse { .. }), "{err}");
    assert!(is_process_alive(intruder_pid));

    let status = controller.start_foreground(port, true, |_| {}).unwrap();
    assert!(status.success());
    assert!(root.path().join("launched.txt").exists());
    assert!(!is_process_alive(intruder_pid));
    let _ = intruder.wait();
}

#[test]
fn background_start_then_status_sees_listener() {
    if !python3_available() {
        eprintln!("Skipping background_start_then_status_sees_listener: python3 not found");
        return;
    }

    let root = TestRoot::new();
    let controller = root.controller(LISTENING_ENTRY_POINT);
    let port = free_port();

    let pid = controller.start_background(port).unwrap();
    wait_for(|| listeners(port).contains(&pid), "server to bind its port");

    let report = controller.status(port).unwrap();
    assert_eq!(report.tracked.map(|t| (t.pid, t.running)), Some((pid, true)));
    assert!(report.tracked_owns_port());

    controller.stop(port).unwrap();
    wait_for(|| listeners(port).is_empty(), "port to be released");
}

#[test]
fn background_start_clears_unrelated_listener() {
    if !python3_available() {
        eprintln!("Skipping background_start_clears_unrelated_listener: python3 not found");
        return;
    }

    let root = TestRoot::new();
    let controller = root.controller(LISTENING_ENTRY_POINT);
    let port = free_port();
    let mut intruder = spawn_unrelated_listener(port);
    let intruder_pid = intruder.id();

    let pid = controller.start_background(port).unwrap();
    assert!(!is_process_alive(intruder_pid));
    let _ = intruder.wait();
    wait_for(|| listeners(port) == vec![pid], "server to own the port");

    controller.stop(port).unwrap();
}

#[test]
fn stop_recovers_through_port_when_record_is_lost() {
    if !python3_available() {
        eprintln!("Skipping stop_recovers_through_port_when_record_is_lost: python3 not found");
        return;
    }

    let root = TestRoot::new();
    let controller = root.controller(LISTENING_ENTRY_POINT);
    let port = free_port();

    let pid = controller.start_background(port).unwrap();
    wait_for(|| listeners(port).contains(&pid), "server to bind its port");
    fs::remove_file(controller.tracker().path()).unwrap();

    match controller.stop(port).unwrap() {
        StopOutcome::PortFallback(summary) => assert_eq!(summary.terminated, vec![pid]),
        other => panic!("expected port fallback, got {other:?}"),
    }
    wait_for(|| !is_process_alive(pid), "orphaned server to exit");
}

#[test]
fn missing_template_is_fatal_and_names_remedy() {
    let root = TestRoot::new();
    let controller = root.controller(SLEEPING_ENTRY_POINT);
    fs::remove_file(controller.layout().template()).unwrap();

    let err = controller.start_background(free_port()).unwrap_err();
    assert!(matches!(err, ManagerError::ConfigMissing { .. }));
    assert!(err.to_string().contains("server_config.json"));
    assert!(controller.tracker().load().unwrap().is_none());
}
