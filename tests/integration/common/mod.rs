#![allow(dead_code)]

use std::{
    fs,
    net::TcpListener,
    path::Path,
    process::{Child, Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use tempfile::TempDir;
use testbed::{config::Settings, lifecycle::LifecycleController, ports, ports::ServicePort};

pub const TEMPLATE: &str = r#"{
  "host": "127.0.0.1",
  "port": 8888,
  "logger": { "level": "INFO", "max_bytes": 1000000 }
}"#;

/// Launcher that reads the port from the generated config and listens on it.
pub const LISTENING_ENTRY_POINT: &str = r#"exec python3 - "$2" <<'PY'
import json, socket, sys, time

with open(sys.argv[1]) as fh:
    cfg = json.load(fh)

sock = socket.socket(socket.AF_INET, socket.SOCK_STREAM)
sock.setsockopt(socket.SOL_SOCKET, socket.SO_REUSEADDR, 1)
sock.bind(("127.0.0.1", cfg["port"]))
sock.listen()
while True:
    time.sleep(1)
PY
"#;

/// Launcher that stays alive without binding anything.
pub const SLEEPING_ENTRY_POINT: &str = "exec sleep 30\n";

/// Root directory with a fake ready environment and a template config.
pub struct TestRoot {
    pub dir: TempDir,
}

impl TestRoot {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let python = dir.path().join("venv/bin/python");
        fs::create_dir_all(python.parent().unwrap()).expect("failed to create venv");
        fs::write(&python, "").expect("failed to write fake interpreter");
        fs::write(dir.path().join("server_config.json"), TEMPLATE)
            .expect("failed to write template");
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Controller that runs `entry_point` with `sh`.
    pub fn controller(&self, entry_point: &str) -> LifecycleController {
        LifecycleController::new(self.path(), shell_settings(entry_point))
    }

    /// Writes a `testbed.yaml` that runs `entry_point` with `sh`.
    pub fn write_settings(&self, entry_point: &str) {
        let indented: String = entry_point
            .lines()
            .map(|line| format!("    {line}\n"))
            .collect();
        fs::write(
            self.path().join("testbed.yaml"),
            format!(
                "service:\n  program: sh\n  entry_point_name: run.sh\n  entry_point: |\n{indented}"
            ),
        )
        .expect("failed to write settings");
    }
}

pub fn shell_settings(entry_point: &str) -> Settings {
    let mut settings = Settings::default();
    settings.service.program = Some("sh".into());
    settings.service.entry_point_name = "run.sh".into();
    settings.service.entry_point = entry_point.into();
    settings
}

pub fn python3_available() -> bool {
    Command::new("python3")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Returns a port nothing is listening on right now.
pub fn free_port() -> ServicePort {
    let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind ephemeral port");
    let port = listener.local_addr().unwrap().port();
    ServicePort::new(port).unwrap()
}

/// Starts a python listener on `port` in a separate process, unrelated to testbed.
pub fn spawn_unrelated_listener(port: ServicePort) -> Child {
    let script = format!(
        "import socket, time\n\
         s = socket.socket()\n\
         s.setsockopt(socket.SOL_SOCKET, socket.SO_REUSEADDR, 1)\n\
         s.bind(('127.0.0.1', {port}))\n\
         s.listen()\n\
         while True: time.sleep(1)\n"
    );
    let child = Command::new("python3")
        .arg("-c")
        .arg(script)
        .spawn()
        .expect("failed to spawn python listener");
    let pid = child.id();
    wait_for(
        || listeners(port).contains(&pid),
        &format!("listener PID {pid} on port {port}"),
    );
    child
}

pub fn listeners(port: ServicePort) -> Vec<u32> {
    ports::list_listeners(port.get())
        .expect("failed to probe port")
        .into_iter()
        .collect()
}

pub fn wait_for<F: FnMut() -> bool>(mut condition: F, what: &str) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if condition() {
            return;
        }
        thread::sleep(Duration::from_millis(100));
    }
    panic!("Timed out waiting for {what}");
}

pub fn is_process_alive(pid: u32) -> bool {
    testbed::process::is_running(pid)
}
