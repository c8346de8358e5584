//! Lifecycle of the single test server managed per root directory.
//!
//! Every operation re-reads the PID record and re-probes the port before acting,
//! since either may have changed behind testbed's back between invocations.
use std::{
    fs::OpenOptions,
    os::unix::process::CommandExt,
    path::{Path, PathBuf},
    process::{Command, ExitStatus, Stdio},
    thread,
};

use strum_macros::Display;
use tracing::{debug, error, info, warn};

use crate::artifacts::{ArtifactComposer, RunArtifacts};
use crate::config::Settings;
use crate::constants::CONFIG_FLAG;
use crate::error::ManagerError;
use crate::ports::{self, ServicePort, TerminationSummary};
use crate::process::{self, TerminationMode};
use crate::runtime::RootLayout;
use crate::status::{StatusReport, TrackedStatus};
use crate::tracker::{ProcessTracker, TrackedProcess};

/// Observed lifecycle phase of a root. Derived on demand, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Phase {
    NoEnvironment,
    Idle,
    BackgroundRunning,
}

/// Snapshot of one root, built fresh for each invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerState {
    pub root: PathBuf,
    pub environment_ready: bool,
    pub tracked: Option<TrackedProcess>,
}

impl ManagerState {
    /// Derives the phase, re-checking liveness of the tracked PID.
    pub fn phase(&self) -> Phase {
        if !self.environment_ready {
            return Phase::NoEnvironment;
        }

        match self.tracked {
            Some(tracked) if process::is_running(tracked.pid) => Phase::BackgroundRunning,
            _ => Phase::Idle,
        }
    }
}

/// Result of [`LifecycleController::stop`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// A PID record existed; it has been cleared.
    Tracked {
        pid: u32,
        was_running: bool,
        terminated: bool,
    },
    /// No record; listeners on the port were cleared instead.
    PortFallback(TerminationSummary),
}

/// Start, stop and inspect the test server of one root directory.
pub struct LifecycleController {
    layout: RootLayout,
    settings: Settings,
    tracker: ProcessTracker,
}

impl LifecycleController {
    pub fn new(root: impl Into<PathBuf>, settings: Settings) -> Self {
        let layout = RootLayout::new(root, &settings);
        let tracker = ProcessTracker::new(layout.pid_file());
        Self {
            layout,
            settings,
            tracker,
        }
    }

    pub fn layout(&self) -> &RootLayout {
        &self.layout
    }

    pub fn tracker(&self) -> &ProcessTracker {
        &self.tracker
    }

    /// Whether the runtime environment exists under the root.
    pub fn environment_ready(&self) -> bool {
        self.layout.env_python().exists()
    }

    /// Reads the current state from disk.
    pub fn state(&self) -> Result<ManagerState, ManagerError> {
        Ok(ManagerState {
            root: self.layout.root().to_path_buf(),
            environment_ready: self.environment_ready(),
            tracked: self.tracker.load()?,
        })
    }

    fn ensure_environment(&self) -> Result<(), ManagerError> {
        if self.environment_ready() {
            Ok(())
        } else {
            Err(ManagerError::EnvironmentNotReady {
                path: self.layout.env_python(),
            })
        }
    }

    fn compose(&self, port: ServicePort) -> Result<RunArtifacts, ManagerError> {
        ArtifactComposer::new(&self.layout, &self.settings.service.entry_point)
            .compose(port.get())
    }

    fn program(&self) -> String {
        match &self.settings.service.program {
            Some(program) => program.clone(),
            None => self.layout.env_python().to_string_lossy().into_owned(),
        }
    }

    fn server_command(&self, artifacts: &RunArtifacts) -> Command {
        let mut cmd = Command::new(self.program());
        cmd.arg(&artifacts.entry_point_path)
            .arg(CONFIG_FLAG)
            .arg(&artifacts.config_path)
            .current_dir(self.layout.root());
        cmd
    }

    fn spawn_error(&self, source: std::io::Error) -> ManagerError {
        let program = self.program();
        error!("Failed to start test server via '{program}': {source}");
        ManagerError::ServiceStart { program, source }
    }

    /// Runs the server attached to the terminal and waits for it to exit.
    ///
    /// Nothing is recorded. The child stays in the caller's process group and,
    /// on Linux, receives SIGTERM if testbed dies first. `on_launch` receives
    /// the child PID so the caller can forward signals to it.
    pub fn start_foreground<F>(
        &self,
        port: ServicePort,
        force: bool,
        on_launch: F,
    ) -> Result<ExitStatus, ManagerError>
    where
        F: FnOnce(u32),
    {
        self.ensure_environment()?;
        let artifacts = self.compose(port)?;

        let listeners = ports::list_listeners(port.get())?;
        if !listeners.is_empty() {
            if !force {
                return Err(ManagerError::PortInUse {
                    port: port.get(),
                    pids: listeners.into_iter().collect(),
                });
            }
            info!("--force given; clearing listeners on port {port}");
            ports::terminate_listeners(port.get())?;
        }

        let mut cmd = self.server_command(&artifacts);
        cmd.stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        #[cfg(target_os = "linux")]
        {
            unsafe {
                cmd.pre_exec(|| {
                    if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM, 0, 0, 0) < 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        info!("Starting test server on port {port} (foreground)");
        debug!("Executing command: {cmd:?}");
        let mut child = cmd.spawn().map_err(|err| self.spawn_error(err))?;
        on_launch(child.id());

        let status = child.wait()?;
        info!("Test server exited with {status}");
        Ok(status)
    }

    /// Launches the server detached, replacing any previous background run.
    ///
    /// Returns the PID now held in the record.
    pub fn start_background(&self, port: ServicePort) -> Result<u32, ManagerError> {
        self.ensure_environment()?;
        // ConfigMissing must surface before the previous run is retired.
        let artifacts = self.compose(port)?;

        self.retire_tracked()?;

        let summary = ports::terminate_listeners(port.get())?;
        if !summary.terminated.is_empty() {
            info!(
                "Cleared {} listener(s) on port {port}: {:?}",
                summary.terminated.len(),
                summary.terminated
            );
        }

        let log_path = self.layout.server_log();
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        let log_err = log.try_clone()?;

        let mut cmd = self.server_command(&artifacts);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));

        unsafe {
            cmd.pre_exec(|| {
                // New session: outlives this invocation and gets its own process group.
                if libc::setsid() < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        debug!("Executing command: {cmd:?}");
        let mut child = cmd.spawn().map_err(|err| self.spawn_error(err))?;
        let pid = child.id();

        if let Err(err) = self.tracker.save(pid) {
            error!("Failed to record PID {pid}; terminating the untracked server");
            if let Err(term_err) = process::terminate(pid, TerminationMode::Forceful) {
                warn!("{term_err}");
            }
            let _ = child.wait();
            return Err(err.into());
        }

        // Reap the child if it exits while this process is still around.
        thread::spawn(move || {
            let _ = child.wait();
        });

        info!(
            "Test server started in background on port {port} (PID {pid}); output in {:?}",
            log_path
        );
        Ok(pid)
    }

    /// Terminates the recorded background run, if live, and clears the record.
    fn retire_tracked(&self) -> Result<Option<StopOutcome>, ManagerError> {
        let Some(TrackedProcess { pid }) = self.tracker.load()? else {
            return Ok(None);
        };

        let was_running = process::is_running(pid);
        let mut terminated = false;
        if was_running {
            info!("Stopping background test server (PID {pid})");
            match process::terminate(pid, TerminationMode::Graceful) {
                Ok(()) => terminated = true,
                Err(err) => warn!("{err}"),
            }
        } else {
            debug!("PID record {pid} is stale; clearing it");
        }

        self.tracker.clear()?;
        Ok(Some(StopOutcome::Tracked {
            pid,
            was_running,
            terminated,
        }))
    }

    /// Stops the background server.
    ///
    /// Without a PID record, falls back to clearing listeners on `port`, so a
    /// lost record can still be recovered from. Always leaves the record absent.
    pub fn stop(&self, port: ServicePort) -> Result<StopOutcome, ManagerError> {
        if let Some(outcome) = self.retire_tracked()? {
            if let StopOutcome::Tracked {
                pid,
                was_running: false,
                ..
            } = outcome
            {
                info!("Background test server (PID {pid}) was not running");
            }
            return Ok(outcome);
        }

        // An unreadable record loads as absent but must not survive a stop.
        self.tracker.clear()?;

        info!("No PID record; clearing listeners on port {port}");
        let summary = ports::terminate_listeners(port.get())?;
        if summary.terminated.is_empty() && summary.failed.is_empty() {
            info!("Nothing is listening on port {port}");
        }
        Ok(StopOutcome::PortFallback(summary))
    }

    /// Reports the record's liveness and the port's listeners, independently.
    pub fn status(&self, port: ServicePort) -> Result<StatusReport, ManagerError> {
        let tracked = self.tracker.load()?.map(|tracked| TrackedStatus {
            pid: tracked.pid,
            running: process::is_running(tracked.pid),
        });
        let listeners = ports::describe_listeners(port.get())?;

        Ok(StatusReport {
            port: port.get(),
            tracked,
            listeners,
        })
    }

    /// Stops the tracked run without touching the port. Used before the
    /// environment is torn down.
    pub fn stop_tracked(&self) -> Result<(), ManagerError> {
        self.retire_tracked()?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}
