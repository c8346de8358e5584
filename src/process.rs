//! Liveness checks and termination for OS processes.
use std::thread;

use nix::{
    errno::Errno,
    sys::signal::{self, Signal},
    unistd::Pid,
};
use sysinfo::{ProcessStatus, ProcessesToUpdate, System};
use tracing::{debug, warn};

use crate::constants::{PROCESS_CHECK_INTERVAL, PROCESS_READY_CHECKS};
use crate::error::TerminationError;

/// How hard to push a process out of the way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationMode {
    /// SIGTERM to the process (and its group), escalate to SIGKILL if it lingers.
    Graceful,
    /// SIGKILL straight away.
    Forceful,
}

fn to_nix_pid(pid: u32) -> Option<Pid> {
    i32::try_from(pid).ok().filter(|raw| *raw > 0).map(Pid::from_raw)
}

/// Returns `true` when `pid` refers to a live, non-zombie process.
///
/// Never fails: a PID that cannot be inspected is reported as not running.
pub fn is_running(pid: u32) -> bool {
    if to_nix_pid(pid).is_none() {
        return false;
    }

    let target = sysinfo::Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[target]), true);

    match system.process(target) {
        Some(process) => !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead),
        None => false,
    }
}

/// Returns the executable name for `pid`, if it can be read.
pub fn process_name(pid: u32) -> Option<String> {
    let target = sysinfo::Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
    system
        .process(target)
        .map(|process| process.name().to_string_lossy().into_owned())
}

/// Terminates `pid`. A process that is already gone counts as success.
pub fn terminate(pid: u32, mode: TerminationMode) -> Result<(), TerminationError> {
    let Some(target) = to_nix_pid(pid) else {
        return Ok(());
    };

    match mode {
        TerminationMode::Forceful => send(target, Signal::SIGKILL),
        TerminationMode::Graceful => terminate_gracefully(target),
    }
}

fn send(target: Pid, sig: Signal) -> Result<(), TerminationError> {
    match signal::kill(target, sig) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(source) => Err(TerminationError {
            pid: target.as_raw() as u32,
            source,
        }),
    }
}

fn terminate_gracefully(target: Pid) -> Result<(), TerminationError> {
    let own_pgid = nix::unistd::getpgrp();
    if let Ok(child_pgid) = nix::unistd::getpgid(Some(target))
        && child_pgid != own_pgid
    {
        // The background server leads its own session; take its children too.
        match signal::killpg(child_pgid, Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(Errno::EPERM) => {
                warn!(
                    "Insufficient permissions to signal process group {child_pgid}; falling back to direct signal"
                );
            }
            Err(err) => debug!("Failed to signal process group {child_pgid}: {err}"),
        }
    }

    send(target, Signal::SIGTERM)?;

    for _ in 0..PROCESS_READY_CHECKS {
        if !is_running(target.as_raw() as u32) {
            return Ok(());
        }
        thread::sleep(PROCESS_CHECK_INTERVAL);
    }

    if is_running(target.as_raw() as u32) {
        warn!("PID {target} did not exit after SIGTERM; sending SIGKILL");
        send(target, Signal::SIGKILL)?;
    }

    Ok(())
}
