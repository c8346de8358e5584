//! Port probing: which processes listen on a TCP port, and clearing them out.
use std::{
    collections::BTreeSet, fmt, io, num::NonZeroU16, process::Command, str::FromStr,
    thread,
};

#[cfg(target_os = "linux")]
use std::{collections::HashSet, fs, path::Path};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::constants::{DEFAULT_PORT, PORT_RELEASE_CHECKS, PROCESS_CHECK_INTERVAL};
use crate::process::{self, TerminationMode};

/// A TCP port in 1..=65535, supplied per invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ServicePort(NonZeroU16);

impl ServicePort {
    pub fn new(port: u16) -> Option<Self> {
        NonZeroU16::new(port).map(Self)
    }

    pub fn get(self) -> u16 {
        self.0.get()
    }
}

impl Default for ServicePort {
    fn default() -> Self {
        Self::new(DEFAULT_PORT).unwrap_or(Self(NonZeroU16::MIN))
    }
}

impl fmt::Display for ServicePort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ServicePort {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let number = trimmed
            .parse::<u16>()
            .map_err(|_| format!("invalid port '{trimmed}' (expected 1-65535)"))?;
        Self::new(number).ok_or_else(|| "port 0 is not allowed (expected 1-65535)".to_string())
    }
}

/// A process holding a listening socket, as shown by `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Listener {
    pub pid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// What happened when listeners on a port were cleared.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TerminationSummary {
    /// PIDs that were signalled successfully.
    pub terminated: Vec<u32>,
    /// PIDs that could not be signalled.
    pub failed: Vec<u32>,
    /// Whether the manager itself was listening and was left alone.
    pub skipped_self: bool,
}

/// Returns the PIDs holding a LISTEN socket on `port`. No listeners is an empty set.
pub fn list_listeners(port: u16) -> io::Result<BTreeSet<u32>> {
    #[cfg(target_os = "linux")]
    {
        match procfs_listeners(port) {
            Ok(pids) => return Ok(pids),
            Err(err) => debug!("Falling back to lsof for port {port}: {err}"),
        }
    }

    lsof_listeners(port)
}

/// Lists listeners on `port` together with their process names.
pub fn describe_listeners(port: u16) -> io::Result<Vec<Listener>> {
    Ok(list_listeners(port)?
        .into_iter()
        .map(|pid| Listener {
            pid,
            name: process::process_name(pid),
        })
        .collect())
}

/// Force-kills every listener on `port`. Individual failures are logged and skipped.
pub fn terminate_listeners(port: u16) -> io::Result<TerminationSummary> {
    let own_pid = std::process::id();
    let mut summary = TerminationSummary::default();

    for pid in list_listeners(port)? {
        if pid == own_pid {
            warn!("Port {port} is held by testbed itself (PID {pid}); not terminating it");
            summary.skipped_self = true;
            continue;
        }

        info!("Terminating PID {pid} listening on port {port}");
        match process::terminate(pid, TerminationMode::Forceful) {
            Ok(()) => summary.terminated.push(pid),
            Err(err) => {
                warn!("{err}");
                summary.failed.push(pid);
            }
        }
    }

    if !summary.terminated.is_empty() {
        wait_for_release(port, own_pid);
    }

    Ok(summary)
}

fn wait_for_release(port: u16, own_pid: u32) {
    for _ in 0..PORT_RELEASE_CHECKS {
        match list_listeners(port) {
            Ok(pids) if pids.iter().all(|pid| *pid == own_pid) => return,
            Ok(_) => {}
            Err(err) => {
                debug!("Unable to re-probe port {port}: {err}");
                return;
            }
        }
        thread::sleep(PROCESS_CHECK_INTERVAL);
    }
    debug!("Port {port} still has listeners after termination");
}

fn lsof_listeners(port: u16) -> io::Result<BTreeSet<u32>> {
    let output = Command::new("lsof")
        .args(["-nP", &format!("-iTCP:{port}"), "-sTCP:LISTEN", "-t"])
        .output()?;

    // lsof exits 1 with empty output when nothing matches.
    Ok(parse_pid_lines(&String::from_utf8_lossy(&output.stdout)))
}

fn parse_pid_lines(output: &str) -> BTreeSet<u32> {
    output
        .lines()
        .filter_map(|line| line.trim().parse::<u32>().ok())
        .collect()
}

#[cfg(target_os = "linux")]
fn procfs_listeners(port: u16) -> io::Result<BTreeSet<u32>> {
    let mut inodes = HashSet::new();
    let mut readable = false;
    for table in ["/proc/net/tcp", "/proc/net/tcp6"] {
        match fs::read_to_string(table) {
            Ok(contents) => {
                readable = true;
                inodes.extend(listening_inodes(&contents, port));
            }
            Err(err) => debug!("Unable to read {table}: {err}"),
        }
    }

    if !readable {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            "no readable /proc/net/tcp tables",
        ));
    }

    if inodes.is_empty() {
        return Ok(BTreeSet::new());
    }

    socket_owners(Path::new("/proc"), &inodes)
}

/// PIDs under `proc_root` holding one of `inodes`. Errors when none of the
/// sockets has a readable owner, so the caller can ask `lsof` instead.
#[cfg(target_os = "linux")]
fn socket_owners(proc_root: &Path, inodes: &HashSet<u64>) -> io::Result<BTreeSet<u32>> {
    let mut pids = BTreeSet::new();
    for entry in fs::read_dir(proc_root)?.filter_map(Result::ok) {
        let Some(pid) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<u32>().ok())
        else {
            continue;
        };

        // Other users' descriptors are unreadable; skip them.
        let Ok(fds) = fs::read_dir(entry.path().join("fd")) else {
            continue;
        };

        for fd in fds.filter_map(Result::ok) {
            if let Ok(target) = fs::read_link(fd.path())
                && let Some(inode) = socket_inode(&target)
                && inodes.contains(&inode)
            {
                pids.insert(pid);
                break;
            }
        }
    }

    if pids.is_empty() && !inodes.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "listening socket is held by a process whose descriptors are unreadable",
        ));
    }

    Ok(pids)
}

/// Socket inodes of LISTEN (`0A`) rows whose local port is `port`.
#[cfg(target_os = "linux")]
fn listening_inodes(table: &str, port: u16) -> HashSet<u64> {
    const TCP_LISTEN: &str = "0A";

    table
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let local = fields.get(1)?;
            let state = fields.get(3)?;
            let inode = fields.get(9)?;

            let (_, hex_port) = local.rsplit_once(':')?;
            let local_port = u16::from_str_radix(hex_port, 16).ok()?;
            if local_port != port || *state != TCP_LISTEN {
                return None;
            }

            inode.parse::<u64>().ok().filter(|inode| *inode != 0)
        })
        .collect()
}

#[cfg(target_os = "linux")]
fn socket_inode(link: &Path) -> Option<u64> {
    link.to_str()?
        .strip_prefix("socket:[")?
        .strip_suffix(']')?
        .parse()
        .ok()
}
