//! Status reporting for the tracked server and the port it should own.
use std::fmt;

use serde::Serialize;

use crate::ports::Listener;

const GREEN_BOLD: &str = "\x1b[1;32m";
const RED_BOLD: &str = "\x1b[1;31m";
const YELLOW_BOLD: &str = "\x1b[1;33m";
const RESET: &str = "\x1b[0m";

/// Liveness of the PID held in the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrackedStatus {
    pub pid: u32,
    pub running: bool,
}

/// Two independent observations: the PID record and the port table.
///
/// They may legitimately disagree (a foreground run holds the port with no
/// record, or the recorded PID died and something else took the port), so the
/// report never folds them into a single flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub port: u16,
    pub tracked: Option<TrackedStatus>,
    pub listeners: Vec<Listener>,
}

impl StatusReport {
    /// Whether the recorded PID is among the port's listeners.
    pub fn tracked_owns_port(&self) -> bool {
        self.tracked.is_some_and(|tracked| {
            tracked.running && self.listeners.iter().any(|l| l.pid == tracked.pid)
        })
    }

    /// Renders the report for a terminal, optionally with ANSI colors.
    pub fn render(&self, color: bool) -> String {
        let paint = |code: &str, text: &str| {
            if color {
                format!("{code}{text}{RESET}")
            } else {
                text.to_string()
            }
        };

        let mut out = String::new();
        match self.tracked {
            Some(TrackedStatus { pid, running: true }) => {
                out.push_str(&format!(
                    "● test_server (background) - {} (PID {pid})\n",
                    paint(GREEN_BOLD, "Running")
                ));
            }
            Some(TrackedStatus { pid, running: false }) => {
                out.push_str(&format!(
                    "● test_server (background) - {} (recorded PID {pid} not found)\n",
                    paint(RED_BOLD, "Not running")
                ));
            }
            None => {
                out.push_str("● test_server (background) - No PID record\n");
            }
        }

        if self.listeners.is_empty() {
            out.push_str(&format!("   Port {}: no listeners\n", self.port));
        } else {
            out.push_str(&format!(
                "   Port {}: {}\n",
                self.port,
                paint(YELLOW_BOLD, "in use")
            ));
            let owner = self
                .tracked
                .filter(|_| self.tracked_owns_port())
                .map(|tracked| tracked.pid);
            for listener in &self.listeners {
                let name = listener.name.as_deref().unwrap_or("unknown");
                let marker = if Some(listener.pid) == owner {
                    " (tracked)"
                } else {
                    ""
                };
                out.push_str(&format!("     |-{} {}{}\n", listener.pid, name, marker));
            }
        }

        out
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(false))
    }
}
