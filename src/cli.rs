//! Command-line interface for testbed.
use std::{path::PathBuf, str::FromStr};

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

use crate::constants::DEFAULT_LOG_LINES;
use crate::ports::ServicePort;

/// Wrapper around `LevelFilter` so clap can parse log levels from either
/// string names ("info", "debug", etc.) or numeric shorthands (0-5).
#[derive(Clone, Copy, Debug)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<u8>() {
            let level = match number {
                0 => LevelFilter::OFF,
                1 => LevelFilter::ERROR,
                2 => LevelFilter::WARN,
                3 => LevelFilter::INFO,
                4 => LevelFilter::DEBUG,
                5 => LevelFilter::TRACE,
                _ => {
                    return Err(format!(
                        "unsupported log level number '{number}' (expected 0-5)"
                    ));
                }
            };

            return Ok(LogLevelArg(level));
        }

        let level = match trimmed.to_ascii_lowercase().as_str() {
            "off" => LevelFilter::OFF,
            "error" | "err" => LevelFilter::ERROR,
            "warn" | "warning" => LevelFilter::WARN,
            "info" => LevelFilter::INFO,
            "debug" => LevelFilter::DEBUG,
            "trace" => LevelFilter::TRACE,
            _ => return Err(format!("invalid log level '{trimmed}'")),
        };

        Ok(LogLevelArg(level))
    }
}

/// Command-line interface for testbed.
#[derive(Parser)]
#[command(name = "testbed", version)]
#[command(
    about = "Provision a local dev environment and manage its test server",
    long_about = None
)]
pub struct Cli {
    /// Directory holding the environment, template config and PID record.
    #[arg(long, value_name = "DIR", global = true)]
    pub root: Option<PathBuf>,

    /// Settings file (defaults to `testbed.yaml` under the root).
    #[arg(long, value_name = "FILE", global = true)]
    pub settings: Option<PathBuf>,

    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevelArg>,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for testbed.
#[derive(Subcommand)]
pub enum Commands {
    /// Provision the environment, or finish a partial install.
    Setup,

    /// Run the test server in the foreground until it exits.
    #[command(name = "test_server")]
    TestServer {
        /// Port injected into the generated config.
        #[arg(short, long, default_value_t = ServicePort::default())]
        port: ServicePort,

        /// Kill whatever already listens on the port instead of failing.
        #[arg(short, long)]
        force: bool,
    },

    /// Start the test server in the background, replacing any previous one.
    #[command(name = "test_server_bg")]
    TestServerBg {
        /// Port injected into the generated config.
        #[arg(short, long, default_value_t = ServicePort::default())]
        port: ServicePort,
    },

    /// Stop the background test server (or whatever listens on the port).
    #[command(name = "stop_server")]
    StopServer {
        /// Port cleared when no PID record exists.
        #[arg(short, long, default_value_t = ServicePort::default())]
        port: ServicePort,
    },

    /// Show the recorded server and the listeners on the port.
    Status {
        /// Port to inspect.
        #[arg(short, long, default_value_t = ServicePort::default())]
        port: ServicePort,

        /// Emit machine-readable JSON output.
        #[arg(long)]
        json: bool,

        /// Disable ANSI colors in output.
        #[arg(long = "no-color")]
        no_color: bool,
    },

    /// Show the tail of the background server's output.
    Logs {
        /// Number of lines to show.
        #[arg(short, long, default_value_t = DEFAULT_LOG_LINES)]
        lines: usize,
    },

    /// Force a reinstall of the packages into the existing environment.
    Deps,

    /// Remove the generated config copy and launcher.
    Clean,

    /// Remove the environment and generated files, then provision again.
    Reset,

    /// Remove the environment, generated files and PID record.
    Delete,
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}
