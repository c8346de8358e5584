//! Error handling for testbed.
use std::path::PathBuf;

use thiserror::Error;

/// Defines all possible errors that can abort a testbed invocation.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// The runtime environment has not been provisioned under the root.
    #[error(
        "Environment not ready: '{}' is missing. Run `testbed setup` first.",
        .path.display()
    )]
    EnvironmentNotReady {
        /// Interpreter path that was expected to exist.
        path: PathBuf,
    },

    /// The template configuration the run artifacts are derived from is absent.
    #[error(
        "Template config '{}' not found. Restore it (or run `testbed setup`) before starting the server.",
        .path.display()
    )]
    ConfigMissing {
        /// Expected template location.
        path: PathBuf,
    },

    /// The requested port already has listeners and `--force` was not given.
    #[error(
        "Port {port} is already in use by PID(s) {pids:?}. Rerun with --force or run `testbed stop_server --port {port}`."
    )]
    PortInUse {
        /// The contested port.
        port: u16,
        /// Processes currently listening on it.
        pids: Vec<u32>,
    },

    /// The template has no integer `"port"` field to rewrite.
    #[error("Template config '{}' has no integer \"port\" field", .path.display())]
    PortFieldMissing {
        /// Template location.
        path: PathBuf,
    },

    /// The template has more than one integer `"port"` field.
    #[error(
        "Template config '{}' has {count} \"port\" fields; expected exactly one",
        .path.display()
    )]
    AmbiguousPortField {
        /// Template location.
        path: PathBuf,
        /// Number of port fields found.
        count: usize,
    },

    /// The template is not valid JSON.
    #[error("Invalid JSON in template config '{}': {source}", .path.display())]
    TemplateParse {
        /// Template location.
        path: PathBuf,
        /// The underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// Error spawning the managed server process.
    #[error("Failed to start test server via '{program}': {source}")]
    ServiceStart {
        /// Program that failed to launch.
        program: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// An external provisioning tool could not be executed at all.
    #[error("Failed to run '{program}': {source}")]
    ToolUnavailable {
        /// Program that could not be executed.
        program: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// An external provisioning command exited unsuccessfully.
    #[error("Provisioning step '{step}' failed with exit code {code:?}")]
    ProvisionFailed {
        /// Human-readable step label.
        step: String,
        /// Exit code, if the command was not killed by a signal.
        code: Option<i32>,
    },

    /// Error for the PID record.
    #[error("PID record error: {0}")]
    PidRecord(#[from] PidRecordError),

    /// Error loading `testbed.yaml`.
    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    /// Generic filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization failure when writing generated artifacts.
    #[error("Failed to serialise JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Error type for PID record operations.
#[derive(Debug, Error)]
pub enum PidRecordError {
    /// Error reading or removing the PID record.
    #[error("Failed to access PID record: {0}")]
    Io(#[from] std::io::Error),

    /// Error moving the freshly written record into place.
    #[error("Failed to persist PID record: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// Error type for loading `testbed.yaml`.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Error reading the settings file.
    #[error("Failed to read settings file '{}': {source}", .path.display())]
    Read {
        /// Settings file location.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Error parsing YAML settings.
    #[error("Invalid YAML format: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A `${VAR}` reference names an unset environment variable.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
}

/// Raised when a process could not be signalled. Only ever logged as a warning.
#[derive(Debug, Error)]
#[error("Failed to terminate PID {pid}: {source}")]
pub struct TerminationError {
    /// The process that survived.
    pub pid: u32,
    /// The errno returned by `kill(2)`.
    #[source]
    pub source: nix::errno::Errno,
}
