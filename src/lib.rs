//! Testbed provisions an isolated runtime environment for a downstream
//! application and manages the lifecycle of a single test server per root
//! directory. The server's PID is tracked across invocations and always
//! re-verified against the live process table and the port it should own.

/// Run artifacts (config copy and launcher).
pub mod artifacts;

/// CLI interface.
pub mod cli;

/// Configuration management.
pub mod config;

/// Constants and defaults.
pub mod constants;

/// Environment provisioning.
pub mod environment;

/// Error handling.
pub mod error;

/// Start, stop and status of the test server.
pub mod lifecycle;

/// Background server output.
pub mod logs;

/// Port probing and listener termination.
pub mod ports;

/// Process liveness and termination.
pub mod process;

/// Paths under the root directory.
pub mod runtime;

/// Status reporting.
pub mod status;

/// PID record.
pub mod tracker;
