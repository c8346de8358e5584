//! Constants and default values shared across testbed.
//!
//! File names are fixed relative to the root directory so every invocation
//! finds the state left behind by the previous one.

use std::time::Duration;

// ============================================================================
// File System Constants
// ============================================================================

/// Name of the PID record stored at the root. Holds a single decimal PID.
pub const PID_FILE_NAME: &str = ".test_server.pid";

/// Generated copy of the template config with the requested port injected.
pub const CONFIG_COPY_NAME: &str = "test_server_config.json";

/// Default name of the generated launcher script.
pub const DEFAULT_ENTRY_POINT_NAME: &str = "test_server.py";

/// Output of the background server (stdout and stderr, appended).
pub const SERVER_LOG_NAME: &str = "test_server.log";

/// Default settings file looked up at the root.
pub const SETTINGS_FILE_NAME: &str = "testbed.yaml";

/// Default template config the run artifacts are derived from.
pub const DEFAULT_TEMPLATE_NAME: &str = "server_config.json";

/// Default virtual environment directory.
pub const DEFAULT_ENV_DIR: &str = "venv";

/// Default interpreter used to create the environment.
pub const DEFAULT_INTERPRETER: &str = "python3";

/// Marker written inside the environment once packages are installed.
pub const INSTALL_MARKER_NAME: &str = ".testbed-installed";

/// Static secrets file emitted by `setup` when `dotenv` is configured.
pub const DOTENV_FILE_NAME: &str = ".env";

// ============================================================================
// Service Constants
// ============================================================================

/// Port used when `--port` is not given.
pub const DEFAULT_PORT: u16 = 8888;

/// Key rewritten in the template config.
pub const PORT_FIELD: &str = "port";

/// Flag the entry point receives the config path under.
pub const CONFIG_FLAG: &str = "--config";

/// Launcher written when the settings do not provide one. It takes the config
/// path on the command line, so the same file serves any port.
pub const DEFAULT_ENTRY_POINT: &str = r#"import argparse

from summoner.server import SummonerServer

if __name__ == "__main__":
    parser = argparse.ArgumentParser()
    parser.add_argument("--config", dest="config_path", required=True)
    args = parser.parse_args()

    SummonerServer(name="test_server").run(config_path=args.config_path)
"#;

// ============================================================================
// Process Management Timing
// ============================================================================

/// Number of checks after SIGTERM before escalating to SIGKILL.
pub const PROCESS_READY_CHECKS: usize = 10;

/// Interval between process exit checks.
pub const PROCESS_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Number of checks for a port to drop its listeners after they were killed.
pub const PORT_RELEASE_CHECKS: usize = 10;

/// Maximum number of log lines shown by `logs` when `--lines` is omitted.
pub const DEFAULT_LOG_LINES: usize = 50;
