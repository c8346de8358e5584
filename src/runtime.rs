//! Fixed paths under a root directory.
use std::path::{Path, PathBuf};

use crate::config::Settings;
use crate::constants::{
    CONFIG_COPY_NAME, DOTENV_FILE_NAME, INSTALL_MARKER_NAME, PID_FILE_NAME,
    SERVER_LOG_NAME,
};

/// Every on-disk location testbed reads or writes for one root directory.
///
/// Built from an explicit root rather than ambient process state, so tests and
/// callers can operate on several roots side by side.
#[derive(Debug, Clone)]
pub struct RootLayout {
    root: PathBuf,
    env_dir: PathBuf,
    template: PathBuf,
    entry_point: PathBuf,
    source_dir: Option<PathBuf>,
}

impl RootLayout {
    /// Resolves the layout for `root` using the names configured in `settings`.
    pub fn new(root: impl Into<PathBuf>, settings: &Settings) -> Self {
        let root = root.into();
        Self {
            env_dir: root.join(&settings.environment.dir),
            template: root.join(&settings.service.template),
            entry_point: root.join(&settings.service.entry_point_name),
            source_dir: settings
                .environment
                .source
                .as_ref()
                .map(|source| root.join(&source.dir)),
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// PID record of the background server.
    pub fn pid_file(&self) -> PathBuf {
        self.root.join(PID_FILE_NAME)
    }

    /// Generated config copy with the requested port.
    pub fn config_copy(&self) -> PathBuf {
        self.root.join(CONFIG_COPY_NAME)
    }

    /// Generated launcher script.
    pub fn entry_point(&self) -> &Path {
        &self.entry_point
    }

    /// Template the config copy is derived from.
    pub fn template(&self) -> &Path {
        &self.template
    }

    /// Background server output.
    pub fn server_log(&self) -> PathBuf {
        self.root.join(SERVER_LOG_NAME)
    }

    /// Isolated runtime environment.
    pub fn env_dir(&self) -> &Path {
        &self.env_dir
    }

    /// Interpreter inside the environment. Its presence means "environment ready".
    pub fn env_python(&self) -> PathBuf {
        self.env_dir.join("bin").join("python")
    }

    /// Marker written once packages are installed into the environment.
    pub fn install_marker(&self) -> PathBuf {
        self.env_dir.join(INSTALL_MARKER_NAME)
    }

    /// Source checkout, when one is configured.
    pub fn source_dir(&self) -> Option<&Path> {
        self.source_dir.as_deref()
    }

    /// Static secrets file.
    pub fn dotenv(&self) -> PathBuf {
        self.root.join(DOTENV_FILE_NAME)
    }
}
