//! Provisioning of the isolated runtime environment.
//!
//! These steps are idempotent setup work: clone the source if absent, create
//! the virtual environment if absent, install packages until the install
//! marker exists, and write the static `.env` file.
use std::{
    ffi::OsStr,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    process::Command,
};

use tracing::{debug, info};

use crate::artifacts::remove_artifacts;
use crate::config::EnvironmentConfig;
use crate::error::ManagerError;
use crate::lifecycle::LifecycleController;
use crate::runtime::RootLayout;

/// What `setup` had to do. Each flag is `false` when the step was already satisfied.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SetupReport {
    pub cloned: bool,
    pub created: bool,
    pub installed: bool,
    pub dotenv_written: bool,
}

/// Provisions the environment described by [`EnvironmentConfig`] under a root.
pub struct Environment<'a> {
    layout: &'a RootLayout,
    config: &'a EnvironmentConfig,
}

impl<'a> Environment<'a> {
    pub fn new(layout: &'a RootLayout, config: &'a EnvironmentConfig) -> Self {
        Self { layout, config }
    }

    /// Builds the environment handle for a controller's root and settings.
    pub fn for_controller(controller: &'a LifecycleController) -> Self {
        Self::new(controller.layout(), &controller.settings().environment)
    }

    pub fn is_ready(&self) -> bool {
        self.layout.env_python().exists()
    }

    /// Brings the root to a ready state, doing only the missing steps.
    pub fn setup(&self) -> Result<SetupReport, ManagerError> {
        let mut report = SetupReport {
            cloned: self.clone_source()?,
            ..SetupReport::default()
        };

        if self.is_ready() {
            debug!("Environment already present at {:?}", self.layout.env_dir());
        } else {
            info!("Creating environment at {:?}", self.layout.env_dir());
            let mut cmd = Command::new(&self.config.interpreter);
            cmd.arg("-m")
                .arg("venv")
                .arg(self.layout.env_dir())
                .current_dir(self.layout.root());
            run_step("create environment", cmd)?;
            report.created = true;
        }

        if self.layout.install_marker().exists() {
            debug!("Packages already installed; skipping install");
        } else {
            self.install(false)?;
            report.installed = true;
        }

        report.dotenv_written = self.write_dotenv()?;
        Ok(report)
    }

    /// Reinstalls every package into the existing environment.
    pub fn reinstall(&self) -> Result<(), ManagerError> {
        if !self.is_ready() {
            return Err(ManagerError::EnvironmentNotReady {
                path: self.layout.env_python(),
            });
        }
        self.install(true)
    }

    /// Removes the environment directory. Missing is fine.
    pub fn remove(&self) -> Result<bool, ManagerError> {
        match fs::remove_dir_all(self.layout.env_dir()) {
            Ok(()) => {
                info!("Removed environment {:?}", self.layout.env_dir());
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn clone_source(&self) -> Result<bool, ManagerError> {
        let (Some(source), Some(dir)) = (&self.config.source, self.layout.source_dir())
        else {
            return Ok(false);
        };

        if dir.exists() {
            debug!("Source checkout present at {:?}", dir);
            return Ok(false);
        }

        info!("Cloning {} into {:?}", source.repo, dir);
        let mut cmd = Command::new("git");
        cmd.arg("clone");
        if let Some(branch) = &source.branch {
            cmd.arg("--branch").arg(branch);
        }
        cmd.arg(&source.repo).arg(dir).current_dir(self.layout.root());
        run_step("clone source", cmd)?;
        Ok(true)
    }

    fn install(&self, force: bool) -> Result<(), ManagerError> {
        let python = self.layout.env_python();

        let mut upgrade_pip = Command::new(&python);
        upgrade_pip
            .args(["-m", "pip", "install", "--upgrade", "pip"])
            .current_dir(self.layout.root());
        run_step("upgrade pip", upgrade_pip)?;

        let targets = self.install_targets();
        if targets.is_empty() {
            debug!("No packages configured for installation");
        } else {
            let mut cmd = Command::new(&python);
            cmd.args(["-m", "pip", "install", "--upgrade"]);
            if force {
                cmd.arg("--force-reinstall");
            }
            cmd.args(&targets).current_dir(self.layout.root());
            info!("Installing {} package target(s)", targets.len());
            run_step("install packages", cmd)?;
        }

        fs::write(self.layout.install_marker(), "")?;
        Ok(())
    }

    fn install_targets(&self) -> Vec<PathBuf> {
        let mut targets = Vec::new();
        if let Some(dir) = self.layout.source_dir() {
            targets.push(PathBuf::from("-e"));
            targets.push(dir.to_path_buf());
        }
        targets.extend(self.config.packages.iter().map(PathBuf::from));
        targets
    }

    fn write_dotenv(&self) -> Result<bool, ManagerError> {
        let Some(vars) = &self.config.dotenv else {
            return Ok(false);
        };

        let contents: String = vars
            .iter()
            .map(|(key, value)| format!("{key}={value}\n"))
            .collect();
        fs::write(self.layout.dotenv(), contents)?;
        debug!("Wrote {} variable(s) to {:?}", vars.len(), self.layout.dotenv());
        Ok(true)
    }
}

fn run_step(step: &str, mut cmd: Command) -> Result<(), ManagerError> {
    debug!("Running {step}: {cmd:?}");
    let status = cmd.status().map_err(|source| {
        let program = cmd.get_program().to_string_lossy().into_owned();
        ManagerError::ToolUnavailable { program, source }
    })?;

    if status.success() {
        Ok(())
    } else {
        Err(ManagerError::ProvisionFailed {
            step: step.to_string(),
            code: status.code(),
        })
    }
}

fn remove_if_present(path: &Path) -> Result<bool, ManagerError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err.into()),
    }
}

/// Removes the generated config copy and launcher, leaving the environment alone.
pub fn clean(controller: &LifecycleController) -> Result<Vec<PathBuf>, ManagerError> {
    let removed = remove_artifacts(controller.layout())?;
    for path in &removed {
        info!("Removed {:?}", path.file_name().unwrap_or(OsStr::new("")));
    }
    Ok(removed)
}

/// Tears everything down (tracked run, environment, artifacts, record), then provisions again.
pub fn reset(controller: &LifecycleController) -> Result<SetupReport, ManagerError> {
    teardown(controller)?;
    Environment::for_controller(controller).setup()
}

/// Tears everything down, including the server log. No re-provision.
pub fn delete(controller: &LifecycleController) -> Result<(), ManagerError> {
    teardown(controller)?;
    if remove_if_present(&controller.layout().server_log())? {
        debug!("Removed server log");
    }
    Ok(())
}

fn teardown(controller: &LifecycleController) -> Result<(), ManagerError> {
    controller.stop_tracked()?;
    Environment::for_controller(controller).remove()?;
    clean(controller)?;
    controller.tracker().clear()?;
    Ok(())
}
