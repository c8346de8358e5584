//! Durable record of the background server's PID.
use std::{
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::PidRecordError;

/// The last background process started for a root. May be stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedProcess {
    pub pid: u32,
}

/// Reads and writes the single-file PID record.
#[derive(Debug, Clone)]
pub struct ProcessTracker {
    path: PathBuf,
}

impl ProcessTracker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the record. A missing file, or one that does not hold a PID, is `None`.
    pub fn load(&self) -> Result<Option<TrackedProcess>, PidRecordError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        match contents.trim().parse::<u32>() {
            Ok(pid) if pid > 0 => Ok(Some(TrackedProcess { pid })),
            _ => {
                debug!(
                    "Ignoring unreadable PID record at {:?}: {:?}",
                    self.path,
                    contents.trim()
                );
                Ok(None)
            }
        }
    }

    /// Replaces the record with `pid`. Readers see either the old or the new file.
    pub fn save(&self, pid: u32) -> Result<(), PidRecordError> {
        let dir = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;

        let mut staged = NamedTempFile::new_in(dir)?;
        writeln!(staged, "{pid}")?;
        staged.as_file().sync_all()?;
        staged.persist(&self.path)?;

        debug!("Recorded PID {pid} in {:?}", self.path);
        Ok(())
    }

    /// Removes the record. Succeeds when it is already gone.
    pub fn clear(&self) -> Result<(), PidRecordError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("Cleared PID record {:?}", self.path);
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
