//! Per-invocation run artifacts: the config copy and the launcher script.
use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use serde_json::Value;
use tracing::debug;

use crate::constants::PORT_FIELD;
use crate::error::ManagerError;
use crate::runtime::RootLayout;

/// Files a single start invocation runs against. Regenerated on every start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunArtifacts {
    pub config_path: PathBuf,
    pub entry_point_path: PathBuf,
}

/// Builds [`RunArtifacts`] from the template config and the launcher body.
pub struct ArtifactComposer<'a> {
    layout: &'a RootLayout,
    entry_point: &'a str,
}

impl<'a> ArtifactComposer<'a> {
    pub fn new(layout: &'a RootLayout, entry_point: &'a str) -> Self {
        Self {
            layout,
            entry_point,
        }
    }

    /// Writes the config copy with `port` injected and the launcher script.
    pub fn compose(&self, port: u16) -> Result<RunArtifacts, ManagerError> {
        let template_path = self.layout.template();
        let template = match fs::read_to_string(template_path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(ManagerError::ConfigMissing {
                    path: template_path.to_path_buf(),
                });
            }
            Err(err) => return Err(err.into()),
        };

        let rendered = inject_port(&template, port, template_path)?;
        let config_path = self.layout.config_copy();
        fs::write(&config_path, rendered)?;

        let entry_point_path = self.layout.entry_point().to_path_buf();
        fs::write(&entry_point_path, self.entry_point)?;

        debug!(
            "Composed run artifacts for port {port}: {:?}, {:?}",
            config_path, entry_point_path
        );

        Ok(RunArtifacts {
            config_path,
            entry_point_path,
        })
    }
}

/// Rewrites the single integer `"port"` field of a JSON document.
pub fn inject_port(template: &str, port: u16, origin: &Path) -> Result<String, ManagerError> {
    let mut document: Value =
        serde_json::from_str(template).map_err(|source| ManagerError::TemplateParse {
            path: origin.to_path_buf(),
            source,
        })?;

    let mut fields = Vec::new();
    collect_port_fields(&mut document, &mut fields);

    match fields.len() {
        0 => Err(ManagerError::PortFieldMissing {
            path: origin.to_path_buf(),
        }),
        1 => {
            *fields.remove(0) = Value::from(port);
            let mut rendered = serde_json::to_string_pretty(&document)?;
            rendered.push('\n');
            Ok(rendered)
        }
        count => Err(ManagerError::AmbiguousPortField {
            path: origin.to_path_buf(),
            count,
        }),
    }
}

fn collect_port_fields<'v>(value: &'v mut Value, found: &mut Vec<&'v mut Value>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                if key == PORT_FIELD && (child.is_u64() || child.is_i64()) {
                    found.push(child);
                } else {
                    collect_port_fields(child, found);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_port_fields(item, found);
            }
        }
        _ => {}
    }
}

/// Removes the generated config copy and launcher. Missing files are fine.
pub fn remove_artifacts(layout: &RootLayout) -> std::io::Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    for path in [layout.config_copy(), layout.entry_point().to_path_buf()] {
        match fs::remove_file(&path) {
            Ok(()) => removed.push(path),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
    }
    Ok(removed)
}
