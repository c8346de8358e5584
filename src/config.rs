//! Configuration management for testbed.
//!
//! Settings live in an optional `testbed.yaml` at the root. Every field has a
//! default, so an absent file is equivalent to an empty one.
use regex::Regex;
use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
};

use crate::constants::{
    DEFAULT_ENTRY_POINT, DEFAULT_ENTRY_POINT_NAME, DEFAULT_ENV_DIR, DEFAULT_INTERPRETER,
    DEFAULT_TEMPLATE_NAME,
};
use crate::error::SettingsError;

/// Ordered `KEY=VALUE` pairs, kept in file order for `.env` emission.
pub type OrderedVars = Vec<(String, String)>;

/// Represents the structure of the settings file.
#[derive(Debug, Default, Deserialize, Clone)]
#[serde(default)]
pub struct Settings {
    /// How the runtime environment is provisioned.
    pub environment: EnvironmentConfig,
    /// How the test server is composed and launched.
    pub service: ServiceConfig,
}

/// Provisioning settings for the isolated runtime environment.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Environment directory, relative to the root.
    pub dir: String,
    /// Interpreter used to create the environment.
    pub interpreter: String,
    /// Extra packages installed into the environment.
    pub packages: Vec<String>,
    /// Source checkout installed (editable) into the environment.
    pub source: Option<SourceConfig>,
    /// Static variables written to `.env` during setup.
    #[serde(deserialize_with = "deserialize_vars")]
    pub dotenv: Option<OrderedVars>,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            dir: DEFAULT_ENV_DIR.to_string(),
            interpreter: DEFAULT_INTERPRETER.to_string(),
            packages: Vec::new(),
            source: None,
            dotenv: None,
        }
    }
}

/// Repository cloned into the root when absent.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    /// Clone URL.
    pub repo: String,
    /// Checkout directory, relative to the root.
    pub dir: String,
    /// Optional branch to clone.
    pub branch: Option<String>,
}

/// Settings for composing and launching the test server.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    /// Template config, relative to the root.
    pub template: String,
    /// File name of the generated launcher.
    pub entry_point_name: String,
    /// Body of the generated launcher.
    pub entry_point: String,
    /// Program that runs the launcher. Defaults to the environment's Python.
    pub program: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            template: DEFAULT_TEMPLATE_NAME.to_string(),
            entry_point_name: DEFAULT_ENTRY_POINT_NAME.to_string(),
            entry_point: DEFAULT_ENTRY_POINT.to_string(),
            program: None,
        }
    }
}

fn deserialize_vars<'de, D>(deserializer: D) -> Result<Option<OrderedVars>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let mapping: Option<serde_yaml::Mapping> = Option::deserialize(deserializer)?;
    let Some(mapping) = mapping else {
        return Ok(None);
    };

    let mut vars = Vec::with_capacity(mapping.len());
    for (key, value) in mapping {
        let key = scalar_to_string(key).map_err(serde::de::Error::custom)?;
        let value = scalar_to_string(value).map_err(serde::de::Error::custom)?;
        vars.push((key, value));
    }
    Ok(Some(vars))
}

fn scalar_to_string(value: serde_yaml::Value) -> Result<String, String> {
    match value {
        serde_yaml::Value::String(s) => Ok(s),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        other => Err(format!("dotenv entries must be scalars, got {other:?}")),
    }
}

/// Expands `$VAR` and `${VAR}` references within a string.
fn expand_env_vars(input: &str) -> Result<String, SettingsError> {
    let re = Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?").expect("static regex");
    let mut missing = None;
    let result = re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => {
                missing.get_or_insert_with(|| var_name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(var) => Err(SettingsError::MissingEnvVar(var)),
        None => Ok(result.into_owned()),
    }
}

/// Loads settings from `path`, falling back to defaults when the file is absent.
pub fn load_settings(path: &Path) -> Result<Settings, SettingsError> {
    if !path.exists() {
        return Ok(Settings::default());
    }

    let content = fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let expanded = expand_env_vars(&content)?;
    if expanded.trim().is_empty() {
        return Ok(Settings::default());
    }

    Ok(serde_yaml::from_str(&expanded)?)
}

/// Resolves the settings path: explicit override, else `<root>/testbed.yaml`.
pub fn settings_path(root: &Path, explicit: Option<&Path>) -> PathBuf {
    match explicit {
        Some(path) if path.is_absolute() => path.to_path_buf(),
        Some(path) => root.join(path),
        None => root.join(crate::constants::SETTINGS_FILE_NAME),
    }
}
