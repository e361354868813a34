//! Configuration file resolution and TOML loading
//!
//! Config file lookup follows this priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. OS-dependent default location (only if the file exists)
//!
//! Individual settings are then layered by each service: CLI/ENV values
//! override the TOML file, which overrides built-in defaults.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl LoggingConfig {
    /// Build an `EnvFilter`-style directive for the given crate
    ///
    /// e.g. `chipnote_analyzer=info,tower_http=info`
    pub fn filter_directive(&self, crate_name: &str) -> String {
        format!("{crate_name}={level},tower_http={level}", level = self.level)
    }

    pub fn validate(&self) -> Result<()> {
        match self.level.to_ascii_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
            other => Err(Error::Config(format!("Unknown log level: {other}"))),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Resolve the path of a service's TOML config file
///
/// Returns `None` when neither an explicit path was given nor a file exists
/// at the platform default location; callers then use built-in defaults.
pub fn resolve_config_path(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    file_name: &str,
) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: OS-dependent default, only when present
    let default_path = default_config_dir()?.join(file_name);
    if default_path.exists() {
        Some(default_path)
    } else {
        debug!(path = %default_path.display(), "No config file at default location");
        None
    }
}

/// Platform config directory for chipnote (e.g. `~/.config/chipnote`)
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("chipnote"))
}

/// Load and deserialize a TOML config file
///
/// An explicitly resolved path that does not exist is an error; a malformed
/// file is always an error.
pub fn load_toml_config<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;

    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    info!(path = %path.display(), "Loaded TOML configuration");
    Ok(config)
}

/// Load a TOML config if a path was resolved, otherwise return defaults
pub fn load_or_default<T: DeserializeOwned + Default>(path: Option<&Path>) -> Result<T> {
    match path {
        Some(path) => load_toml_config(path),
        None => Ok(T::default()),
    }
}
