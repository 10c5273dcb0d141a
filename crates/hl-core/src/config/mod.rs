//! Configuration management for hostlink

mod app;
mod policy;
pub mod serde_utils;
mod store;

pub use app::{AppConfig, DEFAULT_IPC_PORT, DEFAULT_PROTOCOL, DEFAULT_SSH_PORT, PROTOCOL_ENV};
pub use policy::{BackoffConfig, ConnectionPolicy};
pub use store::{default_host, find_host, FileHostStore, HostStore};

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hostlink")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Read and parse a TOML config file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        Err(e) => return Err(ConfigError::Invalid(format!("cannot read {:?}: {}", path, e))),
    };

    Ok(toml::from_str(&content)?)
}

/// Write a config file.
///
/// The file is written next to its final location and renamed into place,
/// so a concurrent reader sees either the old or the new contents.
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;
    let io_err = |what: &str, e: std::io::Error| {
        ConfigError::Invalid(format!("cannot {} {:?}: {}", what, path, e))
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| io_err("create directory for", e))?;
    }

    let staging = path.with_extension("toml.tmp");
    std::fs::write(&staging, content).map_err(|e| io_err("write", e))?;
    std::fs::rename(&staging, path).map_err(|e| io_err("replace", e))
}

/// Load the app config, falling back to defaults when the file is missing
pub fn load_or_default(path: &Path) -> Result<AppConfig, ConfigError> {
    match load_config(path) {
        Ok(config) => Ok(config),
        Err(ConfigError::NotFound(_)) => {
            tracing::info!("Config file {:?} not found, using defaults", path);
            Ok(AppConfig::default())
        }
        Err(e) => Err(e),
    }
}
