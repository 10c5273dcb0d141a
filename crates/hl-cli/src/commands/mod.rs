//! CLI command implementations

mod config;
mod control;
mod hosts;
mod status;

pub use config::{config_path, config_show};
pub use control::{disconnect_command, open_command, restart_command, set_command, stop_command};
pub use hosts::{hosts_add, hosts_list, hosts_promote, hosts_remove};
pub use status::status_command;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use hl_core::config::{self as core_config, AppConfig, FileHostStore};
use hl_core::pidfile;

use crate::ipc::{ClientError, InstanceClient};
use crate::output::print_error;

/// Where this invocation reads its configuration from
#[derive(Debug, Clone)]
pub struct CliContext {
    config_path: PathBuf,
}

impl CliContext {
    /// Use `config_path`, or the default config file when `None`
    pub fn new(config_path: Option<PathBuf>) -> Self {
        Self {
            config_path: config_path.unwrap_or_else(core_config::default_config_path),
        }
    }

    /// Path of the config file
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load the config, using defaults when the file does not exist
    pub fn load_config(&self) -> Result<AppConfig> {
        core_config::load_or_default(&self.config_path)
            .with_context(|| format!("Failed to load config from {:?}", self.config_path))
    }

    /// Host list stored in the config file
    pub fn host_store(&self) -> FileHostStore {
        FileHostStore::new(&self.config_path)
    }

    /// PID file guarding the single running instance
    pub fn pid_path(&self) -> PathBuf {
        pidfile::pid_path_for(&self.config_path)
    }

    /// Client for the instance this config runs
    pub fn client(&self) -> Result<InstanceClient> {
        Ok(InstanceClient::with_address(self.load_config()?.ipc_address()))
    }
}

/// Print a failed instance request, with a hint when nothing is running
fn report(action: &str, error: ClientError) -> anyhow::Error {
    print_error(&format!("Failed to {}: {}", action, error));
    if matches!(error, ClientError::NotRunning(_)) {
        print_error("Is hostlink running? Try: hostlink run");
    }
    error.into()
}
