//! Durable host list
//!
//! The session manager never persists anything itself; it is fed the ordered
//! host list by whoever owns the store.

use std::path::{Path, PathBuf};

use super::{load_or_default, save_config, AppConfig};
use crate::error::ConfigError;
use crate::types::{Host, HostRef};

/// Read/write access to the ordered host list
pub trait HostStore: Send + Sync {
    /// Current ordered host list
    fn hosts(&self) -> Result<Vec<Host>, ConfigError>;

    /// Replace the host list
    fn save_hosts(&self, hosts: &[Host]) -> Result<(), ConfigError>;

    /// Add a host, replacing an existing entry with the same address
    fn add(&self, host: Host) -> Result<(), ConfigError> {
        let mut hosts = self.hosts()?;
        match hosts.iter_mut().find(|h| h.id() == host.id()) {
            Some(existing) => *existing = host,
            None => hosts.push(host),
        }
        self.save_hosts(&hosts)
    }

    /// Remove the host matching `reference`. Returns whether one was removed.
    fn remove(&self, reference: &HostRef) -> Result<bool, ConfigError> {
        let mut hosts = self.hosts()?;
        let Some(index) = find_host(&hosts, reference) else {
            return Ok(false);
        };
        hosts.remove(index);
        self.save_hosts(&hosts)?;
        Ok(true)
    }

    /// Move the host matching `reference` to the front so it opens first on
    /// the next launch. Returns whether the order changed.
    fn promote(&self, reference: &HostRef) -> Result<bool, ConfigError> {
        let mut hosts = self.hosts()?;
        match find_host(&hosts, reference) {
            Some(0) | None => Ok(false),
            Some(index) => {
                let host = hosts.remove(index);
                hosts.insert(0, host);
                self.save_hosts(&hosts)?;
                Ok(true)
            }
        }
    }
}

/// Index of the host matching `reference`, by address first then by title
pub fn find_host(hosts: &[Host], reference: &HostRef) -> Option<usize> {
    let id = crate::types::HostId::from_address(reference.as_str());
    hosts
        .iter()
        .position(|h| h.id() == id)
        .or_else(|| hosts.iter().position(|h| h.matches(reference)))
}

/// The host opened on launch: the first one in the list
pub fn default_host(hosts: &[Host]) -> Result<&Host, ConfigError> {
    hosts.first().ok_or(ConfigError::NoHosts)
}

/// Host store backed by the `[[hosts]]` array of the TOML config file
#[derive(Debug, Clone)]
pub struct FileHostStore {
    path: PathBuf,
}

impl FileHostStore {
    /// Create a store over the config file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing config file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HostStore for FileHostStore {
    fn hosts(&self) -> Result<Vec<Host>, ConfigError> {
        Ok(load_or_default(&self.path)?.hosts)
    }

    fn save_hosts(&self, hosts: &[Host]) -> Result<(), ConfigError> {
        let mut config: AppConfig = load_or_default(&self.path)?;
        config.hosts = hosts.to_vec();
        save_config(&self.path, &config)
    }
}
