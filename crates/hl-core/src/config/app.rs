//! Application configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::policy::ConnectionPolicy;
use crate::types::Host;

/// Default URL scheme for protocol links
pub const DEFAULT_PROTOCOL: &str = "hostlink";

/// Environment variable that overrides the protocol scheme
pub const PROTOCOL_ENV: &str = "HOSTLINK_PROTOCOL";

/// Default localhost port for the instance IPC socket
pub const DEFAULT_IPC_PORT: u16 = 22240;

/// SSH port dialed when a host address does not name one
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Configuration for the tray daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// URL scheme handled by protocol-link intake
    pub protocol: String,

    /// IPC port for second-instance and CLI communication (localhost only)
    pub ipc_port: u16,

    /// Directory holding one key pair per host
    pub keys_dir: PathBuf,

    /// Default SSH username for hosts without one
    pub username: String,

    /// SSH port for hosts whose address carries no port
    pub ssh_port: u16,

    /// Retry, liveness and shutdown tuning
    pub connection: ConnectionPolicy,

    /// Ordered host list; the first entry opens by default
    pub hosts: Vec<Host>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            protocol: DEFAULT_PROTOCOL.to_string(),
            ipc_port: DEFAULT_IPC_PORT,
            keys_dir: super::default_config_dir().join("keys"),
            username: whoami::username(),
            ssh_port: DEFAULT_SSH_PORT,
            connection: ConnectionPolicy::default(),
            hosts: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Get the IPC address (localhost:port)
    pub fn ipc_address(&self) -> String {
        format!("127.0.0.1:{}", self.ipc_port)
    }

    /// Protocol scheme, honouring the environment override
    pub fn resolved_protocol(&self) -> String {
        std::env::var(PROTOCOL_ENV)
            .ok()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| self.protocol.clone())
    }

    /// SSH username for a host
    pub fn username_for<'a>(&'a self, host: &'a Host) -> &'a str {
        host.username.as_deref().unwrap_or(&self.username)
    }
}
