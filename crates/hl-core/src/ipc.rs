//! IPC protocol between a running instance and the CLI / second instances
//!
//! Uses JSON-encoded messages, one per line, over TCP on localhost
//! (127.0.0.1). TCP is used instead of Unix sockets for cross-platform
//! compatibility.

use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_IPC_PORT;
use crate::types::{ConnectionState, Host, HostRef, SessionId, Status};

/// IPC request from a client to the running instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcRequest {
    /// Open a host (or the default one) and optionally connect it
    Open {
        host: Option<HostRef>,
        #[serde(default = "default_true")]
        auto_connect: bool,
    },

    /// Forward a protocol link
    OpenLink { url: String },

    /// Switch the active host without connecting
    Set { host: HostRef },

    /// Tear down and re-provision a host (default: the active one)
    ForceRestart { host: Option<HostRef> },

    /// Disconnect a host (default: the active one)
    Disconnect { host: Option<HostRef> },

    /// Re-read the host list from the config file
    ReloadHosts,

    /// Get sessions and aggregate status
    #[serde(rename = "status")]
    GetStatus,

    /// Ping (for liveness)
    Ping,

    /// Clean up every session and exit
    Shutdown,
}

fn default_true() -> bool {
    true
}

/// IPC response from the running instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcResponse {
    /// Sessions and aggregate status
    Status(ManagerStatus),

    /// The session that was opened or switched to (none when no hosts exist)
    Session { session: Option<SessionInfo> },

    /// Generic success
    Ok,

    /// Error response
    Error { message: String },

    /// Pong response
    Pong,
}

/// Snapshot of the session manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerStatus {
    /// Aggregate status of the active session
    pub status: Status,
    /// Sessions in configuration order
    pub sessions: Vec<SessionInfo>,
}

impl ManagerStatus {
    /// The active session, if any
    pub fn active(&self) -> Option<&SessionInfo> {
        self.sessions.iter().find(|s| s.active)
    }
}

/// One session as seen from outside the manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Session instance ID
    pub id: SessionId,
    /// Host bound to the session
    pub host: Host,
    /// Current connection state
    pub state: ConnectionState,
    /// Whether this is the active session
    pub active: bool,
}

/// Default IPC address
pub fn default_ipc_address() -> String {
    format!("127.0.0.1:{}", DEFAULT_IPC_PORT)
}
