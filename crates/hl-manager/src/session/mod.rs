//! Session manager
//!
//! One session per configured host, at most one of them active. A single
//! actor task owns the session table and the active pointer; callers talk to
//! it through a cloneable [`SessionManagerHandle`] and observe it through a
//! broadcast channel of [`Notification`]s.

mod manager;

pub use manager::{SessionManager, SessionManagerHandle};

use serde::{Deserialize, Serialize};

use hl_core::ipc::SessionInfo;
use hl_core::{ConnectionState, Host, Status};

/// Events emitted to the shell
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// The active session changed (or was re-selected)
    Switch(SessionInfo),
    /// An open was requested but no hosts are configured
    OpenPreferences,
    /// The aggregate status changed
    Change(Status),
    /// A session's connection state changed
    StateChanged {
        host: Host,
        state: ConnectionState,
    },
}

/// Outcome of tearing down every session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Teardowns that finished in time
    pub completed: usize,
    /// Teardowns still running when the timeout hit
    pub abandoned: usize,
}
