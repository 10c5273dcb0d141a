//! IPC client for talking to a running instance
//!
//! Uses TCP on localhost for cross-platform compatibility.

mod client;

pub use client::{ClientError, InstanceClient};

pub use hl_core::ipc::{default_ipc_address, ManagerStatus, SessionInfo};
