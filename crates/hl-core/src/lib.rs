//! hl-core: Core abstractions and configuration for hostlink
//!
//! This crate provides the shared types, error taxonomy, configuration,
//! capability traits and IPC messages used by the session manager, the SSH
//! capability implementations and the CLI.

pub mod config;
pub mod error;
pub mod ipc;
pub mod link;
pub mod pidfile;
pub mod traits;
pub mod types;

pub use error::{ConfigError, HlError, ProvisioningError, SessionError, TransportError};
pub use types::{
    ConnectionState, FailureCause, Host, HostId, HostRef, Indicator, PublicKeyInfo, SessionId,
    Status,
};
