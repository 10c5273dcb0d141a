//! hl-manager: Connection lifecycle manager for hostlink
//!
//! Owns one supervised session per configured host, drives each through
//! key provisioning and sync-channel establishment, tracks which session is
//! active, and derives a single aggregate status for the shell.

pub mod connection;
pub mod ipc;
pub mod session;
pub mod status;

pub use connection::Capabilities;
pub use session::{CleanupReport, Notification, SessionManager, SessionManagerHandle};
pub use status::StatusAggregator;
