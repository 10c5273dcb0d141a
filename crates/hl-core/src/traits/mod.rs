//! Capability trait definitions
//!
//! The session manager drives hosts through these seams; concrete
//! implementations live in `hl-ssh`.

mod provision;
mod transport;

pub use provision::{KeyStore, KeyUploader};
pub use transport::{SyncChannel, SyncTransport};
