//! Per-host connection state machine
//!
//! The pure transition table lives in [`machine`]; [`driver`] runs one
//! supervised task per session that applies it and performs the I/O.

pub mod backoff;
pub mod driver;
pub mod machine;

use std::sync::Arc;

use hl_core::traits::{KeyStore, KeyUploader, SyncTransport};

pub use backoff::ExponentialBackoff;
pub use driver::{DriverHandle, SessionDriver, SessionUpdate};
pub use machine::{transition, Effect, Event, Transition};

/// External capabilities every session uses
#[derive(Clone)]
pub struct Capabilities {
    /// Local key cache
    pub keys: Arc<dyn KeyStore>,
    /// Public key registration
    pub uploader: Arc<dyn KeyUploader>,
    /// Sync channel establishment
    pub transport: Arc<dyn SyncTransport>,
}

impl Capabilities {
    pub fn new(
        keys: Arc<dyn KeyStore>,
        uploader: Arc<dyn KeyUploader>,
        transport: Arc<dyn SyncTransport>,
    ) -> Self {
        Self {
            keys,
            uploader,
            transport,
        }
    }
}
