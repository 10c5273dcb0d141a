//! Sync channel traits

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::TransportError;
use crate::types::{Host, PublicKeyInfo};

/// Establishes sync channels to hosts
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Open a channel to `host` authenticated with `key`
    ///
    /// A cancelled session keeps polling an in-flight open until it returns
    /// and then closes the channel. The future may still be dropped early
    /// (for example at the connect timeout), so anything allocated before
    /// the handshake completes must be released on drop.
    async fn open(
        &self,
        host: &Host,
        key: &PublicKeyInfo,
    ) -> Result<Arc<dyn SyncChannel>, TransportError>;
}

/// A live sync channel
#[async_trait]
pub trait SyncChannel: Send + Sync {
    /// Check that the remote end still answers
    async fn probe(&self) -> Result<(), TransportError>;

    /// Tear the channel down. Closing twice is not an error.
    async fn close(&self) -> Result<(), TransportError>;
}
