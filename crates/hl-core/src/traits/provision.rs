//! Identity provisioning traits

use async_trait::async_trait;

use crate::error::ProvisioningError;
use crate::types::{Host, PublicKeyInfo};

/// Local cache of per-host key pairs
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Look up a usable cached key for `host`.
    ///
    /// Returns `Ok(None)` when no key exists or the cached one is unusable.
    async fn load(&self, host: &Host) -> Result<Option<PublicKeyInfo>, ProvisioningError>;

    /// Generate and persist a fresh key pair for `host`
    async fn generate(&self, host: &Host) -> Result<PublicKeyInfo, ProvisioningError>;
}

/// Registers a public key with a host
#[async_trait]
pub trait KeyUploader: Send + Sync {
    /// Push `key` to `host`.
    ///
    /// `ProvisioningError::UploadRejected` means the host refused the
    /// credential and retrying will not help.
    async fn upload(&self, host: &Host, key: &PublicKeyInfo) -> Result<(), ProvisioningError>;
}
