//! hl-ssh: Concrete capabilities for the hostlink session manager
//!
//! - [`FileKeyStore`] keeps one ed25519 key pair per host on disk
//! - [`HttpKeyUploader`] registers a public key with a host over HTTPS
//! - [`SshTransport`] opens the SSH sync channel and probes it

pub mod keys;
pub mod tunnel;
pub mod upload;

pub use keys::FileKeyStore;
pub use tunnel::{SshChannel, SshTransport};
pub use upload::HttpKeyUploader;
