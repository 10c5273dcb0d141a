//! Core domain types

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;

/// Unique identifier for a host: its normalized address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostId(String);

impl HostId {
    /// Normalize an address into a host ID
    pub fn from_address(address: &str) -> Self {
        Self(address.trim().trim_end_matches('/').to_lowercase())
    }

    /// Get the raw ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Stable file-name-safe digest of this ID (16 hex chars)
    pub fn key_name(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        hex::encode(digest)[..16].to_string()
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A configured remote endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    /// Display name (mutable, not unique)
    pub title: String,

    /// Connection endpoint
    pub address: String,

    /// Cached credential used to register the public key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,

    /// SSH username for the sync channel (falls back to the global default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl Host {
    /// Create a host with just a title and address
    pub fn new(title: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            address: address.into(),
            credential: None,
            username: None,
        }
    }

    /// Identity of this host
    pub fn id(&self) -> HostId {
        HostId::from_address(&self.address)
    }

    /// Whether `reference` names this host, by address first and then by title
    pub fn matches(&self, reference: &HostRef) -> bool {
        let raw = reference.as_str();
        self.id() == HostId::from_address(raw) || self.title.eq_ignore_ascii_case(raw.trim())
    }
}

/// Caller-supplied reference to a host (address or title)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostRef(String);

impl HostRef {
    /// Create a new host reference
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Get the raw reference
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HostRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for HostRef {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for HostRef {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&Host> for HostRef {
    fn from(host: &Host) -> Self {
        Self(host.address.clone())
    }
}

/// Identifier of one session instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    /// Allocate a fresh session ID
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reason a session ended up in the error state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureCause {
    /// Key pair could not be generated
    KeyGenerationFailed,
    /// Host refused the public key
    UploadRejected,
    /// Host could not be reached
    NetworkUnreachable,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::KeyGenerationFailed => write!(f, "key-generation-failed"),
            FailureCause::UploadRejected => write!(f, "upload-rejected"),
            FailureCause::NetworkUnreachable => write!(f, "network-unreachable"),
        }
    }
}

/// Connection progress of a single session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "cause", rename_all = "kebab-case")]
pub enum ConnectionState {
    /// Not connected
    Offline,
    /// Provisioning has begun
    Starting,
    /// Generating a local key pair
    CreatingSshKey,
    /// Registering the public key with the host
    UploadingSshKey,
    /// Sync channel is up
    Online,
    /// Provisioning or reconnecting gave up
    Error(FailureCause),
}

impl ConnectionState {
    /// Position along the forward path (error sorts last)
    pub fn stage(&self) -> u8 {
        match self {
            ConnectionState::Offline => 0,
            ConnectionState::Starting => 1,
            ConnectionState::CreatingSshKey => 2,
            ConnectionState::UploadingSshKey => 3,
            ConnectionState::Online => 4,
            ConnectionState::Error(_) => 5,
        }
    }

    /// Whether provisioning is in progress
    pub fn is_provisioning(&self) -> bool {
        matches!(
            self,
            ConnectionState::Starting
                | ConnectionState::CreatingSshKey
                | ConnectionState::UploadingSshKey
        )
    }

    /// Projection onto the externally visible vocabulary
    pub fn status(&self) -> Status {
        match self {
            ConnectionState::Offline | ConnectionState::Error(_) => Status::Offline,
            ConnectionState::Starting => Status::Starting,
            ConnectionState::CreatingSshKey => Status::CreatingSshKey,
            ConnectionState::UploadingSshKey => Status::UploadingSshKey,
            ConnectionState::Online => Status::Online,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Error(cause) => write!(f, "error ({})", cause),
            other => write!(f, "{}", other.status()),
        }
    }
}

/// Aggregate connectivity status shown to the shell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    Offline,
    Starting,
    CreatingSshKey,
    UploadingSshKey,
    Online,
}

impl Status {
    /// Tray-level indicator for this status
    pub fn indicator(&self) -> Indicator {
        match self {
            Status::Online => Indicator::Online,
            Status::Offline => Indicator::Offline,
            _ => Indicator::Busy,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Offline => "offline",
            Status::Starting => "starting",
            Status::CreatingSshKey => "creating-ssh-key",
            Status::UploadingSshKey => "uploading-ssh-key",
            Status::Online => "online",
        };
        write!(f, "{}", s)
    }
}

/// Tray icon indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Indicator {
    Online,
    Offline,
    Busy,
}

/// A provisioned SSH identity for one host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyInfo {
    /// OpenSSH public key line (`type base64 comment`)
    pub openssh: String,
    /// Key fingerprint
    pub fingerprint: String,
    /// Location of the private key
    pub private_key_path: PathBuf,
}
