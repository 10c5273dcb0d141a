//! Core error types for hostlink

use std::path::PathBuf;
use thiserror::Error;

use crate::types::FailureCause;

/// Top-level error type for the hostlink ecosystem
#[derive(Error, Debug)]
pub enum HlError {
    /// Provisioning error
    #[error("Provisioning error: {0}")]
    Provisioning(#[from] ProvisioningError),

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Session error
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures while creating or registering a host's SSH identity
#[derive(Error, Debug, Clone)]
pub enum ProvisioningError {
    /// Key pair could not be generated or stored
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// The host refused the public key (authentication failure)
    #[error("Key upload rejected: {0}")]
    UploadRejected(String),

    /// The host could not be reached
    #[error("Network error: {0}")]
    Network(String),
}

impl ProvisioningError {
    /// Whether another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ProvisioningError::UploadRejected(_))
    }

    /// The cause reported when this error ends provisioning
    pub fn cause(&self) -> FailureCause {
        match self {
            ProvisioningError::KeyGeneration(_) => FailureCause::KeyGenerationFailed,
            ProvisioningError::UploadRejected(_) => FailureCause::UploadRejected,
            ProvisioningError::Network(_) => FailureCause::NetworkUnreachable,
        }
    }
}

/// Sync channel failures
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// Channel could not be established
    #[error("Host unreachable: {0}")]
    Unreachable(String),

    /// Liveness probe failed
    #[error("Probe failed: {0}")]
    ProbeFailed(String),

    /// Operation exceeded its time budget
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Channel is already closed
    #[error("Channel closed")]
    Closed,
}

/// Session manager errors
#[derive(Error, Debug, Clone)]
pub enum SessionError {
    /// No configured host matches the reference
    #[error("Unknown host: {0}")]
    UnknownHost(String),

    /// No host was named and no session is active
    #[error("No active session")]
    NoActiveSession,

    /// The manager task is no longer running
    #[error("Session manager stopped")]
    ManagerStopped,
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// No hosts are configured
    #[error("No hosts configured")]
    NoHosts,
}
