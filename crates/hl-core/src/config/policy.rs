//! Connection lifecycle tuning

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::{duration_millis, duration_secs};

/// Retry, liveness and shutdown settings applied to every session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionPolicy {
    /// Backoff between provisioning attempts and between reconnects
    pub backoff: BackoffConfig,

    /// Attempts per provisioning step (key generation, upload, channel)
    pub provision_attempts: u32,

    /// Time budget for establishing the sync channel
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Interval between liveness probes while online
    #[serde(with = "duration_secs")]
    pub probe_interval: Duration,

    /// Time budget for a single probe
    #[serde(with = "duration_secs")]
    pub probe_timeout: Duration,

    /// Consecutive probe failures that take a session offline
    pub probe_failure_threshold: u32,

    /// Automatic reconnect cycles before giving up with an error
    pub max_reconnects: u32,

    /// Time budget for closing one channel
    #[serde(rename = "teardown_timeout_ms", with = "duration_millis")]
    pub teardown_timeout: Duration,

    /// Time budget for shutting down every session. Each session may spend
    /// `teardown_timeout` on its step and again on its channel.
    #[serde(with = "duration_secs")]
    pub cleanup_timeout: Duration,
}

impl Default for ConnectionPolicy {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            provision_attempts: 3,
            connect_timeout: Duration::from_secs(30),
            probe_interval: Duration::from_secs(15),
            probe_timeout: Duration::from_secs(10),
            probe_failure_threshold: 3,
            max_reconnects: 10,
            teardown_timeout: Duration::from_millis(3000),
            cleanup_timeout: Duration::from_secs(8),
        }
    }
}

/// Exponential backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Initial delay
    #[serde(rename = "initial_ms", with = "duration_millis")]
    pub initial: Duration,

    /// Maximum delay
    #[serde(with = "duration_secs")]
    pub max: Duration,

    /// Multiplier for each retry
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}
