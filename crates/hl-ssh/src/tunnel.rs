//! SSH sync channel
//!
//! Authenticates with the host's provisioned key and keeps a session channel
//! open. Probing opens and closes a second channel, which fails quickly once
//! the connection is gone.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;
use russh::client::{self, Config, Handle, Msg};
use russh::{Channel, Disconnect};
use russh_keys::key::PublicKey;
use tokio::sync::Mutex;

use hl_core::config::DEFAULT_SSH_PORT;
use hl_core::traits::{SyncChannel, SyncTransport};
use hl_core::{Host, PublicKeyInfo, TransportError};

/// Opens SSH sync channels
pub struct SshTransport {
    config: Arc<Config>,
    username: String,
    port: u16,
}

impl SshTransport {
    /// Create a transport that logs in as `username` unless a host overrides it
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            config: Arc::new(Config::default()),
            username: username.into(),
            port: DEFAULT_SSH_PORT,
        }
    }

    /// Port used when the address does not name an SSH port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// `host:port` to dial for `host`.
    ///
    /// Bare addresses may carry their own port. Addresses with a scheme
    /// (such as an HTTPS registration URL) only contribute their host name.
    pub fn target(&self, host: &Host) -> Result<String, TransportError> {
        let address = host.address.trim();
        let (raw, own_port) = if address.contains("://") {
            (address.to_string(), false)
        } else {
            (format!("ssh://{}", address), true)
        };

        let url = Url::parse(&raw)
            .map_err(|e| TransportError::Unreachable(format!("bad address {:?}: {}", address, e)))?;
        let name = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| TransportError::Unreachable(format!("no host in {:?}", address)))?;
        let port = if own_port {
            url.port().unwrap_or(self.port)
        } else {
            self.port
        };
        Ok(format!("{}:{}", name, port))
    }
}

#[async_trait]
impl SyncTransport for SshTransport {
    async fn open(
        &self,
        host: &Host,
        key: &PublicKeyInfo,
    ) -> Result<Arc<dyn SyncChannel>, TransportError> {
        let target = self.target(host)?;
        let username = host.username.as_deref().unwrap_or(&self.username);

        let pair = russh_keys::load_secret_key(&key.private_key_path, None).map_err(|e| {
            TransportError::Unreachable(format!(
                "cannot load key {:?}: {}",
                key.private_key_path, e
            ))
        })?;

        tracing::debug!("Connecting to {} as {}", target, username);
        let handler = HostKeyHandler {
            target: target.clone(),
        };
        let mut session = client::connect(Arc::clone(&self.config), target.as_str(), handler)
            .await
            .map_err(|e| TransportError::Unreachable(format!("{}: {}", target, e)))?;

        let authenticated = session
            .authenticate_publickey(username, Arc::new(pair))
            .await
            .map_err(|e| TransportError::Unreachable(format!("authentication error: {}", e)))?;
        if !authenticated {
            return Err(TransportError::Unreachable(format!(
                "{} refused key {} for {}",
                target, key.fingerprint, username
            )));
        }

        let channel = session
            .channel_open_session()
            .await
            .map_err(|e| TransportError::Unreachable(format!("failed to open channel: {}", e)))?;

        tracing::info!("SSH session to {} open", target);
        Ok(Arc::new(SshChannel {
            target,
            session,
            channel: Mutex::new(Some(channel)),
            closed: AtomicBool::new(false),
        }))
    }
}

/// A live SSH session plus its sync channel
pub struct SshChannel {
    target: String,
    session: Handle<HostKeyHandler>,
    channel: Mutex<Option<Channel<Msg>>>,
    closed: AtomicBool,
}

#[async_trait]
impl SyncChannel for SshChannel {
    async fn probe(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) || self.session.is_closed() {
            return Err(TransportError::Closed);
        }

        let probe = self
            .session
            .channel_open_session()
            .await
            .map_err(|e| TransportError::ProbeFailed(format!("{}: {}", self.target, e)))?;
        if let Err(e) = probe.close().await {
            tracing::debug!("Closing probe channel to {} failed: {}", self.target, e);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(channel) = self.channel.lock().await.take() {
            if let Err(e) = channel.close().await {
                tracing::debug!("Closing sync channel to {} failed: {}", self.target, e);
            }
        }

        if self.session.is_closed() {
            return Ok(());
        }
        self.session
            .disconnect(Disconnect::ByApplication, "closing", "en")
            .await
            .map_err(|e| TransportError::Unreachable(format!("disconnect failed: {}", e)))?;
        tracing::debug!("SSH session to {} closed", self.target);
        Ok(())
    }
}

/// Client handler; host authenticity rests on the HTTPS key registration
struct HostKeyHandler {
    target: String,
}

#[async_trait]
impl client::Handler for HostKeyHandler {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        tracing::debug!(
            "Host key for {}: {}",
            self.target,
            server_public_key.fingerprint()
        );
        Ok(true)
    }
}
