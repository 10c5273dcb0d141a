//! IPC server implementation
//!
//! Listens on localhost TCP for JSON-line requests. Uses TCP on 127.0.0.1
//! for cross-platform compatibility.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use hl_core::config::HostStore;
use hl_core::ipc::{IpcRequest, IpcResponse};
use hl_core::SessionError;

use crate::session::SessionManagerHandle;

/// IPC server for CLI and second-instance requests
///
/// Listens on localhost (127.0.0.1) only - not accessible from network.
pub struct IpcServer {
    listener: TcpListener,
    manager: SessionManagerHandle,
    hosts: Arc<dyn HostStore>,
    shutdown_token: CancellationToken,
}

impl IpcServer {
    /// Bind the server to `address`.
    ///
    /// `shutdown_token` is cancelled when a client asks the instance to stop
    /// and also stops the accept loop.
    pub async fn bind(
        address: &str,
        manager: SessionManagerHandle,
        hosts: Arc<dyn HostStore>,
        shutdown_token: CancellationToken,
    ) -> Result<Self> {
        let listener = TcpListener::bind(address)
            .await
            .with_context(|| format!("Failed to bind IPC server to {}", address))?;

        Ok(Self {
            listener,
            manager,
            hosts,
            shutdown_token,
        })
    }

    /// Address actually bound (useful when binding port 0)
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept clients until the shutdown token is cancelled
    pub async fn run(self) -> Result<()> {
        tracing::info!("IPC server listening on {}", self.local_addr()?);

        loop {
            tokio::select! {
                _ = self.shutdown_token.cancelled() => {
                    tracing::debug!("IPC server shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        // Only accept connections from localhost
                        if !peer_addr.ip().is_loopback() {
                            tracing::warn!("Rejected non-localhost connection from {}", peer_addr);
                            continue;
                        }

                        let manager = self.manager.clone();
                        let hosts = Arc::clone(&self.hosts);
                        let shutdown_token = self.shutdown_token.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_client(stream, manager, hosts, shutdown_token).await {
                                tracing::warn!("IPC client error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Failed to accept IPC connection: {}", e);
                    }
                },
            }
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    manager: SessionManagerHandle,
    hosts: Arc<dyn HostStore>,
    shutdown_token: CancellationToken,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            break; // EOF
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<IpcRequest>(trimmed) {
            Ok(request) => handle_request(request, &manager, hosts.as_ref(), &shutdown_token).await,
            Err(e) => IpcResponse::Error {
                message: format!("Invalid request: {}", e),
            },
        };

        let mut response_json = serde_json::to_string(&response)?;
        response_json.push('\n');
        writer.write_all(response_json.as_bytes()).await?;
    }

    Ok(())
}

async fn handle_request(
    request: IpcRequest,
    manager: &SessionManagerHandle,
    hosts: &dyn HostStore,
    shutdown_token: &CancellationToken,
) -> IpcResponse {
    tracing::debug!("IPC request: {:?}", request);

    match request {
        IpcRequest::Open { host, auto_connect } => {
            session_response(manager.open(host, auto_connect).await)
        }
        IpcRequest::OpenLink { url } => session_response(manager.open_link(url).await),
        IpcRequest::Set { host } => session_response(manager.set(host).await),
        IpcRequest::ForceRestart { host } => ok_response(manager.force_restart(host).await),
        IpcRequest::Disconnect { host } => ok_response(manager.disconnect(host).await),
        IpcRequest::ReloadHosts => match hosts.hosts() {
            Ok(list) => {
                tracing::info!("Reloading {} hosts", list.len());
                ok_response(manager.update_hosts(list).await)
            }
            Err(e) => IpcResponse::Error {
                message: format!("Failed to read hosts: {}", e),
            },
        },
        IpcRequest::GetStatus => match manager.snapshot().await {
            Ok(status) => IpcResponse::Status(status),
            Err(e) => error_response(e),
        },
        IpcRequest::Ping => IpcResponse::Pong,
        IpcRequest::Shutdown => {
            tracing::info!("Shutdown requested over IPC");
            shutdown_token.cancel();
            IpcResponse::Ok
        }
    }
}

fn session_response(
    result: Result<Option<hl_core::ipc::SessionInfo>, SessionError>,
) -> IpcResponse {
    match result {
        Ok(session) => IpcResponse::Session { session },
        Err(e) => error_response(e),
    }
}

fn ok_response(result: Result<(), SessionError>) -> IpcResponse {
    match result {
        Ok(()) => IpcResponse::Ok,
        Err(e) => error_response(e),
    }
}

fn error_response(error: SessionError) -> IpcResponse {
    IpcResponse::Error {
        message: error.to_string(),
    }
}
