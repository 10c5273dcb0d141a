//! IPC client for communicating with a running instance
//!
//! One JSON request per line, one JSON response per line.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use hl_core::ipc::{default_ipc_address, IpcRequest, IpcResponse, ManagerStatus, SessionInfo};
use hl_core::HostRef;

/// Failures talking to the running instance
#[derive(Error, Debug)]
pub enum ClientError {
    /// Nothing is listening on the IPC address
    #[error("No running instance at {0}")]
    NotRunning(String),

    /// The instance answered with an error
    #[error("{0}")]
    Remote(String),

    /// The instance answered with something other than what was asked for
    #[error("Unexpected response: {0}")]
    Unexpected(String),

    /// The instance closed the connection without answering
    #[error("Connection closed by instance")]
    Closed,

    #[error("IPC I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed IPC message: {0}")]
    Json(#[from] serde_json::Error),
}

/// Client for a running hostlink instance
pub struct InstanceClient {
    address: String,
    stream: Option<BufReader<TcpStream>>,
}

impl InstanceClient {
    /// Create a new client with the default address
    pub fn new() -> Self {
        Self::with_address(default_ipc_address())
    }

    /// Create a new client with a custom address
    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            stream: None,
        }
    }

    /// Get the address
    pub fn address(&self) -> &str {
        &self.address
    }

    async fn connect(&mut self) -> Result<&mut BufReader<TcpStream>, ClientError> {
        if self.stream.is_none() {
            tracing::debug!("Connecting to instance at {}", self.address);
            let stream = TcpStream::connect(&self.address).await.map_err(|e| {
                if matches!(
                    e.kind(),
                    io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
                ) {
                    ClientError::NotRunning(self.address.clone())
                } else {
                    ClientError::Io(e)
                }
            })?;
            self.stream = Some(BufReader::new(stream));
        }

        self.stream.as_mut().ok_or(ClientError::Closed)
    }

    /// Whether an instance answers on the address
    pub async fn ping(&mut self) -> bool {
        matches!(self.send(IpcRequest::Ping).await, Ok(IpcResponse::Pong))
    }

    /// Sessions and aggregate status
    pub async fn status(&mut self) -> Result<ManagerStatus, ClientError> {
        match self.send(IpcRequest::GetStatus).await? {
            IpcResponse::Status(status) => Ok(status),
            other => unexpected(other),
        }
    }

    /// Open a host (or the default one)
    pub async fn open(
        &mut self,
        host: Option<HostRef>,
        auto_connect: bool,
    ) -> Result<Option<SessionInfo>, ClientError> {
        self.session(IpcRequest::Open { host, auto_connect }).await
    }

    /// Forward a protocol link
    pub async fn open_link(&mut self, url: &str) -> Result<Option<SessionInfo>, ClientError> {
        self.session(IpcRequest::OpenLink {
            url: url.to_string(),
        })
        .await
    }

    /// Switch the active host without connecting
    pub async fn set(&mut self, host: HostRef) -> Result<Option<SessionInfo>, ClientError> {
        self.session(IpcRequest::Set { host }).await
    }

    /// Tear down and re-provision a host (default: the active one)
    pub async fn force_restart(&mut self, host: Option<HostRef>) -> Result<(), ClientError> {
        self.ok(IpcRequest::ForceRestart { host }).await
    }

    /// Disconnect a host (default: the active one)
    pub async fn disconnect(&mut self, host: Option<HostRef>) -> Result<(), ClientError> {
        self.ok(IpcRequest::Disconnect { host }).await
    }

    /// Ask the instance to re-read its host list
    pub async fn reload_hosts(&mut self) -> Result<(), ClientError> {
        self.ok(IpcRequest::ReloadHosts).await
    }

    /// Ask the instance to clean up and exit
    pub async fn shutdown(&mut self) -> Result<(), ClientError> {
        self.ok(IpcRequest::Shutdown).await
    }

    async fn session(&mut self, request: IpcRequest) -> Result<Option<SessionInfo>, ClientError> {
        match self.send(request).await? {
            IpcResponse::Session { session } => Ok(session),
            other => unexpected(other),
        }
    }

    async fn ok(&mut self, request: IpcRequest) -> Result<(), ClientError> {
        match self.send(request).await? {
            IpcResponse::Ok => Ok(()),
            other => unexpected(other),
        }
    }

    async fn send(&mut self, request: IpcRequest) -> Result<IpcResponse, ClientError> {
        let stream = self.connect().await?;

        let mut request_json = serde_json::to_string(&request)?;
        request_json.push('\n');
        stream.get_mut().write_all(request_json.as_bytes()).await?;

        let mut response_line = String::new();
        if stream.read_line(&mut response_line).await? == 0 {
            self.stream = None;
            return Err(ClientError::Closed);
        }

        match serde_json::from_str(&response_line)? {
            IpcResponse::Error { message } => Err(ClientError::Remote(message)),
            response => Ok(response),
        }
    }
}

impl Default for InstanceClient {
    fn default() -> Self {
        Self::new()
    }
}

fn unexpected<T>(response: IpcResponse) -> Result<T, ClientError> {
    Err(ClientError::Unexpected(format!("{:?}", response)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Answers every request line with `reply`
    async fn fake_instance(reply: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(_)) = lines.next_line().await {
                writer.write_all(reply.as_bytes()).await.unwrap();
                writer.write_all(b"\n").await.unwrap();
            }
        });
        address
    }

    #[tokio::test]
    async fn test_not_running() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let mut client = InstanceClient::with_address(address);
        assert!(matches!(
            client.status().await,
            Err(ClientError::NotRunning(_))
        ));
        assert!(!client.ping().await);
    }

    #[tokio::test]
    async fn test_remote_error_is_surfaced() {
        let address = fake_instance(r#"{"type":"error","message":"No active session"}"#).await;
        let mut client = InstanceClient::with_address(address);

        match client.force_restart(None).await {
            Err(ClientError::Remote(message)) => assert_eq!(message, "No active session"),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connection_is_reused() {
        let address = fake_instance(r#"{"type":"pong"}"#).await;
        let mut client = InstanceClient::with_address(address);

        // The fake accepts a single connection
        assert!(client.ping().await);
        assert!(client.ping().await);
    }

    #[tokio::test]
    async fn test_unexpected_response() {
        let address = fake_instance(r#"{"type":"pong"}"#).await;
        let mut client = InstanceClient::with_address(address);
        assert!(matches!(
            client.shutdown().await,
            Err(ClientError::Unexpected(_))
        ));
    }
}
