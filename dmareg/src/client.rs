//! dmareg IPC client
//!
//! A client owns one connection, and with it one session: ranges it
//! registers stay resolvable until every connection from the same process
//! is gone.

use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

use crate::entry::{HandleId, RangeEntry, RangeInfo};
use crate::ipc::{IpcRequest, IpcResponse};
use crate::registry::RegistryStats;
use crate::RegistryError;

/// Default daemon socket
pub const DEFAULT_SOCKET: &str = "/run/dmareg/dmareg.sock";

/// Client errors
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Service unavailable")]
    ServiceUnavailable,
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Registry client
pub struct RegistryClient {
    stream: BufReader<UnixStream>,
}

impl RegistryClient {
    /// Connect to the daemon at `path`
    pub async fn connect(path: impl Into<PathBuf>) -> Result<Self> {
        let socket_path: PathBuf = path.into();
        let stream = UnixStream::connect(&socket_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ClientError::ServiceUnavailable
            } else {
                ClientError::ConnectionFailed(e.to_string())
            }
        })?;

        debug!("Connected to {}", socket_path.display());
        Ok(Self {
            stream: BufReader::new(stream),
        })
    }

    /// Send one request and wait for its response
    pub async fn request(&mut self, request: &IpcRequest) -> Result<IpcResponse> {
        let json = serde_json::to_string(request)
            .map_err(|e| ClientError::Protocol(e.to_string()))?;

        let stream = self.stream.get_mut();
        stream.write_all(json.as_bytes()).await?;
        stream.write_all(b"\n").await?;
        stream.flush().await?;

        let mut line = String::new();
        if self.stream.read_line(&mut line).await? == 0 {
            return Err(ClientError::ConnectionFailed("daemon closed the connection".into()));
        }

        serde_json::from_str(&line).map_err(|e| ClientError::Protocol(e.to_string()))
    }

    /// Send a request, turning an error response into `ClientError::Registry`
    async fn call(&mut self, request: IpcRequest) -> Result<IpcResponse> {
        match self.request(&request).await? {
            IpcResponse::Error { code, message, range, .. } => {
                Err(RegistryError::from_code(code, message, range).into())
            }
            response => Ok(response),
        }
    }

    pub async fn add(&mut self, handle: HandleId, base: u64, size: u64) -> Result<()> {
        match self.call(IpcRequest::Add { handle, base, size }).await? {
            IpcResponse::Success { .. } => Ok(()),
            _ => Err(ClientError::Protocol("Unexpected response".into())),
        }
    }

    pub async fn remove_by_addr(&mut self, addr: u64) -> Result<()> {
        match self.call(IpcRequest::RemoveByAddr { addr }).await? {
            IpcResponse::Success { .. } => Ok(()),
            _ => Err(ClientError::Protocol("Unexpected response".into())),
        }
    }

    pub async fn remove_by_fd(&mut self, handle: HandleId) -> Result<()> {
        match self.call(IpcRequest::RemoveByFd { handle }).await? {
            IpcResponse::Success { .. } => Ok(()),
            _ => Err(ClientError::Protocol("Unexpected response".into())),
        }
    }

    pub async fn query(&mut self, addr: u64, len: u64) -> Result<RangeInfo> {
        match self.call(IpcRequest::Query { addr, len }).await? {
            IpcResponse::Range { base, size, handle } => Ok(RangeInfo { base, size, handle }),
            _ => Err(ClientError::Protocol("Unexpected response".into())),
        }
    }

    pub async fn list(&mut self) -> Result<Vec<RangeEntry>> {
        match self.call(IpcRequest::List).await? {
            IpcResponse::Ranges { ranges } => Ok(ranges),
            _ => Err(ClientError::Protocol("Unexpected response".into())),
        }
    }

    pub async fn status(&mut self) -> Result<RegistryStats> {
        match self.call(IpcRequest::Status).await? {
            IpcResponse::Status { contexts, ranges, context_refs, .. } => Ok(RegistryStats {
                contexts,
                ranges,
                context_refs,
            }),
            _ => Err(ClientError::Protocol("Unexpected response".into())),
        }
    }
}
