//! IPC interface for the dmareg daemon
//!
//! Newline-delimited JSON over a Unix socket. Each connection is one
//! session bound to the address space of the connecting process.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info};

use crate::entry::{AddressSpaceId, HandleId, RangeEntry, RangeInfo};
use crate::error::{ErrorCode, RegistryError};
use crate::session::Session;
use crate::state::DaemonState;

/// IPC request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum IpcRequest {
    /// Register a buffer range
    Add { handle: HandleId, base: u64, size: u64 },

    /// Drop one registration of the range containing an address
    RemoveByAddr { addr: u64 },

    /// Drop one registration of a handle
    RemoveByFd { handle: HandleId },

    /// Resolve an address range to its buffer
    Query { addr: u64, len: u64 },

    /// List ranges of the caller's address space
    List,

    /// Get registry status
    Status,
}

/// IPC response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum IpcResponse {
    Success { message: String },
    Range { base: u64, size: u64, handle: HandleId },
    Ranges { ranges: Vec<RangeEntry> },
    Status {
        version: String,
        contexts: usize,
        ranges: usize,
        context_refs: u64,
    },
    Error {
        code: ErrorCode,
        errno: i32,
        message: String,
        /// Straddled entry, set for conflicts only
        #[serde(default, skip_serializing_if = "Option::is_none")]
        range: Option<RangeInfo>,
    },
}

impl From<RangeInfo> for IpcResponse {
    fn from(info: RangeInfo) -> Self {
        Self::Range {
            base: info.base,
            size: info.size,
            handle: info.handle,
        }
    }
}

impl From<RegistryError> for IpcResponse {
    fn from(err: RegistryError) -> Self {
        Self::Error {
            code: err.code(),
            errno: err.errno(),
            message: err.to_string(),
            range: err.conflict_range(),
        }
    }
}

/// IPC server
pub struct DmaregServer {
    socket_path: String,
    state: Arc<DaemonState>,
}

impl DmaregServer {
    pub fn new(socket_path: &str, state: Arc<DaemonState>) -> Self {
        Self {
            socket_path: socket_path.to_string(),
            state,
        }
    }

    /// Bind the socket, recreating a stale one
    pub fn bind(&self) -> Result<UnixListener> {
        let _ = std::fs::remove_file(&self.socket_path);

        if let Some(parent) = Path::new(&self.socket_path).parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;

        std::fs::set_permissions(
            &self.socket_path,
            std::os::unix::fs::PermissionsExt::from_mode(self.state.config.daemon.socket_mode),
        )?;

        info!("dmareg IPC listening on {}", self.socket_path);
        Ok(listener)
    }

    pub async fn run(&self) -> Result<()> {
        let listener = self.bind()?;
        self.serve(listener).await
    }

    /// Accept connections until the task is dropped
    pub async fn serve(&self, listener: UnixListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, state).await {
                            error!("Client error: {}", e);
                        }
                    });
                }
                Err(e) => error!("Accept error: {}", e),
            }
        }
    }
}

/// Address space of the process on the other end of `stream`
///
/// Keyed by pid and process start time, so a process that later reuses the
/// pid of a dead peer never joins that peer's context.
async fn peer_identity(stream: &UnixStream) -> Result<AddressSpaceId> {
    let cred = stream.peer_cred()?;
    let pid = cred
        .pid()
        .ok_or_else(|| anyhow!("peer credentials carry no pid"))?;
    let pid = u32::try_from(pid).map_err(|_| anyhow!("invalid peer pid {}", pid))?;
    let start_time = process_start_time(pid).await?;
    Ok(AddressSpaceId::from_process(pid, start_time))
}

/// Start time of `pid` in clock ticks since boot
async fn process_start_time(pid: u32) -> Result<u64> {
    let stat = tokio::fs::read_to_string(format!("/proc/{}/stat", pid)).await?;
    parse_start_time(&stat).ok_or_else(|| anyhow!("malformed /proc/{}/stat", pid))
}

/// Field 22 of a `/proc/<pid>/stat` line
fn parse_start_time(stat: &str) -> Option<u64> {
    // The command name may itself contain spaces and parentheses
    let (_, rest) = stat.rsplit_once(')')?;
    rest.split_whitespace().nth(19)?.parse().ok()
}

async fn handle_client(stream: UnixStream, state: Arc<DaemonState>) -> Result<()> {
    let identity = peer_identity(&stream).await?;
    let session = Session::open(&state.registry, identity)?;
    debug!("{}: connection opened", identity);

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();

    // The session closes when it drops, on EOF and on I/O errors alike
    loop {
        let next = read_request(&mut reader, &mut line, MAX_REQUEST_LINE).await?;
        let response: IpcResponse = match next {
            RequestLine::Eof => break,
            RequestLine::Oversized => RegistryError::InvalidArgument(format!(
                "request exceeds {} bytes",
                MAX_REQUEST_LINE
            ))
            .into(),
            RequestLine::Line => match serde_json::from_slice::<IpcRequest>(&line) {
                Ok(request) => process_request(request, &session),
                Err(e) => {
                    RegistryError::InvalidArgument(format!("malformed request: {}", e)).into()
                }
            },
        };

        let json = serde_json::to_string(&response)?;
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }

    debug!("{}: connection closed", identity);
    Ok(())
}

/// Longest request line the daemon buffers, newline included
pub const MAX_REQUEST_LINE: u64 = 64 * 1024;

/// What [`read_request`] left in the line buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestLine {
    /// One request, possibly unterminated at end of stream
    Line,
    /// The line ran past the limit and was skipped
    Oversized,
    Eof,
}

/// Read one newline-terminated request into `buf`, never buffering more
/// than `limit` bytes of it
async fn read_request<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    limit: u64,
) -> std::io::Result<RequestLine>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let n = (&mut *reader).take(limit).read_until(b'\n', buf).await?;
    if n == 0 {
        return Ok(RequestLine::Eof);
    }
    if buf.last() == Some(&b'\n') || (n as u64) < limit {
        return Ok(RequestLine::Line);
    }

    // Discard the rest of the line in bounded chunks
    loop {
        buf.clear();
        let n = (&mut *reader).take(limit).read_until(b'\n', buf).await?;
        if n == 0 || buf.last() == Some(&b'\n') {
            break;
        }
    }
    buf.clear();
    Ok(RequestLine::Oversized)
}

/// Run one request against the caller's session
pub fn process_request(request: IpcRequest, session: &Session) -> IpcResponse {
    match request {
        IpcRequest::Add { handle, base, size } => match session.add(handle, base, size) {
            Ok(()) => IpcResponse::Success {
                message: format!("{} registered", handle),
            },
            Err(e) => e.into(),
        },

        IpcRequest::RemoveByAddr { addr } => match session.remove_by_addr(addr) {
            Ok(()) => IpcResponse::Success {
                message: format!("Range at {:#x} released", addr),
            },
            Err(e) => e.into(),
        },

        IpcRequest::RemoveByFd { handle } => match session.remove_by_fd(handle) {
            Ok(()) => IpcResponse::Success {
                message: format!("{} released", handle),
            },
            Err(e) => e.into(),
        },

        IpcRequest::Query { addr, len } => match session.query(addr, len) {
            Ok(info) => info.into(),
            Err(e) => e.into(),
        },

        IpcRequest::List => IpcResponse::Ranges {
            ranges: session.ranges(),
        },

        IpcRequest::Status => {
            let stats = session.registry().stats();
            IpcResponse::Status {
                version: env!("CARGO_PKG_VERSION").to_string(),
                contexts: stats.contexts,
                ranges: stats.ranges,
                context_refs: stats.context_refs,
            }
        }
    }
}
