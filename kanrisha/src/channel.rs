//! Command channel between kanrisha clients and the running daemon.
//!
//! A request is a single command byte, followed for commands that take a
//! service name by the name and a NUL terminator. The client half-closes
//! its side after writing. The response is a big-endian `i32` result code
//! followed by a UTF-8 body until EOF.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

/// Most bytes discarded from the tail of an overlong request.
const DRAIN_LIMIT: u64 = 64 * 1024;

/// Command byte values on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandCode {
    StartOne = 1,
    StartAll = 2,
    StopOne = 3,
    StopAll = 4,
    RestartOne = 5,
    Status = 6,
    ShowLog = 7,
    ListAvailable = 8,
    ListEnabled = 9,
    ListRunning = 10,
    Enable = 11,
    Disable = 12,
}

impl CommandCode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            1 => Self::StartOne,
            2 => Self::StartAll,
            3 => Self::StopOne,
            4 => Self::StopAll,
            5 => Self::RestartOne,
            6 => Self::Status,
            7 => Self::ShowLog,
            8 => Self::ListAvailable,
            9 => Self::ListEnabled,
            10 => Self::ListRunning,
            11 => Self::Enable,
            12 => Self::Disable,
            _ => return None,
        })
    }

    /// Whether the command carries a service name.
    pub fn takes_name(self) -> bool {
        !matches!(
            self,
            Self::StartAll
                | Self::StopAll
                | Self::ListAvailable
                | Self::ListEnabled
                | Self::ListRunning
        )
    }
}

/// A decoded client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    StartOne(String),
    StartAll,
    StopOne(String),
    StopAll,
    RestartOne(String),
    Status(String),
    ShowLog(String),
    ListAvailable,
    ListEnabled,
    ListRunning,
    Enable(String),
    Disable(String),
}

impl Request {
    pub fn code(&self) -> CommandCode {
        match self {
            Request::StartOne(_) => CommandCode::StartOne,
            Request::StartAll => CommandCode::StartAll,
            Request::StopOne(_) => CommandCode::StopOne,
            Request::StopAll => CommandCode::StopAll,
            Request::RestartOne(_) => CommandCode::RestartOne,
            Request::Status(_) => CommandCode::Status,
            Request::ShowLog(_) => CommandCode::ShowLog,
            Request::ListAvailable => CommandCode::ListAvailable,
            Request::ListEnabled => CommandCode::ListEnabled,
            Request::ListRunning => CommandCode::ListRunning,
            Request::Enable(_) => CommandCode::Enable,
            Request::Disable(_) => CommandCode::Disable,
        }
    }

    /// Service name argument, if the command has one.
    pub fn name(&self) -> Option<&str> {
        match self {
            Request::StartOne(name)
            | Request::StopOne(name)
            | Request::RestartOne(name)
            | Request::Status(name)
            | Request::ShowLog(name)
            | Request::Enable(name)
            | Request::Disable(name) => Some(name),
            _ => None,
        }
    }

    fn with_name(code: CommandCode, name: String) -> Self {
        match code {
            CommandCode::StartOne => Request::StartOne(name),
            CommandCode::StartAll => Request::StartAll,
            CommandCode::StopOne => Request::StopOne(name),
            CommandCode::StopAll => Request::StopAll,
            CommandCode::RestartOne => Request::RestartOne(name),
            CommandCode::Status => Request::Status(name),
            CommandCode::ShowLog => Request::ShowLog(name),
            CommandCode::ListAvailable => Request::ListAvailable,
            CommandCode::ListEnabled => Request::ListEnabled,
            CommandCode::ListRunning => Request::ListRunning,
            CommandCode::Enable => Request::Enable(name),
            CommandCode::Disable => Request::Disable(name),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = vec![self.code() as u8];
        if let Some(name) = self.name() {
            bytes.extend_from_slice(name.as_bytes());
            bytes.push(0);
        }
        bytes
    }

    /// Decode a raw request.
    ///
    /// The name runs up to the first NUL or the end of the input and is cut
    /// at `max_len` bytes. Unknown command bytes are reported as
    /// [`Decoded::Unrecognized`] rather than as an error.
    pub fn decode(bytes: &[u8], max_len: usize) -> Result<Decoded> {
        let (&byte, rest) = bytes
            .split_first()
            .ok_or_else(|| Error::Protocol("empty request".to_string()))?;

        let code = match CommandCode::from_byte(byte) {
            Some(code) => code,
            None => return Ok(Decoded::Unrecognized(byte)),
        };

        if !code.takes_name() {
            return Ok(Decoded::Request(Request::with_name(code, String::new())));
        }

        let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
        let raw = &rest[..end.min(max_len)];
        if raw.is_empty() {
            return Err(Error::Protocol(format!(
                "{:?} requires a service name",
                code
            )));
        }

        let name = String::from_utf8_lossy(raw).into_owned();
        Ok(Decoded::Request(Request::with_name(code, name)))
    }
}

/// Result of decoding a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Request(Request),
    Unrecognized(u8),
}

/// Result code and body sent back to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: i32,
    pub body: String,
}

impl Response {
    pub const OK: i32 = 0;
    pub const FAILURE: i32 = 1;
    pub const UNRECOGNIZED: i32 = -1;

    pub fn new(code: i32, body: impl Into<String>) -> Self {
        Self {
            code,
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(Self::OK, body)
    }

    pub fn failure(body: impl Into<String>) -> Self {
        Self::new(Self::FAILURE, body)
    }

    pub fn unrecognized(byte: u8) -> Self {
        Self::new(
            Self::UNRECOGNIZED,
            format!("error: unrecognized command {}\n", byte),
        )
    }

    pub fn is_success(&self) -> bool {
        self.code == Self::OK
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = self.code.to_be_bytes().to_vec();
        bytes.extend_from_slice(self.body.as_bytes());
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 4 {
            return Err(Error::Protocol(format!(
                "truncated response ({} bytes)",
                bytes.len()
            )));
        }

        let (head, body) = bytes.split_at(4);
        let mut code = [0u8; 4];
        code.copy_from_slice(head);

        Ok(Self {
            code: i32::from_be_bytes(code),
            body: String::from_utf8_lossy(body).into_owned(),
        })
    }
}

/// Listening end of the channel, owned by the daemon.
pub struct ChannelServer {
    path: PathBuf,
    mode: u32,
    listener: Option<UnixListener>,
}

impl ChannelServer {
    pub fn new(path: impl AsRef<Path>, mode: u32) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            mode,
            listener: None,
        }
    }

    /// Bind the socket, replacing a stale one.
    pub fn start(&mut self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }

        let listener = UnixListener::bind(&self.path)?;

        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(self.mode);
            std::fs::set_permissions(&self.path, permissions)?;
        }

        info!(path = %self.path.display(), "Command channel listening");
        self.listener = Some(listener);
        Ok(())
    }

    pub async fn accept(&self) -> Result<UnixStream> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| Error::Protocol("command channel not started".to_string()))?;

        let (stream, _addr) = listener.accept().await?;
        debug!("Accepted channel connection");
        Ok(stream)
    }

    /// Read one request from `stream`.
    ///
    /// Keeps at most the command byte, `max_len` name bytes and the
    /// terminator. The rest of an overlong request is read and dropped, so
    /// closing the connection does not reset it under the client.
    pub async fn read_request(stream: &mut UnixStream, max_len: usize) -> Result<Decoded> {
        let limit = max_len as u64 + 2;
        let mut bytes = Vec::new();
        {
            let mut reader = BufReader::new((&mut *stream).take(limit));
            reader.read_until(0, &mut bytes).await?;
        }

        if bytes.len() as u64 == limit && bytes.last() != Some(&0) {
            let mut tail = (&mut *stream).take(DRAIN_LIMIT);
            let dropped = tokio::io::copy(&mut tail, &mut tokio::io::sink()).await?;
            debug!(dropped = dropped, "Dropped the tail of an overlong request");
        }

        let decoded = Request::decode(&bytes, max_len)?;
        debug!(request = ?decoded, "Received channel request");
        Ok(decoded)
    }

    pub async fn write_response(stream: &mut UnixStream, response: &Response) -> Result<()> {
        stream.write_all(&response.encode()).await?;
        stream.flush().await?;
        stream.shutdown().await?;

        debug!(code = response.code, "Sent channel response");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ChannelServer {
    fn drop(&mut self) {
        if self.listener.is_some() && self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!(error = %e, "Failed to remove command channel");
            }
        }
    }
}

/// Client end of the channel.
pub struct ChannelClient {
    path: PathBuf,
}

impl ChannelClient {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Send `request` and wait for the full response.
    pub async fn send(&self, request: &Request) -> Result<Response> {
        let mut stream =
            UnixStream::connect(&self.path)
                .await
                .map_err(|e| Error::DaemonUnavailable {
                    path: self.path.clone(),
                    reason: e.to_string(),
                })?;

        stream.write_all(&request.encode()).await?;
        stream.shutdown().await?;

        let mut bytes = Vec::new();
        stream.read_to_end(&mut bytes).await?;
        Response::decode(&bytes)
    }
}
