//! The per-server connection session and `INFO` reply framing.
//!
//! This is a miniature protocol client built directly on a TCP stream: it
//! maintains exactly one live connection per monitored server, performs the
//! optional `AUTH` handshake, writes the `INFO` command and frames the
//! length-prefixed bulk reply. Only the bulk-string framing needed for the
//! one-shot `AUTH`/`INFO` exchange is implemented, not the full RESP protocol.

use std::str;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;

use crate::server::MonitoredServer;

/// Protocol line terminator.
pub const EOL: &str = "\r\n";

/// Errors raised by the connection session.
///
/// Transport errors (`Connect`, `Io`, `ConnectionClosed`) are recoverable:
/// the connection is discarded and a new one is built on the next poll tick.
/// Protocol errors (`NoBulkResponse`, `BadHeader`) drop the current cycle but
/// keep the connection. `AuthDenied` is fatal for the session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection closed by server")]
    ConnectionClosed,
    #[error("no bulk response for INFO command")]
    NoBulkResponse,
    #[error("invalid bulk header: {0}")]
    BadHeader(String),
    #[error("authentication denied: {0}")]
    AuthDenied(String),
    #[error("invalid UTF-8 in reply")]
    InvalidUtf8(#[from] str::Utf8Error),
}

impl SessionError {
    /// Protocol errors abort the current cycle without discarding the
    /// connection; everything transport-level forces a reconnect.
    pub fn is_protocol(&self) -> bool {
        matches!(self, SessionError::NoBulkResponse | SessionError::BadHeader(_))
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, SessionError::AuthDenied(_))
    }
}

/// Connection lifecycle states.
///
/// `Reading` marks a connection that is owed a reply; a session abandoned in
/// that state (the owning task was cancelled mid-read) still carries the
/// leftover bytes and must not be reused, so
/// [`ConnectionSession::ensure_ready`] rebuilds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Authenticating,
    Ready,
    Reading,
    Faulted,
}

/// Explicit state machine for one bulk `INFO` reply.
///
/// The reply is framed line by line: the first line must be a `$<byteCount>`
/// bulk header, after which lines accumulate (terminators included, header
/// line included, matching the byte-count convention of the wire format)
/// until the buffered length reaches the declared count. Partial lines are
/// carried across [`ReplyFrame::advance`] calls, so the reply may arrive in
/// arbitrarily small chunks.
#[derive(Debug, Default)]
pub struct ReplyFrame {
    declared: Option<usize>,
    collected: String,
    pending: BytesMut,
}

impl ReplyFrame {
    pub fn new() -> Self {
        ReplyFrame::default()
    }

    /// Feeds one read chunk into the frame.
    ///
    /// Returns `Ok(Some(fields))` once the declared byte count is buffered,
    /// `Ok(None)` while more data is needed. A first line that does not start
    /// with the bulk marker fails with [`SessionError::NoBulkResponse`]; the
    /// caller aborts the collection but may keep the connection.
    pub fn advance(&mut self, chunk: &[u8]) -> Result<Option<Vec<(String, String)>>, SessionError> {
        self.pending.extend_from_slice(chunk);

        while let Some(line) = take_line(&mut self.pending)? {
            let declared = match self.declared {
                Some(declared) => declared,
                None => {
                    let Some(count) = line.strip_prefix('$') else {
                        return Err(SessionError::NoBulkResponse);
                    };

                    let declared = count
                        .trim()
                        .parse::<usize>()
                        .map_err(|_| SessionError::BadHeader(line.clone()))?;

                    self.declared = Some(declared);
                    self.collected.push_str(&line);
                    self.collected.push_str(EOL);
                    continue;
                }
            };

            self.collected.push_str(&line);
            self.collected.push_str(EOL);

            if self.collected.len() >= declared {
                return Ok(Some(parse_body(&self.collected)));
            }
        }

        Ok(None)
    }
}

/// Splits the accumulated reply into `key:value` fields.
///
/// The first element is the length header and is discarded, as are empty
/// lines and `#` comment lines (section banners). Values keep everything
/// after the first colon verbatim.
fn parse_body(collected: &str) -> Vec<(String, String)> {
    collected
        .split(EOL)
        .enumerate()
        .filter(|(index, line)| *index != 0 && !line.is_empty() && !line.starts_with('#'))
        .filter_map(|(_, line)| {
            line.split_once(':')
                .map(|(key, value)| (key.to_string(), value.to_string()))
        })
        .collect()
}

/// Pops one complete EOL-terminated line off the buffer, without the
/// terminator. Returns `None` while the line is still partial.
fn take_line(pending: &mut BytesMut) -> Result<Option<String>, SessionError> {
    let Some(position) = pending.windows(2).position(|window| window == EOL.as_bytes()) else {
        return Ok(None);
    };

    let line = pending.split_to(position);
    pending.advance(EOL.len());

    Ok(Some(str::from_utf8(&line)?.to_string()))
}

/// One TCP connection to one monitored server.
///
/// The session performs a single request/response exchange at a time; the
/// owning client never issues a new `INFO` before the previous reply has
/// completed or failed.
#[derive(Debug)]
pub struct ConnectionSession {
    server: Arc<MonitoredServer>,
    stream: Option<TcpStream>,
    state: SessionState,
}

impl ConnectionSession {
    pub fn new(server: Arc<MonitoredServer>) -> Self {
        ConnectionSession {
            server,
            stream: None,
            state: SessionState::Disconnected,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drops the connection; the next [`ConnectionSession::ensure_ready`]
    /// builds a new one.
    pub fn reset(&mut self) {
        self.stream = None;
        self.state = SessionState::Disconnected;
    }

    /// Makes sure a usable connection exists, reconnecting and performing the
    /// `AUTH` handshake as needed.
    ///
    /// A session already in the `Ready` state is reused as-is. On a fresh
    /// connection with credentials configured, exactly one reply line is read
    /// for the `AUTH` command: `+OK` yields `Ok(Some(true))`, any other reply
    /// fails with [`SessionError::AuthDenied`]. `Ok(None)` means no handshake
    /// took place this call.
    pub async fn ensure_ready(
        &mut self,
        connect_timeout: Duration,
    ) -> Result<Option<bool>, SessionError> {
        if self.stream.is_some() && self.state == SessionState::Ready {
            return Ok(None);
        }

        self.reset();
        self.state = SessionState::Connecting;

        let address = self.server.address();
        let stream = match timeout(connect_timeout, TcpStream::connect(&address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                self.state = SessionState::Faulted;
                return Err(SessionError::Connect(err.to_string()));
            }
            Err(_) => {
                self.state = SessionState::Faulted;
                return Err(SessionError::Connect(format!(
                    "connection to {} timed out",
                    address
                )));
            }
        };

        trace!(server = %self.server.label, %address, "connected");
        self.stream = Some(stream);

        if !self.server.has_auth() {
            self.state = SessionState::Ready;
            return Ok(None);
        }

        self.state = SessionState::Authenticating;

        let command = format!("AUTH {}{}", self.server.auth_args(), EOL);
        if let Err(err) = self.write_all(command.as_bytes()).await {
            self.reset();
            return Err(err);
        }

        let line = match self.read_line().await {
            Ok(line) => line,
            Err(err) => {
                self.reset();
                return Err(err);
            }
        };

        if line.strip_prefix('+').map(str::trim) == Some("OK") {
            self.state = SessionState::Ready;
            Ok(Some(true))
        } else {
            self.reset();
            self.state = SessionState::Faulted;
            Err(SessionError::AuthDenied(
                line.trim_start_matches('-').trim().to_string(),
            ))
        }
    }

    /// Writes the `INFO` command, with the optional space-joined section list.
    ///
    /// Section names are not validated here; combined sections are only
    /// meaningful against servers that support them (Redis 7+).
    pub async fn send_info(&mut self, sections: &[String]) -> Result<(), SessionError> {
        let command = if sections.is_empty() {
            format!("INFO{}", EOL)
        } else {
            format!("INFO {}{}", sections.join(" "), EOL)
        };

        if let Err(err) = self.write_all(command.as_bytes()).await {
            self.reset();
            return Err(err);
        }

        // a reply is owed from here until the frame completes
        self.state = SessionState::Reading;

        Ok(())
    }

    /// Reads and frames one bulk reply, tolerating delivery across any number
    /// of read events.
    ///
    /// Transport failures discard the connection; protocol failures abort the
    /// collection only.
    pub async fn read_reply(&mut self) -> Result<Vec<(String, String)>, SessionError> {
        let mut frame = ReplyFrame::new();
        let mut chunk = [0u8; 4096];

        loop {
            let stream = self
                .stream
                .as_mut()
                .ok_or_else(|| SessionError::Connect("not connected".to_string()))?;

            let read = match stream.read(&mut chunk).await {
                Ok(0) => {
                    self.reset();
                    return Err(SessionError::ConnectionClosed);
                }
                Ok(read) => read,
                Err(err) => {
                    self.reset();
                    return Err(SessionError::Io(err));
                }
            };

            match frame.advance(&chunk[..read]) {
                Ok(Some(fields)) => {
                    self.state = SessionState::Ready;
                    return Ok(fields);
                }
                Ok(None) => continue,
                Err(err) => {
                    if err.is_protocol() {
                        // the exchange finished, the connection stays usable
                        self.state = SessionState::Ready;
                    } else {
                        self.reset();
                    }
                    return Err(err);
                }
            }
        }
    }

    /// One full `INFO` request/response exchange.
    pub async fn fetch_info(
        &mut self,
        sections: &[String],
    ) -> Result<Vec<(String, String)>, SessionError> {
        self.send_info(sections).await?;
        self.read_reply().await
    }

    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| SessionError::Connect("not connected".to_string()))?;

        stream.write_all(bytes).await?;
        stream.flush().await?;

        Ok(())
    }

    async fn read_line(&mut self) -> Result<String, SessionError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| SessionError::Connect("not connected".to_string()))?;

        let mut pending = BytesMut::with_capacity(256);

        loop {
            if let Some(line) = take_line(&mut pending)? {
                return Ok(line);
            }

            let read = stream.read_buf(&mut pending).await?;
            if read == 0 {
                return Err(SessionError::ConnectionClosed);
            }
        }
    }
}
