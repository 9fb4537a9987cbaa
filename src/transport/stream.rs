//! Transport over a tokio byte stream.
//!
//! - Unix: a Unix domain socket bridged to the serial device
//!   ([`StreamTransport::connect_unix`])
//! - Tests and simulation: `tokio::io::duplex`
//!
//! Reads and writes are bounded with `tokio::time::timeout_at`. End of
//! stream and broken pipes mean the peer is gone and map to
//! [`TransportError::Disconnected`].
//!
//! # Example
//!
//! ```ignore
//! use companion_link::transport::StreamTransport;
//!
//! let mut link = StreamTransport::connect_unix("/run/companion.sock").await?;
//! ```

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::Transport;
use crate::config::SerialConfig;
use crate::deadline::Deadline;
use crate::error::{LinkError, Result, TransportError};
use crate::protocol::TERMINATOR;

/// [`Transport`] over any `AsyncRead + AsyncWrite` stream.
///
/// The stream is supplied connected; `open` only marks it usable. Once
/// closed, the stream is dropped and cannot be reopened.
///
/// A send that misses its deadline may leave part of a line on the wire.
/// The next send then starts with a terminator, so the peer sees the torn
/// fragment as a line of its own instead of a prefix of the next one.
#[derive(Debug)]
pub struct StreamTransport<S> {
    stream: Option<S>,
    open: bool,
    /// A timed-out send may have written a partial line.
    torn: bool,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream: Some(stream),
            open: false,
            torn: false,
        }
    }

    /// Get a reference to the underlying stream.
    pub fn inner(&self) -> Option<&S> {
        self.stream.as_ref()
    }

    fn stream_mut(&mut self) -> Result<&mut S> {
        match (self.open, self.stream.as_mut()) {
            (true, Some(stream)) => Ok(stream),
            _ => Err(TransportError::NotOpen.into()),
        }
    }

    fn lost(&mut self, err: TransportError) -> LinkError {
        if matches!(err, TransportError::Disconnected(_)) {
            self.open = false;
            self.stream = None;
        }
        err.into()
    }
}

fn map_io(err: io::Error, op: &str) -> TransportError {
    match err.kind() {
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::UnexpectedEof => TransportError::Disconnected(format!("{op}: {err}")),
        _ if op == "send" => TransportError::Send(err.to_string()),
        _ => TransportError::Receive(err.to_string()),
    }
}

impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn open(&mut self, config: &SerialConfig) -> Result<()> {
        if self.stream.is_none() {
            return Err(TransportError::Open("stream already closed".into()).into());
        }
        self.open = true;
        tracing::debug!(baud = config.baud_rate(), "stream transport opened");
        Ok(())
    }

    async fn send(&mut self, bytes: &[u8], deadline: Deadline) -> Result<()> {
        let torn = self.torn;
        let stream = self.stream_mut()?;
        let write = async {
            if torn {
                stream.write_all(&[TERMINATOR]).await?;
            }
            stream.write_all(bytes).await?;
            stream.flush().await
        };

        let result = tokio::time::timeout_at(deadline.instant(), write).await;
        match result {
            Ok(Ok(())) => {
                self.torn = false;
                Ok(())
            }
            Ok(Err(e)) => Err(self.lost(map_io(e, "send"))),
            Err(_) => {
                self.torn = true;
                tracing::debug!(len = bytes.len(), "stream send timed out, line may be torn");
                Err(LinkError::Timeout)
            }
        }
    }

    async fn receive(&mut self, buf: &mut [u8], deadline: Deadline) -> Result<usize> {
        let stream = self.stream_mut()?;
        if buf.is_empty() {
            return Ok(0);
        }

        let result = tokio::time::timeout_at(deadline.instant(), stream.read(buf)).await;
        match result {
            Ok(Ok(0)) => Err(self.lost(TransportError::Disconnected("end of stream".into()))),
            Ok(Ok(n)) => Ok(n),
            Ok(Err(e)) => Err(self.lost(map_io(e, "receive"))),
            Err(_) => Err(LinkError::Timeout),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.open = false;
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        stream
            .shutdown()
            .await
            .map_err(|e| TransportError::Close(e.to_string()).into())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

// ============================================================================
// Unix Implementation
// ============================================================================

/// Stream transport over a Unix domain socket.
#[cfg(unix)]
pub type UnixTransport = StreamTransport<tokio::net::UnixStream>;

#[cfg(unix)]
impl StreamTransport<tokio::net::UnixStream> {
    /// Connect to a socket that bridges to the serial device.
    pub async fn connect_unix(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let stream = tokio::net::UnixStream::connect(path)
            .await
            .map_err(|e| TransportError::Open(format!("{}: {e}", path.display())))?;
        Ok(Self::new(stream))
    }
}
