//! Error types for companion-link.

use thiserror::Error;

use crate::engine::SessionState;

/// Underlying link failure reported by a [`Transport`](crate::transport::Transport).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The port could not be opened or configured.
    #[error("open failed: {0}")]
    Open(String),

    /// A write could not be started or failed mid-flight.
    #[error("send failed: {0}")]
    Send(String),

    /// A read could not be started or failed mid-flight.
    #[error("receive failed: {0}")]
    Receive(String),

    /// The port could not be closed cleanly.
    #[error("close failed: {0}")]
    Close(String),

    /// Operation attempted on a transport that is not open.
    #[error("transport not open")]
    NotOpen,

    /// The device went away (cable pulled, peer closed). Not recoverable.
    #[error("device disconnected: {0}")]
    Disconnected(String),
}

impl TransportError {
    /// Whether retrying on the same handle can ever succeed.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, TransportError::Disconnected(_))
    }
}

/// An oversized frame was dropped; the assembler resynchronized at the next
/// terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("frame overflow: discarded {discarded} bytes (max {max})")]
pub struct FramingError {
    pub discarded: usize,
    pub max: usize,
}

/// A frame that could not be turned into a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The frame has no recognizable command structure.
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
}

/// Invalid serial or engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("baud rate {0} out of range")]
    BaudRate(u32),

    #[error("unsupported data bits: {0} (expected 7, 8 or 9)")]
    DataBits(u32),

    #[error("unsupported parity: {0}")]
    Parity(String),

    #[error("unsupported stop bits: {0} (expected 1 or 2)")]
    StopBits(u32),

    #[error("9 data bits cannot be combined with parity")]
    NineBitsWithParity,

    #[error("{0} must be non-zero")]
    Zero(&'static str),

    #[error("fault threshold {fault_after} must exceed degrade threshold {degrade_after}")]
    Thresholds { degrade_after: u32, fault_after: u32 },
}

/// Main error type for all companion-link operations.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Link-level failure (open/send/receive/close).
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Deadline elapsed awaiting transport completion or a mailbox item.
    #[error("timed out")]
    Timeout,

    /// Nothing pending and no time left to wait.
    #[error("mailbox empty")]
    Empty,

    /// A frame grew past the maximum length before its terminator arrived.
    #[error(transparent)]
    Framing(#[from] FramingError),

    /// A complete frame could not be parsed.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Allocation or buffer-capacity exhaustion. Treat as fatal.
    #[error("resource exhausted: {0}")]
    Resource(String),

    /// The session is not in a state that accepts traffic.
    #[error("session faulted (state: {0:?})")]
    Faulted(SessionState),

    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// A telemetry key or value that cannot be encoded.
    #[error("invalid telemetry: {0}")]
    InvalidTelemetry(String),

    /// The mailbox or transport has been closed.
    #[error("closed")]
    Closed,

    /// JSON configuration could not be read.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LinkError {
    /// Errors the host application should answer with a full reset.
    pub fn is_fatal(&self) -> bool {
        match self {
            LinkError::Resource(_) => true,
            LinkError::Transport(e) => !e.is_recoverable(),
            _ => false,
        }
    }

    /// Errors that count against the session's transport error streak.
    pub(crate) fn is_link_failure(&self) -> bool {
        matches!(self, LinkError::Transport(_) | LinkError::Timeout)
    }
}

/// Result type alias using LinkError.
pub type Result<T> = std::result::Result<T, LinkError>;
