//! Transport module - bounded byte links to the companion chip.
//!
//! Provides:
//! - [`Transport`]: the contract the engine drives
//! - [`UartTransport`]: adapter over an interrupt-driven [`SerialDriver`]
//! - [`StreamTransport`]: adapter over any tokio byte stream (Unix socket,
//!   in-memory duplex pipe)
//!
//! Every `send`/`receive` takes a [`Deadline`] and returns
//! [`LinkError::Timeout`](crate::LinkError::Timeout) once it passes; no
//! operation may wait longer.

mod stream;
mod uart;

use std::future::Future;

pub use stream::StreamTransport;
#[cfg(unix)]
pub use stream::UnixTransport;
pub use uart::{SerialDriver, UartTransport};

use crate::config::SerialConfig;
use crate::deadline::Deadline;
use crate::error::Result;

/// A half-duplex byte link with bounded operations.
pub trait Transport: Send {
    /// Open the link and apply `config`.
    fn open(&mut self, config: &SerialConfig) -> impl Future<Output = Result<()>> + Send;

    /// Write all of `bytes` before `deadline`.
    fn send(&mut self, bytes: &[u8], deadline: Deadline) -> impl Future<Output = Result<()>> + Send;

    /// Read at least one byte into `buf` before `deadline`.
    ///
    /// Returns the number of bytes read, or `Timeout` if none arrived.
    fn receive(
        &mut self,
        buf: &mut [u8],
        deadline: Deadline,
    ) -> impl Future<Output = Result<usize>> + Send;

    /// Close the link. Closing a closed transport is a no-op.
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;

    fn is_open(&self) -> bool;
}
