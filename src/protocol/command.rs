//! Command records and the frame parser.
//!
//! A frame is split at the first [`SEPARATOR`] into a name and optional
//! parameters. [`parse_frame`] returns a borrowed view over the frame;
//! [`CommandParser::parse`] copies that view into pool storage so the frame
//! buffer can be reused immediately.
//!
//! # Example
//!
//! ```
//! use companion_link::protocol::parse_frame;
//!
//! let raw = parse_frame(b"set_led_frequency 3", 64).unwrap();
//! assert_eq!(raw.name, "set_led_frequency");
//! assert_eq!(raw.parameters, Some("3"));
//! ```

use std::fmt;
use std::sync::Arc;

use super::pool::{CommandPool, PoolShared, Slot};
use super::wire_format::{DEFAULT_MAX_FRAME_LEN, DEFAULT_MAX_NAME_LEN, SEPARATOR};
use crate::error::{ParseError, Result};

/// A parsed frame borrowing from the input bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawCommand<'a> {
    pub name: &'a str,
    pub parameters: Option<&'a str>,
}

/// Split a terminator-free frame into name and parameters.
///
/// Rejected as [`ParseError::Malformed`]: an empty frame, invalid UTF-8, an
/// empty name, a name longer than `max_name_len`, and control characters in
/// the name. A trailing separator with nothing after it means no parameters.
pub fn parse_frame(frame: &[u8], max_name_len: usize) -> std::result::Result<RawCommand<'_>, ParseError> {
    if frame.is_empty() {
        return Err(ParseError::Malformed("empty frame"));
    }

    let text = std::str::from_utf8(frame).map_err(|_| ParseError::Malformed("invalid utf-8"))?;

    let (name, parameters) = match text.split_once(SEPARATOR as char) {
        Some((name, "")) => (name, None),
        Some((name, params)) => (name, Some(params)),
        None => (text, None),
    };

    if name.is_empty() {
        return Err(ParseError::Malformed("empty command name"));
    }
    if name.len() > max_name_len {
        return Err(ParseError::Malformed("command name too long"));
    }
    if name.bytes().any(|b| b.is_ascii_control()) {
        return Err(ParseError::Malformed("control character in command name"));
    }

    Ok(RawCommand { name, parameters })
}

/// Turns frames into pool-backed [`Command`]s.
#[derive(Debug, Clone)]
pub struct CommandParser {
    pool: CommandPool,
    max_name_len: usize,
}

impl CommandParser {
    pub fn new(pool: CommandPool, max_name_len: usize) -> Self {
        Self { pool, max_name_len }
    }

    /// Parse a frame and copy it into a free pool slot.
    ///
    /// Malformed frames fail with [`LinkError::Parse`](crate::LinkError::Parse);
    /// an exhausted pool fails with [`LinkError::Resource`](crate::LinkError::Resource).
    pub fn parse(&self, frame: &[u8]) -> Result<Command> {
        let raw = parse_frame(frame, self.max_name_len)?;
        self.pool.acquire(raw.name, raw.parameters)
    }

    pub fn pool(&self) -> &CommandPool {
        &self.pool
    }
}

impl Default for CommandParser {
    fn default() -> Self {
        Self::new(
            CommandPool::new(4, DEFAULT_MAX_NAME_LEN, DEFAULT_MAX_FRAME_LEN),
            DEFAULT_MAX_NAME_LEN,
        )
    }
}

/// A command received from the companion chip.
///
/// Owns one pool slot until [`release`](Command::release) is called.
/// `release` consumes the command, so reading it afterwards or releasing it
/// twice does not compile.
pub struct Command {
    name: String,
    parameters: String,
    has_parameters: bool,
    lease: Option<Arc<PoolShared>>,
}

impl Command {
    pub(crate) fn leased(slot: Slot, has_parameters: bool, pool: Arc<PoolShared>) -> Self {
        Self {
            name: slot.name,
            parameters: slot.parameters,
            has_parameters,
            lease: Some(pool),
        }
    }

    /// Command name, e.g. `set_red_led`.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameter text after the first separator, if any.
    #[inline]
    pub fn parameters(&self) -> Option<&str> {
        self.has_parameters.then_some(self.parameters.as_str())
    }

    #[inline]
    pub fn has_parameters(&self) -> bool {
        self.has_parameters
    }

    /// Return the backing slot to its pool.
    pub fn release(mut self) {
        self.give_back(false);
    }

    fn give_back(&mut self, leaked: bool) {
        if let Some(pool) = self.lease.take() {
            let slot = Slot {
                name: std::mem::take(&mut self.name),
                parameters: std::mem::take(&mut self.parameters),
            };
            pool.recycle(slot, leaked);
        }
    }
}

impl Drop for Command {
    fn drop(&mut self) {
        self.give_back(true);
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name())
            .field("parameters", &self.parameters())
            .finish()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.parameters() {
            Some(params) => write!(f, "{} {}", self.name, params),
            None => f.write_str(&self.name),
        }
    }
}
