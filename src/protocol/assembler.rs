//! Frame assembler for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for buffer management. Bytes arrive in arbitrary
//! chunks (one byte, half a terminator, several frames at once) and come out
//! as complete, terminator-free frames. A small state machine handles
//! oversized input:
//! - `Accumulating`: collecting the current frame
//! - `Discarding`: the current frame overflowed, dropping bytes until the
//!   next terminator
//!
//! Extraction is lazy. Complete frames stay in the buffer until pulled with
//! [`FrameAssembler::next_frame`], so a consumer can take one frame, hand it
//! off, and come back for the rest later.
//!
//! # Example
//!
//! ```
//! use companion_link::protocol::FrameAssembler;
//!
//! let mut assembler = FrameAssembler::new();
//!
//! assert!(assembler.push(b"set_red").is_empty());
//! let frames = assembler.push(b"_led on\r\nreboot\n");
//!
//! assert_eq!(frames.len(), 2);
//! assert_eq!(&frames[0].as_ref().unwrap()[..], b"set_red_led on");
//! assert_eq!(&frames[1].as_ref().unwrap()[..], b"reboot");
//! ```

use bytes::{Buf, Bytes, BytesMut};

use super::wire_format::{strip_cr, CARRIAGE_RETURN, DEFAULT_MAX_FRAME_LEN, TERMINATOR};
use crate::error::FramingError;

/// One assembled frame, or the overflow report standing in its place.
pub type FrameResult = std::result::Result<Bytes, FramingError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Accumulating,
    /// Dropping the rest of an oversized frame.
    Discarding { discarded: usize },
}

/// Incremental frame reassembly with bounded buffering.
///
/// Invariant: the unterminated tail of the buffer never exceeds
/// `max_frame_len` bytes (plus one trailing `\r`).
#[derive(Debug)]
pub struct FrameAssembler {
    buffer: BytesMut,
    /// Bytes at the front of `buffer` already known to hold no terminator.
    scanned: usize,
    state: State,
    max_frame_len: usize,
    overflows: u64,
}

impl FrameAssembler {
    /// Create an assembler with the default maximum frame length (256).
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    /// Create an assembler with a custom maximum frame length.
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(max_frame_len + 2),
            scanned: 0,
            state: State::Accumulating,
            max_frame_len,
            overflows: 0,
        }
    }

    /// Push data and extract every frame now complete.
    ///
    /// Oversized frames appear in sequence as `Err(FramingError)`; the
    /// assembler has already resynchronized past them.
    pub fn push(&mut self, data: &[u8]) -> Vec<FrameResult> {
        self.extend(data);
        self.frames().collect()
    }

    /// Append data and return a lazy iterator over complete frames.
    ///
    /// Frames not pulled from the iterator remain buffered.
    pub fn feed(&mut self, data: &[u8]) -> Frames<'_> {
        self.extend(data);
        self.frames()
    }

    /// Append data without extracting frames.
    pub fn extend(&mut self, data: &[u8]) {
        match self.state {
            // Skip straight to the terminator; nothing before it is kept. Once
            // the terminator is buffered, later bytes belong to the next frame.
            State::Discarding { discarded } if self.buffer.is_empty() => {
                match data.iter().position(|&b| b == TERMINATOR) {
                    Some(idx) => {
                        self.state = State::Discarding {
                            discarded: discarded + idx,
                        };
                        self.buffer.extend_from_slice(&data[idx..]);
                    }
                    None => {
                        self.state = State::Discarding {
                            discarded: discarded + data.len(),
                        };
                    }
                }
            }
            _ => self.buffer.extend_from_slice(data),
        }
    }

    /// Lazy iterator over complete frames currently buffered.
    pub fn frames(&mut self) -> Frames<'_> {
        Frames { assembler: self }
    }

    /// Pull the next complete frame, if any.
    pub fn next_frame(&mut self) -> Option<FrameResult> {
        loop {
            match self.state {
                State::Discarding { discarded } => {
                    // `extend` only keeps bytes from the terminator onward.
                    if self.buffer.first() != Some(&TERMINATOR) {
                        return None;
                    }
                    self.buffer.advance(1);
                    self.scanned = 0;
                    self.state = State::Accumulating;
                    return Some(Err(FramingError {
                        discarded,
                        max: self.max_frame_len,
                    }));
                }
                State::Accumulating => {
                    if let Some(offset) = self.buffer[self.scanned..]
                        .iter()
                        .position(|&b| b == TERMINATOR)
                    {
                        let idx = self.scanned + offset;
                        let line = self.buffer.split_to(idx + 1).freeze();
                        self.scanned = 0;

                        let content_len = strip_cr(&line[..idx]).len();
                        if content_len == 0 {
                            continue;
                        }
                        if content_len > self.max_frame_len {
                            self.overflows += 1;
                            tracing::warn!(len = content_len, max = self.max_frame_len, "oversized frame dropped");
                            return Some(Err(FramingError {
                                discarded: content_len,
                                max: self.max_frame_len,
                            }));
                        }
                        return Some(Ok(line.slice(..content_len)));
                    }

                    self.scanned = self.buffer.len();
                    if self.tail_overflowed() {
                        let discarded = self.buffer.len();
                        self.buffer.clear();
                        self.scanned = 0;
                        self.state = State::Discarding { discarded };
                        self.overflows += 1;
                        tracing::warn!(
                            discarded,
                            max = self.max_frame_len,
                            "frame overflow, resynchronizing at next terminator"
                        );
                    }
                    return None;
                }
            }
        }
    }

    /// An unterminated tail longer than the limit. One extra byte is allowed
    /// when it is the `\r` of a pending `\r\n`.
    fn tail_overflowed(&self) -> bool {
        let len = self.buffer.len();
        let max = self.max_frame_len;
        len > max && !(len == max + 1 && self.buffer[max] == CARRIAGE_RETURN)
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Whether a frame has started but not yet been terminated.
    pub fn has_partial(&self) -> bool {
        match self.state {
            State::Discarding { .. } => true,
            State::Accumulating => {
                !self.buffer.is_empty() && !self.buffer.contains(&TERMINATOR)
            }
        }
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    /// Oversized frames seen so far.
    pub fn overflow_count(&self) -> u64 {
        self.overflows
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
        self.state = State::Accumulating;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.state {
            State::Accumulating => "Accumulating",
            State::Discarding { .. } => "Discarding",
        }
    }
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}

/// Lazy, restartable sequence of frames drawn from a [`FrameAssembler`].
pub struct Frames<'a> {
    assembler: &'a mut FrameAssembler,
}

impl Iterator for Frames<'_> {
    type Item = FrameResult;

    fn next(&mut self) -> Option<Self::Item> {
        self.assembler.next_frame()
    }
}
