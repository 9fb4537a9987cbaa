//! Protocol module - wire format, framing, commands and telemetry.
//!
//! This module implements the line protocol spoken with the companion chip:
//! - Frame assembler for accumulating partial reads
//! - Command parser backed by a fixed-capacity pool
//! - Fixed-point telemetry encoding

mod assembler;
mod command;
mod pool;
mod telemetry;
mod wire_format;

pub use assembler::{FrameAssembler, FrameResult, Frames};
pub use command::{parse_frame, Command, CommandParser, RawCommand};
pub use pool::CommandPool;
pub use telemetry::{encode, FixedPoint, TelemetryEntry};
pub use wire_format::{
    is_token_byte, line, strip_cr, ASSIGN, CARRIAGE_RETURN, DEFAULT_MAX_FRAME_LEN,
    DEFAULT_MAX_NAME_LEN, FRACTION_DIGITS, HANDSHAKE_ACK, HANDSHAKE_PROBE, SEPARATOR, TERMINATOR,
};
