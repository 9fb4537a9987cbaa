//! Wire format constants and line helpers.
//!
//! The companion link is line oriented:
//! ```text
//! inbound command:   <name>[ <parameters>]\n
//! outbound telemetry: <key>=<whole>.<ff>\n
//! handshake:          AT\n  ->  OK\n
//! ```
//!
//! A single `\r` before the terminator is tolerated and stripped.

/// Frame terminator.
pub const TERMINATOR: u8 = b'\n';

/// Optional carriage return preceding the terminator.
pub const CARRIAGE_RETURN: u8 = b'\r';

/// Separator between command name and parameters.
pub const SEPARATOR: u8 = b' ';

/// Separator between telemetry key and value.
pub const ASSIGN: u8 = b'=';

/// Default maximum frame length (excluding terminator).
pub const DEFAULT_MAX_FRAME_LEN: usize = 256;

/// Default maximum command name length.
pub const DEFAULT_MAX_NAME_LEN: usize = 64;

/// Fractional digits in encoded telemetry values.
pub const FRACTION_DIGITS: usize = 2;

/// Handshake probe sent by the host.
pub const HANDSHAKE_PROBE: &[u8] = b"AT";

/// Handshake acknowledgment expected from the companion chip.
pub const HANDSHAKE_ACK: &[u8] = b"OK";

/// Strip one trailing `\r`, if present.
#[inline]
pub fn strip_cr(line: &[u8]) -> &[u8] {
    match line.split_last() {
        Some((&CARRIAGE_RETURN, rest)) => rest,
        _ => line,
    }
}

/// Whether `byte` may appear in a command name or telemetry key.
#[inline]
pub fn is_token_byte(byte: u8) -> bool {
    byte.is_ascii_graphic() && byte != ASSIGN
}

/// Build a terminated line from its content.
pub fn line(content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 1);
    out.extend_from_slice(content);
    out.push(TERMINATOR);
    out
}
