//! Telemetry encoding.
//!
//! Values travel as text with exactly two fractional digits:
//! ```text
//! <key>=<whole>.<ff>\n
//! ```
//!
//! Conversion is done in integer hundredths. Only `floor` and integer
//! formatting are used, never float-to-text, so the output is identical on
//! every target:
//!
//! - `whole = floor(v)`
//! - `fraction = floor((v - whole) * 100 + 0.5)` (round half up)
//! - a fraction of 100 carries into `whole`
//!
//! The result is printed sign-magnitude (`-1.25`, never `-2.75` style).
//!
//! # Example
//!
//! ```
//! use companion_link::protocol::encode;
//!
//! assert_eq!(encode("t", 23.5).unwrap(), b"t=23.50\n");
//! assert_eq!(encode("x", 0.999).unwrap(), b"x=1.00\n");
//! ```

use std::fmt::{self, Write as _};

use bytes::{BufMut, BytesMut};

use super::wire_format::{is_token_byte, ASSIGN, DEFAULT_MAX_NAME_LEN, TERMINATOR};
use crate::error::{LinkError, Result};

const SCALE: i64 = 100;

/// A signed fixed-point number with two fractional digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FixedPoint {
    hundredths: i64,
}

impl FixedPoint {
    /// Convert a float, rounding half up at the second fractional digit.
    pub fn from_f64(value: f64) -> Result<Self> {
        if !value.is_finite() {
            return Err(LinkError::InvalidTelemetry(format!(
                "value {value} is not finite"
            )));
        }

        let whole = value.floor();
        // In 0..=100; 100 carries naturally in the sum below.
        let fraction = ((value - whole) * SCALE as f64 + 0.5).floor() as i64;

        // `as` saturates, so anything past the i64 range fails the multiply.
        let hundredths = (whole as i64)
            .checked_mul(SCALE)
            .and_then(|h| h.checked_add(fraction))
            .ok_or_else(|| LinkError::InvalidTelemetry(format!("value {value} out of range")))?;
        Ok(Self { hundredths })
    }

    /// An integral value.
    pub fn from_int(value: i32) -> Self {
        Self {
            hundredths: i64::from(value) * SCALE,
        }
    }

    pub const fn from_hundredths(hundredths: i64) -> Self {
        Self { hundredths }
    }

    pub const fn hundredths(&self) -> i64 {
        self.hundredths
    }

    pub fn is_negative(&self) -> bool {
        self.hundredths < 0
    }

    /// Integer part, truncated toward zero (`-1.25` gives `-1`).
    pub fn whole(&self) -> i64 {
        self.hundredths / SCALE
    }

    /// Fractional digits as a magnitude (`-1.25` gives `25`).
    pub fn fraction(&self) -> u8 {
        (self.hundredths.unsigned_abs() % SCALE as u64) as u8
    }
}

impl fmt::Display for FixedPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let magnitude = self.hundredths.unsigned_abs();
        let sign = if self.is_negative() { "-" } else { "" };
        write!(
            f,
            "{sign}{}.{:02}",
            magnitude / SCALE as u64,
            magnitude % SCALE as u64
        )
    }
}

impl TryFrom<f64> for FixedPoint {
    type Error = LinkError;

    fn try_from(value: f64) -> Result<Self> {
        Self::from_f64(value)
    }
}

impl From<i32> for FixedPoint {
    fn from(value: i32) -> Self {
        Self::from_int(value)
    }
}

/// One named reading, built and encoded within a single publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryEntry<'a> {
    key: &'a str,
    value: FixedPoint,
}

impl<'a> TelemetryEntry<'a> {
    /// Validate the key and pair it with a value.
    ///
    /// Keys are 1 to 64 printable ASCII characters without `=` or spaces.
    pub fn new(key: &'a str, value: FixedPoint) -> Result<Self> {
        validate_key(key)?;
        Ok(Self { key, value })
    }

    pub fn key(&self) -> &str {
        self.key
    }

    pub fn value(&self) -> FixedPoint {
        self.value
    }

    /// Upper bound on the encoded length.
    pub fn encoded_len_hint(&self) -> usize {
        // key, '=', sign, 19 digits, '.', 2 digits, '\n'
        self.key.len() + 25
    }

    /// Encode into a fresh buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.encoded_len_hint());
        self.encode_into(&mut buf);
        buf.to_vec()
    }

    /// Append the encoded line to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len_hint());
        buf.put_slice(self.key.as_bytes());
        buf.put_u8(ASSIGN);
        // Writing into BytesMut cannot fail.
        let _ = write!(buf, "{}", self.value);
        buf.put_u8(TERMINATOR);
    }
}

/// Encode `key=value` as a telemetry line.
pub fn encode(key: &str, value: f64) -> Result<Vec<u8>> {
    let value = FixedPoint::from_f64(value)?;
    Ok(TelemetryEntry::new(key, value)?.encode())
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(LinkError::InvalidTelemetry("empty key".into()));
    }
    if key.len() > DEFAULT_MAX_NAME_LEN {
        return Err(LinkError::InvalidTelemetry(format!(
            "key longer than {DEFAULT_MAX_NAME_LEN} bytes"
        )));
    }
    if !key.bytes().all(is_token_byte) {
        return Err(LinkError::InvalidTelemetry(format!("invalid key {key:?}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enc(key: &str, value: f64) -> String {
        String::from_utf8(encode(key, value).unwrap()).unwrap()
    }

    #[test]
    fn test_basic_encoding() {
        assert_eq!(enc("t", 23.5), "t=23.50\n");
        assert_eq!(enc("cpu_temperature", 41.0), "cpu_temperature=41.00\n");
        assert_eq!(enc("pi", 3.14159), "pi=3.14\n");
    }

    #[test]
    fn test_round_half_up_and_carry() {
        assert_eq!(enc("x", 0.999), "x=1.00\n");
        assert_eq!(enc("x", 99.995), "x=100.00\n");
        assert_eq!(enc("x", 12.345), "x=12.35\n");
        assert_eq!(enc("x", 0.005), "x=0.01\n");
    }

    #[test]
    fn test_negative_values() {
        assert_eq!(enc("x", -1.005), "x=-1.00\n");
        assert_eq!(enc("x", -0.999), "x=-1.00\n");
        assert_eq!(enc("x", -2.5), "x=-2.50\n");
        assert_eq!(enc("x", -1.25), "x=-1.25\n");
        assert_eq!(enc("x", -40.0), "x=-40.00\n");
        assert_eq!(enc("x", -0.006), "x=-0.01\n");
    }

    #[test]
    fn test_negative_rounding_to_zero_has_no_sign() {
        assert_eq!(enc("x", -0.004), "x=0.00\n");
        assert_eq!(enc("x", -0.0), "x=0.00\n");
    }

    #[test]
    fn test_fixed_point_parts() {
        let v = FixedPoint::from_f64(-1.25).unwrap();
        assert_eq!(v.hundredths(), -125);
        assert_eq!(v.whole(), -1);
        assert_eq!(v.fraction(), 25);

        let v = FixedPoint::from_int(7);
        assert_eq!(v.to_string(), "7.00");
        assert_eq!(FixedPoint::from(-3).to_string(), "-3.00");
    }

    #[test]
    fn test_non_finite_rejected() {
        assert!(matches!(
            FixedPoint::from_f64(f64::NAN),
            Err(LinkError::InvalidTelemetry(_))
        ));
        assert!(FixedPoint::try_from(f64::INFINITY).is_err());
        assert!(FixedPoint::from_f64(1e300).is_err());
    }

    #[test]
    fn test_out_of_range_rejected_at_i64_edge() {
        for value in [9.223372036854776e16, -9.223372036854776e16, 1e19, -1e19] {
            assert!(
                matches!(FixedPoint::from_f64(value), Err(LinkError::InvalidTelemetry(_))),
                "{value} should be rejected"
            );
        }
        assert!(encode("t", 9.223372036854776e16).is_err());

        let near = FixedPoint::from_f64(9.0e16).unwrap();
        assert_eq!(near.whole(), 90_000_000_000_000_000);
        assert_eq!(near.fraction(), 0);
    }

    #[test]
    fn test_invalid_keys() {
        for key in ["", "a=b", "a b", "line\n", "cr\r", "tab\t"] {
            assert!(
                matches!(encode(key, 1.0), Err(LinkError::InvalidTelemetry(_))),
                "key {key:?} should be rejected"
            );
        }
        assert!(encode(&"k".repeat(65), 1.0).is_err());
    }

    #[test]
    fn test_encode_into_appends() {
        let mut buf = BytesMut::new();
        TelemetryEntry::new("a", FixedPoint::from_int(1))
            .unwrap()
            .encode_into(&mut buf);
        TelemetryEntry::new("b", FixedPoint::from_hundredths(-5))
            .unwrap()
            .encode_into(&mut buf);

        assert_eq!(&buf[..], b"a=1.00\nb=-0.05\n");
    }

    #[test]
    fn test_extreme_magnitude_fits() {
        let entry = TelemetryEntry::new("big", FixedPoint::from_hundredths(i64::MIN + 1)).unwrap();
        let encoded = entry.encode();
        assert!(encoded.len() <= entry.encoded_len_hint());
    }
}
