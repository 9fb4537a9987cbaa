//! Serial line and engine configuration.
//!
//! [`SerialConfig`] describes the UART settings negotiated with the companion
//! chip. It is validated at construction and immutable afterwards, so an open
//! transport never sees an invalid combination.
//!
//! # Example
//!
//! ```
//! use companion_link::config::{Parity, SerialConfig};
//! use std::time::Duration;
//!
//! let cfg = SerialConfig::builder()
//!     .baud_rate(115_200)
//!     .parity(Parity::Even)
//!     .response_timeout(Duration::from_millis(500))
//!     .build()
//!     .unwrap();
//! assert_eq!(cfg.baud_rate(), 115_200);
//!
//! let json = r#"{"baud_rate": 9600, "data_bits": 7, "parity": "odd", "stop_bits": 2}"#;
//! let cfg = SerialConfig::from_json(json).unwrap();
//! assert_eq!(cfg.parity(), Parity::Odd);
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::error::{ConfigError, Result};
use crate::protocol::{DEFAULT_MAX_FRAME_LEN, DEFAULT_MAX_NAME_LEN};

/// Highest baud rate accepted.
pub const MAX_BAUD_RATE: u32 = 12_000_000;

/// Default baud rate of the companion chip's AT port.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default per-operation response timeout.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default handshake timeout.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

/// Default interval between cooperative re-checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Consecutive link failures before `Ready` becomes `Degraded`.
pub const DEFAULT_DEGRADE_AFTER: u32 = 3;

/// Consecutive link failures before the session faults.
pub const DEFAULT_FAULT_AFTER: u32 = 10;

/// Character width on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataBits {
    Seven,
    Eight,
    Nine,
}

impl DataBits {
    pub fn bits(self) -> u32 {
        match self {
            DataBits::Seven => 7,
            DataBits::Eight => 8,
            DataBits::Nine => 9,
        }
    }
}

impl TryFrom<u32> for DataBits {
    type Error = ConfigError;

    fn try_from(bits: u32) -> std::result::Result<Self, Self::Error> {
        match bits {
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            9 => Ok(DataBits::Nine),
            other => Err(ConfigError::DataBits(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl std::fmt::Display for Parity {
    /// Single-letter form used in `8N1` notation.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Parity::None => "N",
            Parity::Odd => "O",
            Parity::Even => "E",
        })
    }
}

impl TryFrom<&str> for Parity {
    type Error = ConfigError;

    fn try_from(s: &str) -> std::result::Result<Self, Self::Error> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "n" => Ok(Parity::None),
            "odd" | "o" => Ok(Parity::Odd),
            "even" | "e" => Ok(Parity::Even),
            _ => Err(ConfigError::Parity(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
    One,
    Two,
}

impl StopBits {
    pub fn bits(self) -> u32 {
        match self {
            StopBits::One => 1,
            StopBits::Two => 2,
        }
    }
}

impl TryFrom<u32> for StopBits {
    type Error = ConfigError;

    fn try_from(bits: u32) -> std::result::Result<Self, Self::Error> {
        match bits {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            other => Err(ConfigError::StopBits(other)),
        }
    }
}

/// Validated UART settings.
///
/// Fields are private; the only ways in are [`SerialConfig::builder`],
/// [`SerialConfig::new`] and [`SerialConfig::from_json`], all of which validate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawSerialConfig")]
pub struct SerialConfig {
    baud_rate: u32,
    data_bits: DataBits,
    parity: Parity,
    stop_bits: StopBits,
    response_timeout: Duration,
}

impl SerialConfig {
    /// Create and validate a configuration.
    pub fn new(
        baud_rate: u32,
        data_bits: DataBits,
        parity: Parity,
        stop_bits: StopBits,
        response_timeout: Duration,
    ) -> std::result::Result<Self, ConfigError> {
        let cfg = Self {
            baud_rate,
            data_bits,
            parity,
            stop_bits,
            response_timeout,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Start a builder seeded with 115200 8N1.
    pub fn builder() -> SerialConfigBuilder {
        SerialConfigBuilder::new()
    }

    /// Parse and validate a JSON configuration object.
    ///
    /// Missing fields take their defaults; `response_timeout_ms` is in milliseconds.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.baud_rate == 0 || self.baud_rate > MAX_BAUD_RATE {
            return Err(ConfigError::BaudRate(self.baud_rate));
        }
        if self.data_bits == DataBits::Nine && self.parity != Parity::None {
            return Err(ConfigError::NineBitsWithParity);
        }
        if self.response_timeout.is_zero() {
            return Err(ConfigError::Zero("response_timeout"));
        }
        Ok(())
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    pub fn data_bits(&self) -> DataBits {
        self.data_bits
    }

    pub fn parity(&self) -> Parity {
        self.parity
    }

    pub fn stop_bits(&self) -> StopBits {
        self.stop_bits
    }

    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }
}

/// Wire shape of a JSON serial configuration, before validation.
#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawSerialConfig {
    baud_rate: u32,
    data_bits: u32,
    parity: String,
    stop_bits: u32,
    response_timeout_ms: u64,
}

impl Default for RawSerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: 8,
            parity: "none".to_string(),
            stop_bits: 1,
            response_timeout_ms: DEFAULT_RESPONSE_TIMEOUT.as_millis() as u64,
        }
    }
}

impl TryFrom<RawSerialConfig> for SerialConfig {
    type Error = ConfigError;

    fn try_from(raw: RawSerialConfig) -> std::result::Result<Self, Self::Error> {
        SerialConfig::new(
            raw.baud_rate,
            DataBits::try_from(raw.data_bits)?,
            Parity::try_from(raw.parity.as_str())?,
            StopBits::try_from(raw.stop_bits)?,
            Duration::from_millis(raw.response_timeout_ms),
        )
    }
}

/// Fluent builder for [`SerialConfig`].
#[derive(Debug, Clone)]
pub struct SerialConfigBuilder {
    cfg: SerialConfig,
}

impl SerialConfigBuilder {
    pub fn new() -> Self {
        Self {
            cfg: SerialConfig::default(),
        }
    }

    pub fn baud_rate(mut self, baud: u32) -> Self {
        self.cfg.baud_rate = baud;
        self
    }

    pub fn data_bits(mut self, bits: DataBits) -> Self {
        self.cfg.data_bits = bits;
        self
    }

    pub fn parity(mut self, parity: Parity) -> Self {
        self.cfg.parity = parity;
        self
    }

    pub fn stop_bits(mut self, bits: StopBits) -> Self {
        self.cfg.stop_bits = bits;
        self
    }

    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.cfg.response_timeout = timeout;
        self
    }

    /// Validate and produce the configuration.
    pub fn build(self) -> std::result::Result<SerialConfig, ConfigError> {
        self.cfg.validate()?;
        Ok(self.cfg)
    }
}

impl Default for SerialConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Protocol engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// UART settings applied when the transport is opened.
    pub serial: SerialConfig,
    /// Longest frame accepted before the assembler declares overflow.
    pub max_frame_len: usize,
    /// Longest command name accepted by the parser.
    pub max_name_len: usize,
    /// Number of preallocated command slots.
    pub pool_slots: usize,
    /// Bytes requested per transport receive.
    pub read_chunk: usize,
    /// Interval between cooperative re-checks while waiting.
    pub poll_interval: Duration,
    /// Whether `init` performs the `AT`/`OK` exchange.
    pub handshake: bool,
    /// Bound on the whole handshake exchange.
    pub handshake_timeout: Duration,
    /// Consecutive link failures before `Ready -> Degraded`.
    pub degrade_after: u32,
    /// Consecutive link failures before `-> Faulted`.
    pub fault_after: u32,
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }

    pub(crate) fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.max_frame_len == 0 {
            return Err(ConfigError::Zero("max_frame_len"));
        }
        if self.max_name_len == 0 {
            return Err(ConfigError::Zero("max_name_len"));
        }
        if self.pool_slots == 0 {
            return Err(ConfigError::Zero("pool_slots"));
        }
        if self.read_chunk == 0 {
            return Err(ConfigError::Zero("read_chunk"));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Zero("poll_interval"));
        }
        if self.handshake && self.handshake_timeout.is_zero() {
            return Err(ConfigError::Zero("handshake_timeout"));
        }
        if self.degrade_after == 0 || self.fault_after <= self.degrade_after {
            return Err(ConfigError::Thresholds {
                degrade_after: self.degrade_after,
                fault_after: self.fault_after,
            });
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            max_name_len: DEFAULT_MAX_NAME_LEN,
            pool_slots: 4,
            read_chunk: 64,
            poll_interval: DEFAULT_POLL_INTERVAL,
            handshake: true,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            degrade_after: DEFAULT_DEGRADE_AFTER,
            fault_after: DEFAULT_FAULT_AFTER,
        }
    }
}

/// Fluent builder for [`EngineConfig`].
#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    cfg: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serial(mut self, serial: SerialConfig) -> Self {
        self.cfg.serial = serial;
        self
    }

    pub fn max_frame_len(mut self, len: usize) -> Self {
        self.cfg.max_frame_len = len;
        self
    }

    pub fn max_name_len(mut self, len: usize) -> Self {
        self.cfg.max_name_len = len;
        self
    }

    pub fn pool_slots(mut self, slots: usize) -> Self {
        self.cfg.pool_slots = slots;
        self
    }

    pub fn read_chunk(mut self, len: usize) -> Self {
        self.cfg.read_chunk = len;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.cfg.poll_interval = interval;
        self
    }

    pub fn handshake(mut self, enabled: bool) -> Self {
        self.cfg.handshake = enabled;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.cfg.handshake_timeout = timeout;
        self
    }

    pub fn thresholds(mut self, degrade_after: u32, fault_after: u32) -> Self {
        self.cfg.degrade_after = degrade_after;
        self.cfg.fault_after = fault_after;
        self
    }

    pub fn build(self) -> std::result::Result<EngineConfig, ConfigError> {
        self.cfg.validate()?;
        Ok(self.cfg)
    }
}
