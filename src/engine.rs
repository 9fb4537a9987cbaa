//! Protocol engine and session lifecycle.
//!
//! The [`ProtocolEngine`] owns the transport and every protocol component,
//! and sequences them:
//! 1. Open the transport with the configured UART settings
//! 2. Optionally exchange `AT` / `OK` with the companion chip
//! 3. Assemble frames, parse commands, hand them out through the mailbox
//! 4. Encode and send telemetry
//!
//! Session states:
//! ```text
//! Uninitialized -> Handshaking -> Ready <-> Degraded
//!                       |           \        /
//!                       +--------> Faulted <+      (any) -> Closed
//! ```
//! A run of consecutive link failures moves `Ready` to `Degraded` and then to
//! `Faulted`; one success moves `Degraded` back to `Ready`. Leaving `Faulted`
//! takes an explicit [`recover`](ProtocolEngine::recover).
//!
//! # Example
//!
//! ```ignore
//! use companion_link::{Deadline, ProtocolEngine};
//!
//! let mut engine = ProtocolEngine::builder(transport).init().await?;
//!
//! loop {
//!     match engine.poll_command(Deadline::after(Duration::from_secs(5))).await {
//!         Ok(cmd) => {
//!             println!("{}", router.dispatch(&cmd));
//!             cmd.release();
//!         }
//!         Err(LinkError::Timeout) => {}
//!         Err(e) if e.is_fatal() => return Err(e),
//!         Err(e) => tracing::warn!("poll failed: {e}"),
//!     }
//!     engine.publish_telemetry("cpu_temperature", read_cpu_temp()).await?;
//! }
//! ```

use std::fmt;

use bytes::BytesMut;

use crate::config::{EngineConfig, SerialConfig};
use crate::deadline::Deadline;
use crate::error::{LinkError, Result};
use crate::mailbox::Mailbox;
use crate::protocol::{
    line, Command, CommandParser, CommandPool, FixedPoint, FrameAssembler, TelemetryEntry,
    HANDSHAKE_ACK, HANDSHAKE_PROBE,
};
use crate::transport::Transport;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Uninitialized,
    Handshaking,
    Ready,
    Degraded,
    Faulted,
    Closed,
}

impl SessionState {
    /// Whether `poll_command` and `publish_telemetry` may touch the link.
    pub fn accepts_traffic(self) -> bool {
        matches!(self, SessionState::Ready | SessionState::Degraded)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Handshaking => "handshaking",
            SessionState::Ready => "ready",
            SessionState::Degraded => "degraded",
            SessionState::Faulted => "faulted",
            SessionState::Closed => "closed",
        })
    }
}

/// Counters describing a session's traffic so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Commands parsed and handed to the mailbox.
    pub commands: u64,
    pub telemetry_sent: u64,
    /// Oversized frames dropped by the assembler.
    pub framing_errors: u64,
    /// Complete frames that failed to parse.
    pub parse_errors: u64,
    pub transport_errors: u64,
    pub timeouts: u64,
    /// Current run of consecutive link failures.
    pub streak: u32,
}

/// Builder for configuring and creating a [`ProtocolEngine`].
pub struct EngineBuilder<T> {
    transport: T,
    config: EngineConfig,
}

impl<T: Transport> EngineBuilder<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            config: EngineConfig::default(),
        }
    }

    /// Replace the whole engine configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the UART settings applied on open.
    pub fn serial(mut self, serial: SerialConfig) -> Self {
        self.config.serial = serial;
        self
    }

    /// Enable or disable the `AT`/`OK` exchange during `init`.
    pub fn handshake(mut self, enabled: bool) -> Self {
        self.config.handshake = enabled;
        self
    }

    /// Validate the configuration and create an uninitialized engine.
    pub fn build(self) -> Result<ProtocolEngine<T>> {
        ProtocolEngine::new(self.transport, self.config)
    }

    /// Build and run [`ProtocolEngine::init`].
    pub async fn init(self) -> Result<ProtocolEngine<T>> {
        let mut engine = self.build()?;
        engine.init().await?;
        Ok(engine)
    }
}

/// A session with the companion chip.
pub struct ProtocolEngine<T> {
    transport: T,
    config: EngineConfig,
    state: SessionState,
    assembler: FrameAssembler,
    parser: CommandParser,
    mailbox: Mailbox,
    read_buf: Vec<u8>,
    out_buf: BytesMut,
    stats: EngineStats,
}

impl<T: Transport> ProtocolEngine<T> {
    /// Create a new engine builder.
    pub fn builder(transport: T) -> EngineBuilder<T> {
        EngineBuilder::new(transport)
    }

    /// Create an uninitialized engine.
    ///
    /// Fails with [`LinkError::Config`] for an invalid configuration.
    pub fn new(transport: T, config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let pool = CommandPool::new(config.pool_slots, config.max_name_len, config.max_frame_len);
        Ok(Self {
            transport,
            assembler: FrameAssembler::with_max_frame_len(config.max_frame_len),
            parser: CommandParser::new(pool, config.max_name_len),
            mailbox: Mailbox::with_poll_interval(config.poll_interval),
            read_buf: vec![0u8; config.read_chunk],
            out_buf: BytesMut::with_capacity(config.max_frame_len + 1),
            state: SessionState::Uninitialized,
            stats: EngineStats::default(),
            config,
        })
    }

    /// Open the transport and perform the handshake.
    ///
    /// Runs from `Uninitialized`, or from `Faulted` to retry a failed init.
    /// A ready session is left alone. On failure the session is `Faulted`
    /// and the error is returned; [`LinkError::is_fatal`] tells whether a
    /// retry makes sense.
    pub async fn init(&mut self) -> Result<()> {
        match self.state {
            SessionState::Uninitialized | SessionState::Faulted => {}
            SessionState::Ready | SessionState::Degraded => return Ok(()),
            state => return Err(LinkError::Faulted(state)),
        }

        self.set_state(SessionState::Handshaking);
        self.assembler.clear();
        if let Some(stale) = self.mailbox.try_take() {
            tracing::debug!(name = stale.name(), "releasing command left from previous session");
            stale.release();
        }
        self.stats.streak = 0;

        if let Err(e) = self.transport.open(&self.config.serial).await {
            self.count_error(&e);
            self.set_state(SessionState::Faulted);
            return Err(e);
        }

        if self.config.handshake {
            if let Err(e) = self.handshake().await {
                self.count_error(&e);
                self.set_state(SessionState::Faulted);
                if let Err(close_err) = self.transport.close().await {
                    tracing::debug!("close after failed handshake: {close_err}");
                }
                return Err(e);
            }
        }

        self.set_state(SessionState::Ready);
        Ok(())
    }

    /// Send the probe and wait for the acknowledgment frame.
    async fn handshake(&mut self) -> Result<()> {
        let deadline = Deadline::after(self.config.handshake_timeout);
        self.transport.send(&line(HANDSHAKE_PROBE), deadline).await?;
        tracing::debug!("handshake probe sent");

        loop {
            while let Some(frame) = self.assembler.next_frame() {
                match frame {
                    Ok(frame) if &frame[..] == HANDSHAKE_ACK => {
                        tracing::debug!("handshake acknowledged");
                        return Ok(());
                    }
                    Ok(frame) => {
                        tracing::debug!(frame = ?String::from_utf8_lossy(&frame), "ignoring frame during handshake");
                    }
                    Err(_) => self.stats.framing_errors += 1,
                }
            }

            if deadline.expired() {
                return Err(LinkError::Timeout);
            }
            let n = self.transport.receive(&mut self.read_buf, deadline).await?;
            self.assembler.extend(&self.read_buf[..n]);
        }
    }

    /// Wait until `deadline` for the next command.
    ///
    /// Frames already buffered are served before the transport is read.
    /// Oversized and malformed frames are logged, counted and skipped. A
    /// quiet line returns [`LinkError::Timeout`] without counting as a link
    /// failure; a timeout in the middle of a frame does count.
    ///
    /// The returned command must be [`release`](Command::release)d.
    pub async fn poll_command(&mut self, deadline: Deadline) -> Result<Command> {
        self.ensure_traffic()?;

        loop {
            if let Some(command) = self.mailbox.try_take() {
                return Ok(command);
            }

            if self.pump_frames()? {
                continue;
            }

            if deadline.expired() {
                return Err(self.receive_timeout());
            }

            match self.transport.receive(&mut self.read_buf, deadline).await {
                Ok(n) => {
                    self.record_success();
                    self.assembler.extend(&self.read_buf[..n]);
                }
                Err(LinkError::Timeout) => return Err(self.receive_timeout()),
                Err(e) => return Err(self.record_failure(e)),
            }
        }
    }

    /// Move buffered frames toward the mailbox until one command lands.
    ///
    /// Returns `true` once a command is pending.
    fn pump_frames(&mut self) -> Result<bool> {
        while let Some(frame) = self.assembler.next_frame() {
            let frame = match frame {
                Ok(frame) => frame,
                Err(_) => {
                    self.stats.framing_errors += 1;
                    continue;
                }
            };

            match self.parser.parse(&frame) {
                Ok(command) => {
                    self.stats.commands += 1;
                    tracing::debug!(name = command.name(), "command received");
                    if self.mailbox.offer(command) {
                        return Ok(true);
                    }
                }
                Err(LinkError::Parse(e)) => {
                    self.stats.parse_errors += 1;
                    tracing::warn!(frame = ?String::from_utf8_lossy(&frame), "dropping frame: {e}");
                }
                Err(e) => {
                    tracing::error!(frame = ?String::from_utf8_lossy(&frame), "cannot store command: {e}");
                    if e.is_fatal() {
                        self.set_state(SessionState::Faulted);
                    }
                    return Err(e);
                }
            }
        }
        Ok(false)
    }

    fn receive_timeout(&mut self) -> LinkError {
        self.stats.timeouts += 1;
        if self.assembler.has_partial() {
            self.record_failure(LinkError::Timeout)
        } else {
            LinkError::Timeout
        }
    }

    /// Encode and send one telemetry reading.
    ///
    /// Fire-and-forget: a failed send is reported and counted, not retried.
    pub async fn publish_telemetry(&mut self, key: &str, value: f64) -> Result<()> {
        self.ensure_traffic()?;
        self.publish_fixed(key, FixedPoint::from_f64(value)?).await
    }

    /// Send a reading already in fixed-point form.
    pub async fn publish_fixed(&mut self, key: &str, value: FixedPoint) -> Result<()> {
        self.ensure_traffic()?;
        let entry = TelemetryEntry::new(key, value)?;

        self.out_buf.clear();
        entry.encode_into(&mut self.out_buf);

        let deadline = Deadline::after(self.config.serial.response_timeout());
        match self.transport.send(&self.out_buf, deadline).await {
            Ok(()) => {
                self.stats.telemetry_sent += 1;
                self.record_success();
                tracing::debug!(key, %value, "telemetry sent");
                Ok(())
            }
            Err(e) => {
                if matches!(e, LinkError::Timeout) {
                    self.stats.timeouts += 1;
                }
                Err(self.record_failure(e))
            }
        }
    }

    /// Leave `Faulted`: close the transport, reopen it and handshake again.
    pub async fn recover(&mut self) -> Result<()> {
        if self.state != SessionState::Faulted {
            return Err(LinkError::Faulted(self.state));
        }
        tracing::info!("recovering session");

        if self.transport.is_open() {
            if let Err(e) = self.transport.close().await {
                tracing::debug!("close before recovery: {e}");
            }
        }
        self.init().await
    }

    /// End the session: release any pending command and close the transport.
    pub async fn shutdown(mut self) -> Result<()> {
        self.mailbox.close();
        let result = if self.transport.is_open() {
            self.transport.close().await
        } else {
            Ok(())
        };
        self.set_state(SessionState::Closed);
        result
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Pool backing received commands; useful to check for leaked commands.
    pub fn command_pool(&self) -> &CommandPool {
        self.parser.pool()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn ensure_traffic(&self) -> Result<()> {
        if self.state.accepts_traffic() {
            Ok(())
        } else {
            Err(LinkError::Faulted(self.state))
        }
    }

    fn count_error(&mut self, err: &LinkError) {
        match err {
            LinkError::Transport(_) => self.stats.transport_errors += 1,
            LinkError::Timeout => self.stats.timeouts += 1,
            _ => {}
        }
    }

    fn record_success(&mut self) {
        self.stats.streak = 0;
        if self.state == SessionState::Degraded {
            self.set_state(SessionState::Ready);
        }
    }

    /// Count a failed exchange and escalate the session if needed.
    fn record_failure(&mut self, err: LinkError) -> LinkError {
        if !err.is_link_failure() {
            return err;
        }
        if matches!(err, LinkError::Transport(_)) {
            self.stats.transport_errors += 1;
        }
        self.stats.streak += 1;
        let streak = self.stats.streak;

        if err.is_fatal() || streak >= self.config.fault_after {
            self.set_state(SessionState::Faulted);
        } else if streak >= self.config.degrade_after && self.state == SessionState::Ready {
            self.set_state(SessionState::Degraded);
        } else {
            tracing::debug!(streak, "link failure: {err}");
        }
        err
    }

    fn set_state(&mut self, next: SessionState) {
        let prev = self.state;
        if prev == next {
            return;
        }
        self.state = next;
        match next {
            SessionState::Faulted => {
                tracing::error!(from = %prev, streak = self.stats.streak, "session faulted")
            }
            _ => tracing::info!(from = %prev, to = %next, "session state changed"),
        }
    }
}

impl<T> fmt::Debug for ProtocolEngine<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolEngine")
            .field("state", &self.state)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
