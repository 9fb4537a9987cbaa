//! # companion-link
//!
//! Serial protocol engine for a host controller talking to a companion
//! radio/cloud-gateway chip.
//!
//! Two kinds of traffic share one byte link:
//!
//! - **Commands** (inbound): `<name>[ <parameters>]\n` lines sent by the
//!   companion chip acting as a remote operator console
//! - **Telemetry** (outbound): `<key>=<whole>.<ff>\n` readings published by
//!   the host
//!
//! ## Architecture
//!
//! ```text
//! Transport -> FrameAssembler -> CommandParser -> Mailbox -> poll_command
//! publish_telemetry -> TelemetryEntry -> Transport
//! ```
//!
//! Every operation that waits takes a [`Deadline`] and always returns by it.
//! Interrupt handlers talk to tasks only through the atomic
//! [`CompletionSignal`](signal::CompletionSignal).
//!
//! ## Example
//!
//! ```ignore
//! use companion_link::{Deadline, ProtocolEngine};
//! use companion_link::transport::StreamTransport;
//!
//! #[tokio::main]
//! async fn main() -> companion_link::Result<()> {
//!     let link = StreamTransport::connect_unix("/run/companion.sock").await?;
//!     let mut engine = ProtocolEngine::builder(link).init().await?;
//!
//!     let cmd = engine.poll_command(Deadline::after(Duration::from_secs(5))).await?;
//!     println!("{cmd}");
//!     cmd.release();
//!
//!     engine.publish_telemetry("cpu_temperature", 41.5).await?;
//!     engine.shutdown().await
//! }
//! ```

pub mod config;
pub mod deadline;
pub mod error;
pub mod handler;
pub mod mailbox;
pub mod protocol;
pub mod signal;
pub mod transport;

mod engine;

pub use config::{EngineConfig, SerialConfig};
pub use deadline::Deadline;
pub use engine::{EngineBuilder, EngineStats, ProtocolEngine, SessionState};
pub use error::{LinkError, Result};
pub use protocol::Command;
