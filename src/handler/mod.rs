//! Handler module - dispatching received commands.
//!
//! Provides:
//! - [`CommandRouter`] - maps command names to handlers
//! - [`DispatchOutcome`] - what happened, rendered for the operator console
//!
//! # Example
//!
//! ```ignore
//! use companion_link::handler::CommandRouter;
//!
//! let mut router = CommandRouter::new();
//! router.route("set_led_frequency", |param| {
//!     let hz: u16 = param.unwrap_or_default().parse().map_err(|e| format!("{e}"))?;
//!     board.set_led_frequency(hz);
//!     Ok(())
//! });
//!
//! let cmd = engine.poll_command(deadline).await?;
//! println!("{}", router.dispatch(&cmd));
//! cmd.release();
//! ```

mod router;

pub use router::{CommandRouter, DispatchOutcome, Handler, HandlerResult};
