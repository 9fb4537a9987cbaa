//! Command router for dispatching received commands by name.
//!
//! Handlers are plain synchronous closures: they drive board glue (LEDs,
//! timers) and return at once. Each route declares whether its parameter is
//! required; a missing required parameter never reaches the handler.
//!
//! # Example
//!
//! ```
//! use companion_link::handler::{CommandRouter, DispatchOutcome};
//! use companion_link::protocol::CommandPool;
//!
//! let mut router = CommandRouter::new();
//! router.route("set_red_led", |param| match param {
//!     Some("on") | Some("off") => Ok(()),
//!     _ => Err("expected on/off".into()),
//! });
//!
//! let pool = CommandPool::new(1, 64, 256);
//! let cmd = pool.acquire("set_red_led", Some("on")).unwrap();
//! assert!(router.dispatch(&cmd).is_handled());
//! cmd.release();
//! ```

use std::collections::HashMap;
use std::fmt;

use crate::protocol::Command;

/// Result type for handler functions. `Err` carries the rejection reason.
pub type HandlerResult = std::result::Result<(), String>;

/// Trait for command handlers.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, parameters: Option<&str>) -> HandlerResult;
}

impl<F> Handler for F
where
    F: Fn(Option<&str>) -> HandlerResult + Send + Sync + 'static,
{
    fn call(&self, parameters: Option<&str>) -> HandlerResult {
        self(parameters)
    }
}

/// Entry for a registered command.
struct Route {
    handler: Box<dyn Handler>,
    needs_parameter: bool,
}

/// What happened to a dispatched command.
///
/// `Display` renders the line shown on the operator console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled {
        name: String,
        parameters: Option<String>,
    },
    UnknownCommand(String),
    MissingParameter(String),
    Rejected { name: String, reason: String },
}

impl DispatchOutcome {
    pub fn is_handled(&self) -> bool {
        matches!(self, DispatchOutcome::Handled { .. })
    }
}

impl fmt::Display for DispatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchOutcome::Handled { name, parameters } => write!(
                f,
                "Command received: {name}, parameters: {}",
                parameters.as_deref().unwrap_or("<none>")
            ),
            DispatchOutcome::UnknownCommand(name) => {
                write!(f, "ERROR: Unknown command received: {name}")
            }
            DispatchOutcome::MissingParameter(name) => {
                write!(f, "ERROR: Command '{name}' needs a parameter!")
            }
            DispatchOutcome::Rejected { name, .. } => {
                write!(f, "ERROR: unknown parameter for {name}")
            }
        }
    }
}

/// Maps command names to handlers.
#[derive(Default)]
pub struct CommandRouter {
    routes: HashMap<String, Route>,
}

impl CommandRouter {
    /// Create a new empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler whose command requires a parameter.
    pub fn route<F>(&mut self, name: &str, handler: F) -> &mut Self
    where
        F: Fn(Option<&str>) -> HandlerResult + Send + Sync + 'static,
    {
        self.insert(name, handler, true)
    }

    /// Register a handler whose parameter may be absent.
    pub fn route_with_optional<F>(&mut self, name: &str, handler: F) -> &mut Self
    where
        F: Fn(Option<&str>) -> HandlerResult + Send + Sync + 'static,
    {
        self.insert(name, handler, false)
    }

    fn insert<H: Handler>(&mut self, name: &str, handler: H, needs_parameter: bool) -> &mut Self {
        let previous = self.routes.insert(
            name.to_string(),
            Route {
                handler: Box::new(handler),
                needs_parameter,
            },
        );
        if previous.is_some() {
            tracing::debug!(name, "route replaced");
        }
        self
    }

    /// Run the handler for `command`.
    ///
    /// Unknown names are reported in the outcome, not treated as errors.
    pub fn dispatch(&self, command: &Command) -> DispatchOutcome {
        let name = command.name();
        let Some(route) = self.routes.get(name) else {
            tracing::warn!(name, "unknown command");
            return DispatchOutcome::UnknownCommand(name.to_string());
        };

        let parameters = command.parameters();
        if route.needs_parameter && parameters.is_none() {
            tracing::warn!(name, "command missing parameter");
            return DispatchOutcome::MissingParameter(name.to_string());
        }

        match route.handler.call(parameters) {
            Ok(()) => {
                tracing::debug!(name, ?parameters, "command handled");
                DispatchOutcome::Handled {
                    name: name.to_string(),
                    parameters: parameters.map(str::to_string),
                }
            }
            Err(reason) => {
                tracing::warn!(name, %reason, "command rejected");
                DispatchOutcome::Rejected {
                    name: name.to_string(),
                    reason,
                }
            }
        }
    }

    /// Check if a command name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.routes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Registered command names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for CommandRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRouter")
            .field("routes", &self.names())
            .finish()
    }
}
