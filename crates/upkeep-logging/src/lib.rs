//! ---
//! upkeep_section: "03-history-logging"
//! upkeep_subsection: "module"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Structured logging adapters and sinks."
//! upkeep_version: "v0.1.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Context-carrying logging helpers shared by the updater crates.

use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

pub mod macros;

#[doc(hidden)]
pub use tracing;

/// Initialize a baseline tracing subscriber suitable for development and CLI use.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Engine request identifier associated with the log event.
    pub request_id: Option<u64>,
    /// Module name the event concerns (`host` for the host application).
    pub module: Option<&'a str>,
    /// Engine command name.
    pub command: Option<&'a str>,
    /// Startup or update phase descriptor.
    pub phase: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an engine request identifier.
    pub fn with_request(mut self, request_id: u64) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// Attach a module name.
    pub fn with_module(mut self, module: &'a str) -> Self {
        self.module = Some(module);
        self
    }

    /// Attach a command name.
    pub fn with_command(mut self, command: &'a str) -> Self {
        self.command = Some(command);
        self
    }

    /// Attach a phase descriptor.
    pub fn with_phase(mut self, phase: &'a str) -> Self {
        self.phase = Some(phase);
        self
    }
}

/// High-level outcome used when emitting lifecycle log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOutcome {
    /// The operation completed successfully.
    Success,
    /// The operation failed or was aborted.
    Fault,
}

impl LifecycleOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            LifecycleOutcome::Success => "success",
            LifecycleOutcome::Fault => "fault",
        }
    }
}

/// Emit a standardized lifecycle event with a success/fault outcome.
pub fn log_lifecycle_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: LifecycleOutcome,
) {
    let ctx = context.cloned().unwrap_or_default();
    match outcome {
        LifecycleOutcome::Success => tracing::event!(
            Level::INFO,
            event,
            outcome = outcome.as_str(),
            request_id = ctx.request_id.unwrap_or_default(),
            module = ctx.module.unwrap_or(""),
            command = ctx.command.unwrap_or(""),
            phase = ctx.phase.unwrap_or(""),
            message = %message
        ),
        LifecycleOutcome::Fault => tracing::event!(
            Level::ERROR,
            event,
            outcome = outcome.as_str(),
            request_id = ctx.request_id.unwrap_or_default(),
            module = ctx.module.unwrap_or(""),
            command = ctx.command.unwrap_or(""),
            phase = ctx.phase.unwrap_or(""),
            message = %message
        ),
    }
}
