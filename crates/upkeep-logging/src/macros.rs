//! ---
//! upkeep_section: "03-history-logging"
//! upkeep_subsection: "module"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Structured logging adapters and sinks."
//! upkeep_version: "v0.1.0-prealpha"
//! upkeep_owner: "tbd"
//! ---

/// Emit an informational log enriched with updater context.
#[macro_export]
macro_rules! upkeep_info {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        $crate::tracing::event!(
            $crate::tracing::Level::INFO,
            request_id = ctx.request_id.unwrap_or_default(),
            module = ctx.module.unwrap_or(""),
            command = ctx.command.unwrap_or(""),
            phase = ctx.phase.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        let ctx = &$crate::LogContext::default();
        $crate::tracing::event!(
            $crate::tracing::Level::INFO,
            request_id = ctx.request_id.unwrap_or_default(),
            module = ctx.module.unwrap_or(""),
            command = ctx.command.unwrap_or(""),
            phase = ctx.phase.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit a debug log enriched with updater context.
#[macro_export]
macro_rules! upkeep_debug {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        $crate::tracing::event!(
            $crate::tracing::Level::DEBUG,
            request_id = ctx.request_id.unwrap_or_default(),
            module = ctx.module.unwrap_or(""),
            command = ctx.command.unwrap_or(""),
            phase = ctx.phase.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        let ctx = &$crate::LogContext::default();
        $crate::tracing::event!(
            $crate::tracing::Level::DEBUG,
            request_id = ctx.request_id.unwrap_or_default(),
            module = ctx.module.unwrap_or(""),
            command = ctx.command.unwrap_or(""),
            phase = ctx.phase.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit a warning log enriched with updater context.
#[macro_export]
macro_rules! upkeep_warn {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        $crate::tracing::event!(
            $crate::tracing::Level::WARN,
            request_id = ctx.request_id.unwrap_or_default(),
            module = ctx.module.unwrap_or(""),
            command = ctx.command.unwrap_or(""),
            phase = ctx.phase.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        let ctx = &$crate::LogContext::default();
        $crate::tracing::event!(
            $crate::tracing::Level::WARN,
            request_id = ctx.request_id.unwrap_or_default(),
            module = ctx.module.unwrap_or(""),
            command = ctx.command.unwrap_or(""),
            phase = ctx.phase.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit an error log enriched with updater context.
#[macro_export]
macro_rules! upkeep_error {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        $crate::tracing::event!(
            $crate::tracing::Level::ERROR,
            request_id = ctx.request_id.unwrap_or_default(),
            module = ctx.module.unwrap_or(""),
            command = ctx.command.unwrap_or(""),
            phase = ctx.phase.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        let ctx = &$crate::LogContext::default();
        $crate::tracing::event!(
            $crate::tracing::Level::ERROR,
            request_id = ctx.request_id.unwrap_or_default(),
            module = ctx.module.unwrap_or(""),
            command = ctx.command.unwrap_or(""),
            phase = ctx.phase.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
}
