//! Tracing subscriber initialization.
//!
//! Library code logs through both `tracing` and `log`; `LogTracer` forwards
//! the `log` records into the same subscriber.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Installs the global subscriber. `RUST_LOG` wins over `default_filter`.
///
/// Returns an error if a global subscriber or logger was already set.
pub fn init_logging(default_filter: &str, json: bool) -> Result<(), String> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if json {
        tracing::subscriber::set_global_default(
            registry.with(fmt::layer().json().with_current_span(true)),
        )
    } else {
        tracing::subscriber::set_global_default(
            registry.with(fmt::layer().compact().with_target(false).with_line_number(true)),
        )
    };
    installed.map_err(|e| format!("Failed to install tracing subscriber: {}", e))?;

    tracing_log::LogTracer::init().map_err(|e| format!("Failed to install LogTracer: {}", e))
}
