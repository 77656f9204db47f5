//! Logging initialization and span helpers.
//!
//! Every allocation runs inside a span carrying the operation name and the
//! portfolio, so that conflicts and rollovers logged deep inside a store can be
//! traced back to the request that caused them.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops. Logs go to stderr.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `clientref_allocator=debug`)
///
/// # Example
///
/// ```rust
/// use clientref_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    init_logging_with_default(format, "info");
}

/// Like [`init_logging`], with the filter used when `RUST_LOG` is unset.
pub fn init_logging_with_default(format: LogFormat, default_directive: &str) {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json().with_writer(std::io::stderr))
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
                    .init();
            }
        }
    });
}

/// Reads the log format from `CLIENTREF_LOG_FORMAT` (`json` or anything else
/// for pretty output).
#[must_use]
pub fn log_format_from_env() -> LogFormat {
    match std::env::var("CLIENTREF_LOG_FORMAT") {
        Ok(value) if value.eq_ignore_ascii_case("json") => LogFormat::Json,
        _ => LogFormat::Pretty,
    }
}

/// Creates a span for allocation operations with standard fields.
///
/// # Example
///
/// ```rust
/// use clientref_core::observability::allocation_span;
///
/// let span = allocation_span("generate", 3);
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn allocation_span(operation: &str, portfolio: i64) -> Span {
    tracing::info_span!("allocation", op = operation, portfolio = portfolio)
}

/// Creates a span for a backfill batch.
#[must_use]
pub fn backfill_span(portfolio: i64, records: usize) -> Span {
    tracing::info_span!("backfill", portfolio = portfolio, records = records)
}
