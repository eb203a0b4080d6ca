//! Logging utilities for the url-exporter components.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Build the level filter.
///
/// The RUST_LOG environment variable wins over the configured level.
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Returns true when `format` selects the JSON formatter.
pub fn is_json(format: &str) -> bool {
    format.eq_ignore_ascii_case("json")
}

/// Initialize tracing with the human readable formatter.
pub fn init(level: &str) {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(env_filter(level))
        .init();
}

/// Initialize tracing with JSON formatting (useful for structured logging).
pub fn init_json(level: &str) {
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(env_filter(level))
        .init();
}

/// Initialize tracing with the formatter named by `format` (`text` or `json`).
pub fn init_with_format(level: &str, format: &str) {
    if is_json(format) {
        init_json(level);
    } else {
        init(level);
    }
}
