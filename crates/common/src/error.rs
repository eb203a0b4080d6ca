//! Common error types for the url-exporter components.

use std::fmt;

/// A specialized Result type for exporter operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Lifecycle and startup errors shared by the exporter crates.
///
/// Per-check failures are not represented here; they travel inside
/// check results and never abort the process.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Checker error: {0}")]
    Checker(String),

    #[error("Shutdown error: {0}")]
    Shutdown(String),

    #[error("Telemetry error: {0}")]
    Telemetry(String),

    #[error("Unknown error: {0}")]
    Other(String),
}

impl Error {
    /// Create a new configuration error.
    pub fn config(msg: impl fmt::Display) -> Self {
        Error::Config(msg.to_string())
    }

    /// Create a new checker construction error.
    pub fn checker(msg: impl fmt::Display) -> Self {
        Error::Checker(msg.to_string())
    }

    /// Create a new shutdown error.
    pub fn shutdown(msg: impl fmt::Display) -> Self {
        Error::Shutdown(msg.to_string())
    }

    /// Create a new telemetry error.
    pub fn telemetry(msg: impl fmt::Display) -> Self {
        Error::Telemetry(msg.to_string())
    }

    /// Create a new other error.
    pub fn other(msg: impl fmt::Display) -> Self {
        Error::Other(msg.to_string())
    }
}
