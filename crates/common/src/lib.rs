//! Common utilities and types shared across the url-exporter crates.

pub mod error;
pub mod logging;

pub use error::{Error, Result};
