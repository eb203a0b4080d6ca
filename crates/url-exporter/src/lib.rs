//! URL exporter - Prometheus exporter for URL reachability
//!
//! Periodically checks a fixed list of URLs and exposes the outcomes as
//! Prometheus metrics.
//!
//! # Components
//!
//! - **Config**: YAML file plus `URL_*` environment overrides
//! - **Scrape adapter**: renders the aggregation store on every scrape
//! - **HTTP server**: `/`, `/health` and `/metrics`
//! - **Server**: wires the orchestrator, the result consumer and the HTTP server
//!
//! The probing itself lives in the `urlcheck` crate.

pub mod config;
pub mod http_server;
pub mod metrics;
pub mod server;
pub mod telemetry;

pub use config::{Config, ConfigError, TelemetrySettings};
pub use http_server::{AppState, MetricsServer, router};
pub use metrics::ScrapeAdapter;
pub use server::ExporterServer;
pub use telemetry::{TelemetryGuard, init_telemetry, setup_tracing};
