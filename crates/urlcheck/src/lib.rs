//! Periodic reachability checks for a fixed set of URLs.
//!
//! This crate holds the probing core of the exporter:
//! - HTTP/HTTPS header-only checks
//! - Raw TCP connect checks for non-HTTP schemes (ftp, ssh, mysql, redis, ...)
//! - A ticker that fans out one task per target and retries connection failures
//! - An aggregation store with last results and per-status counters
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use urlcheck::{AggregationStore, CheckConfig, CheckerRegistry, Orchestrator};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(CheckerRegistry::with_defaults()?);
//! let orchestrator = Arc::new(Orchestrator::new(
//!     ["https://example.com", "redis://cache.internal"],
//!     CheckConfig::default(),
//!     registry,
//! )?);
//!
//! let store = Arc::new(AggregationStore::new(orchestrator.targets()));
//! let token = CancellationToken::new();
//!
//! if let Some(results) = orchestrator.results() {
//!     let store = store.clone();
//!     let token = token.clone();
//!     tokio::spawn(async move { store.consume(results, token).await });
//! }
//!
//! let runner = orchestrator.clone();
//! tokio::spawn(async move { runner.start(token).await });
//!
//! let snapshot = store.snapshot().await;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod checkers;
pub mod orchestrator;
pub mod store;
pub mod types;

pub use backoff::{Backoff, LinearBackoff};
pub use checkers::{CheckerRegistry, HttpChecker, ProtocolChecker, TcpChecker};
pub use orchestrator::{Orchestrator, RunState};
pub use store::{AggregationStore, StoreSnapshot, TargetSnapshot};
pub use types::{CheckConfig, CheckError, CheckResult, ERROR_LABEL, Target};
