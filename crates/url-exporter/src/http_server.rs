//! HTTP endpoints: service info, liveness and Prometheus metrics.

use crate::metrics::ScrapeAdapter;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use urlcheck::AggregationStore;

/// Endpoints served by the exporter
pub const ENDPOINTS: [&str; 3] = ["/", "/health", "/metrics"];

/// Build metadata, injected through the environment at compile time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildInfo {
    pub version: String,
    pub commit: String,
    pub date: String,
    pub built_by: String,
}

impl BuildInfo {
    pub fn from_env() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            commit: option_env!("URL_EXPORTER_COMMIT").unwrap_or("unknown").to_string(),
            date: option_env!("URL_EXPORTER_DATE").unwrap_or("unknown").to_string(),
            built_by: option_env!("URL_EXPORTER_BUILT_BY").unwrap_or("unknown").to_string(),
        }
    }
}

/// Body of `GET /`
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    pub service: &'static str,
    #[serde(flatten)]
    pub build: BuildInfo,
    pub instance: String,
    pub targets: usize,
    pub status: &'static str,
    pub endpoints: [&'static str; 3],
}

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    store: Arc<AggregationStore>,
    adapter: Arc<ScrapeAdapter>,
    info: Arc<ServiceInfo>,
}

impl AppState {
    pub fn new(store: Arc<AggregationStore>, adapter: ScrapeAdapter, targets: usize) -> Self {
        let info = ServiceInfo {
            service: "url-exporter",
            build: BuildInfo::from_env(),
            instance: adapter.instance().to_string(),
            targets,
            status: "running",
            endpoints: ENDPOINTS,
        };
        Self {
            store,
            adapter: Arc::new(adapter),
            info: Arc::new(info),
        }
    }
}

/// Build the exporter router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// HTTP server for the exporter endpoints
pub struct MetricsServer {
    state: AppState,
    listener: TcpListener,
}

impl MetricsServer {
    /// Bind the listen address
    pub async fn bind(state: AppState, listen_addr: &str) -> common::Result<Self> {
        let listener = TcpListener::bind(listen_addr).await?;
        Ok(Self::from_listener(state, listener))
    }

    /// Serve on an already bound listener
    pub fn from_listener(state: AppState, listener: TcpListener) -> Self {
        Self { state, listener }
    }

    pub fn local_addr(&self) -> common::Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `token` is cancelled, then finish in-flight requests
    pub async fn run(self, token: CancellationToken) -> common::Result<()> {
        let listen_addr = self.local_addr()?;
        info!(listen_addr = %listen_addr, "Metrics server listening");

        axum::serve(self.listener, router(self.state))
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await?;

        info!("Metrics server stopped");
        Ok(())
    }
}

/// Handler for / endpoint
async fn root_handler(State(state): State<AppState>) -> Json<ServiceInfo> {
    Json(state.info.as_ref().clone())
}

/// Handler for /health endpoint
async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Media type of the prometheus-client text encoding
pub const METRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Handler for /metrics endpoint
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let snapshot = state.store.snapshot().await;

    match state.adapter.render(&snapshot) {
        Ok(buffer) => (
            StatusCode::OK,
            [("content-type", METRICS_CONTENT_TYPE)],
            buffer,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
                .into_response()
        }
    }
}
