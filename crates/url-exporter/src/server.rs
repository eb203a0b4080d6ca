//! Exporter wiring: orchestrator, result consumer and HTTP server.

use crate::config::Config;
use crate::http_server::{AppState, MetricsServer};
use crate::metrics::ScrapeAdapter;
use common::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use urlcheck::{AggregationStore, CheckerRegistry, Orchestrator};

/// Bounded wait for the orchestrator to stop on shutdown
pub const SHUTDOWN_WAIT: Duration = Duration::from_secs(5);

/// URL exporter server
pub struct ExporterServer {
    config: Config,
    orchestrator: Arc<Orchestrator>,
    store: Arc<AggregationStore>,
    state: AppState,
}

impl ExporterServer {
    /// Build all components from a loaded configuration
    pub fn new(config: Config) -> Result<Self> {
        let registry = CheckerRegistry::with_defaults().map_err(Error::checker)?;
        Self::with_registry(config, registry)
    }

    /// Build with a custom checker registry
    pub fn with_registry(config: Config, registry: CheckerRegistry) -> Result<Self> {
        let orchestrator = Arc::new(Orchestrator::new(
            config.targets.iter().cloned(),
            config.to_check_config(),
            Arc::new(registry),
        )?);
        let store = Arc::new(AggregationStore::new(orchestrator.targets()));
        let adapter = ScrapeAdapter::new(config.instance_id.clone());
        let state = AppState::new(store.clone(), adapter, orchestrator.targets().len());

        Ok(Self {
            config,
            orchestrator,
            store,
            state,
        })
    }

    /// Aggregated results, shared with the HTTP handlers
    pub fn store(&self) -> Arc<AggregationStore> {
        self.store.clone()
    }

    /// Run until Ctrl-C or SIGTERM
    pub async fn run(self) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Bind `0.0.0.0:<listenPort>` and run until `shutdown` completes
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let listen_addr = format!("0.0.0.0:{}", self.config.listen_port);
        let listener = TcpListener::bind(&listen_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Run on an already bound listener until `shutdown` completes
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let results = self
            .orchestrator
            .results()
            .ok_or_else(|| Error::other("result queue already taken"))?;
        let token = CancellationToken::new();

        let consumer_handle = tokio::spawn({
            let store = self.store.clone();
            let token = token.clone();
            async move { store.consume(results, token).await }
        });

        let orchestrator_handle = tokio::spawn({
            let orchestrator = self.orchestrator.clone();
            let token = token.clone();
            async move { orchestrator.start(token).await }
        });

        let server = MetricsServer::from_listener(self.state.clone(), listener);
        let mut http_handle = tokio::spawn(server.run(token.clone()));

        info!(
            targets = self.orchestrator.targets().len(),
            instance = %self.config.instance_id,
            "All tasks spawned, server running"
        );

        let http_result = tokio::select! {
            _ = shutdown => {
                info!("Shutdown signal received");
                None
            }
            result = &mut http_handle => {
                warn!("Metrics server exited early");
                Some(result)
            }
        };

        token.cancel();

        if let Err(e) = self.orchestrator.shutdown(SHUTDOWN_WAIT).await {
            warn!(error = %e, "Orchestrator shutdown incomplete");
        }
        if let Err(e) = orchestrator_handle.await {
            warn!(error = %e, "Orchestrator task failed");
        }
        if let Err(e) = consumer_handle.await {
            warn!(error = %e, "Result consumer task failed");
        }

        let http_result = match http_result {
            Some(result) => result,
            None => http_handle.await,
        };

        info!("URL exporter stopped");
        http_result.map_err(Error::other)?
    }
}

/// Resolves on Ctrl-C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
