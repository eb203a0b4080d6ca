//! URL exporter binary

use url_exporter::{Config, ExporterServer, setup_tracing};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Tracing is not initialized yet, so configuration errors go to stderr
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let _telemetry_guard =
        setup_tracing(&config.log_level, &config.log_format, &config.telemetry).await?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        instance = %config.instance_id,
        port = config.listen_port,
        targets = config.targets.len(),
        interval = ?config.check_interval,
        timeout = ?config.timeout,
        "Starting URL exporter"
    );

    let server = ExporterServer::new(config)?;
    server.run().await?;

    // Telemetry guard will flush spans on drop

    Ok(())
}
