//! Logging bootstrap with optional OpenTelemetry export
//!
//! With telemetry disabled this is plain `tracing-subscriber` output. When
//! enabled, spans are additionally exported over OTLP/gRPC.

use crate::config::TelemetrySettings;
use common::logging::{env_filter, init_with_format, is_json};
use common::{Error, Result};
use opentelemetry::{KeyValue, trace::TracerProvider as _};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource, runtime,
    trace::{RandomIdGenerator, Sampler, TracerProvider},
};
use tracing_subscriber::{Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// OpenTelemetry tracer guard
///
/// When dropped, flushes all pending spans and shuts down the tracer
pub struct TelemetryGuard {
    provider: TracerProvider,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        opentelemetry::global::shutdown_tracer_provider();
    }
}

/// Build the OTLP tracer provider and install it globally.
///
/// Returns `None` when telemetry is disabled.
pub fn init_telemetry(settings: &TelemetrySettings) -> Result<Option<TelemetryGuard>> {
    if !settings.enabled {
        return Ok(None);
    }

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(settings.otlp_endpoint.as_str())
        .build()
        .map_err(Error::telemetry)?;

    let resource = Resource::new(vec![
        KeyValue::new("service.name", settings.service_name.clone()),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION").to_string()),
    ]);

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(resource),
        )
        .build();

    opentelemetry::global::set_tracer_provider(provider.clone());

    Ok(Some(TelemetryGuard { provider }))
}

/// Install the global subscriber.
///
/// `RUST_LOG` overrides `log_level`; `log_format` selects text or JSON.
pub async fn setup_tracing(
    log_level: &str,
    log_format: &str,
    settings: &TelemetrySettings,
) -> Result<Option<TelemetryGuard>> {
    let Some(guard) = init_telemetry(settings)? else {
        init_with_format(log_level, log_format);
        tracing::info!("Tracing initialized without OpenTelemetry");
        return Ok(None);
    };

    let tracer = guard.provider.tracer("url-exporter");
    let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);

    let fmt_layer = if is_json(log_format) {
        fmt::layer().json().boxed()
    } else {
        fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter(log_level))
        .with(telemetry_layer)
        .try_init()
        .map_err(Error::telemetry)?;

    tracing::info!(
        service_name = %settings.service_name,
        otlp_endpoint = %settings.otlp_endpoint,
        "Tracing initialized with OpenTelemetry integration"
    );

    Ok(Some(guard))
}
