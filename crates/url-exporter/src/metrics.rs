//! Prometheus rendering of the aggregation store.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use urlcheck::{StoreSnapshot, TargetSnapshot};

/// Labels for per-target gauges
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct TargetLabels {
    /// Target as configured
    pub url: String,
    /// Scheme plus authority
    pub host: String,
    /// Path plus query
    pub path: String,
    /// Exporter instance
    pub instance: String,
}

/// Labels for per-status counters
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct CheckLabels {
    pub url: String,
    pub host: String,
    pub path: String,
    /// HTTP status code, or `error`
    pub status_code: String,
    pub instance: String,
}

/// One scrape's worth of metric families
struct ScrapeMetrics {
    registry: Registry,
    up: Family<TargetLabels, Gauge>,
    error: Family<TargetLabels, Gauge>,
    response_time_milliseconds: Family<TargetLabels, Gauge>,
    http_status_code: Family<TargetLabels, Gauge>,
    checks: Family<CheckLabels, Counter>,
    status_codes: Family<CheckLabels, Counter>,
}

impl ScrapeMetrics {
    fn new() -> Self {
        let mut registry = Registry::default();

        let up = Family::<TargetLabels, Gauge>::default();
        registry.register("url_up", "Whether the URL is up (1) or down (0)", up.clone());

        let error = Family::<TargetLabels, Gauge>::default();
        registry.register(
            "url_error",
            "Whether the last check failed with an error (1) or not (0)",
            error.clone(),
        );

        let response_time_milliseconds = Family::<TargetLabels, Gauge>::default();
        registry.register(
            "url_response_time_milliseconds",
            "Response time of the last successful check in milliseconds",
            response_time_milliseconds.clone(),
        );

        let http_status_code = Family::<TargetLabels, Gauge>::default();
        registry.register(
            "url_http_status_code",
            "Status code of the last successful check",
            http_status_code.clone(),
        );

        // Counters are suffixed with `_total` on encode
        let checks = Family::<CheckLabels, Counter>::default();
        registry.register("url_check", "Total number of URL checks", checks.clone());

        let status_codes = Family::<CheckLabels, Counter>::default();
        registry.register(
            "url_status_code",
            "Total number of checks by status code",
            status_codes.clone(),
        );

        Self {
            registry,
            up,
            error,
            response_time_milliseconds,
            http_status_code,
            checks,
            status_codes,
        }
    }

    fn record(&self, target: &TargetSnapshot, instance: &str) {
        for (status_code, count) in &target.counters {
            let labels = CheckLabels {
                url: target.url.clone(),
                host: target.host.clone(),
                path: target.path.clone(),
                status_code: status_code.clone(),
                instance: instance.to_string(),
            };
            self.checks.get_or_create(&labels).inc_by(*count);
            self.status_codes.get_or_create(&labels).inc_by(*count);
        }

        // No gauges until the first result arrives
        let Some(last) = &target.last_result else {
            return;
        };

        let labels = TargetLabels {
            url: target.url.clone(),
            host: target.host.clone(),
            path: target.path.clone(),
            instance: instance.to_string(),
        };

        self.up.get_or_create(&labels).set(i64::from(last.is_up()));
        self.error.get_or_create(&labels).set(i64::from(last.is_error()));

        if !last.is_error() {
            self.response_time_milliseconds
                .get_or_create(&labels)
                .set(last.response_time.as_millis() as i64);
            self.http_status_code
                .get_or_create(&labels)
                .set(i64::from(last.status_code));
        }
    }
}

/// Renders store snapshots into the Prometheus text format.
///
/// A fresh registry is built on every scrape, so the output always mirrors
/// the snapshot exactly.
#[derive(Debug, Clone)]
pub struct ScrapeAdapter {
    instance: String,
}

impl ScrapeAdapter {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Encode `snapshot` as Prometheus text
    pub fn render(&self, snapshot: &StoreSnapshot) -> Result<String, std::fmt::Error> {
        let metrics = ScrapeMetrics::new();
        for target in snapshot.iter() {
            metrics.record(target, &self.instance);
        }

        let mut buffer = String::new();
        encode(&mut buffer, &metrics.registry)?;
        Ok(buffer)
    }
}
