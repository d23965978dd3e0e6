//! Prometheus request metrics.
//!
//! [`MetricsRegistry`] owns its own Prometheus recorder instead of installing
//! a global one, so several registries (one per server, or one per test) can
//! live in the same process. Recording goes through
//! [`metrics::with_local_recorder`].
//!
//! # Request Metrics
//!
//! All series carry the labels `service`, `code`, `method`, `url` (route
//! template) and `operation`.
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `http_requests_total` | Counter | Completed requests |
//! | `http_request_duration_seconds` | Gauge (running sum) | Total time spent serving |
//! | `http_request_size_bytes` | Counter | Sum of approximate request sizes |
//! | `http_response_size_bytes` | Counter | Sum of response body sizes |
//! | `http_request_duration_histogram_seconds` | Histogram | Latency distribution |
//! | `http_request_size_histogram_bytes` | Histogram | Request size distribution |
//! | `http_response_size_histogram_bytes` | Histogram | Response size distribution |
//!
//! The duration sum is a gauge because `metrics` counters only take integers.

use std::sync::Arc;
use std::time::Duration;

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Label,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder};

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// Completed requests.
pub const REQUESTS_TOTAL: &str = "http_requests_total";
/// Running sum of request durations.
pub const REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
/// Running sum of request sizes.
pub const REQUEST_SIZE_BYTES: &str = "http_request_size_bytes";
/// Running sum of response sizes.
pub const RESPONSE_SIZE_BYTES: &str = "http_response_size_bytes";
/// Request latency distribution.
pub const REQUEST_DURATION_HISTOGRAM: &str = "http_request_duration_histogram_seconds";
/// Request size distribution.
pub const REQUEST_SIZE_HISTOGRAM: &str = "http_request_size_histogram_bytes";
/// Response size distribution.
pub const RESPONSE_SIZE_HISTOGRAM: &str = "http_response_size_histogram_bytes";

/// Returns `count` buckets starting at `start`, each `factor` times the previous.
///
/// ```
/// use harbor_telemetry::metrics::exponential_buckets;
///
/// assert_eq!(exponential_buckets(50.0, 5.0, 3), vec![50.0, 250.0, 1250.0]);
/// ```
#[must_use]
pub fn exponential_buckets(start: f64, factor: f64, count: usize) -> Vec<f64> {
    std::iter::successors(Some(start), |bucket| Some(bucket * factor))
        .take(count)
        .collect()
}

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether request metrics are recorded and exposed.
    pub enabled: bool,

    /// Path the exposition endpoint is served on.
    pub path: String,

    /// Value of the `service` label.
    pub service_name: String,

    /// Buckets of the latency histogram, in seconds.
    pub duration_buckets: Vec<f64>,

    /// Buckets of the size histograms, in bytes.
    pub size_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/metrics".to_string(),
            service_name: "harbor".to_string(),
            duration_buckets: exponential_buckets(0.05, 1.75, 11),
            size_buckets: exponential_buckets(50.0, 5.0, 8),
        }
    }
}

/// One completed request, as seen by the metrics stage.
#[derive(Debug, Clone, Copy)]
pub struct RequestObservation<'a> {
    /// Response status code.
    pub status: u16,
    /// Request method.
    pub method: &'a str,
    /// Matched route template, or the raw path when nothing matched.
    pub url: &'a str,
    /// Operation name.
    pub operation: &'a str,
    /// Time spent serving the request.
    pub duration: Duration,
    /// Approximate request size in bytes.
    pub request_size: u64,
    /// Response body size in bytes.
    pub response_size: u64,
}

/// A Prometheus registry for the request metric family.
///
/// Cloning is cheap; clones record into the same registry.
#[derive(Clone)]
pub struct MetricsRegistry {
    recorder: Arc<PrometheusRecorder>,
    handle: PrometheusHandle,
    service_name: Arc<str>,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("service_name", &self.service_name)
            .finish_non_exhaustive()
    }
}

impl MetricsRegistry {
    /// Builds a registry with the configured histogram buckets.
    ///
    /// # Errors
    ///
    /// Returns `TelemetryError::MetricsInit` if a bucket list is empty.
    pub fn new(config: &MetricsConfig) -> TelemetryResult<Self> {
        let init = |e: metrics_exporter_prometheus::BuildError| {
            TelemetryError::MetricsInit(e.to_string())
        };

        let recorder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Full(REQUEST_DURATION_HISTOGRAM.to_string()),
                &config.duration_buckets,
            )
            .map_err(init)?
            .set_buckets_for_metric(
                Matcher::Full(REQUEST_SIZE_HISTOGRAM.to_string()),
                &config.size_buckets,
            )
            .map_err(init)?
            .set_buckets_for_metric(
                Matcher::Full(RESPONSE_SIZE_HISTOGRAM.to_string()),
                &config.size_buckets,
            )
            .map_err(init)?
            .build_recorder();

        let registry = Self {
            handle: recorder.handle(),
            recorder: Arc::new(recorder),
            service_name: Arc::from(config.service_name.as_str()),
        };
        registry.describe();
        Ok(registry)
    }

    fn describe(&self) {
        metrics::with_local_recorder(self.recorder.as_ref(), || {
            describe_counter!(REQUESTS_TOTAL, "How many HTTP requests processed");
            describe_gauge!(REQUEST_DURATION_SECONDS, "Total time spent serving HTTP requests");
            describe_counter!(REQUEST_SIZE_BYTES, "Total size of HTTP requests");
            describe_counter!(RESPONSE_SIZE_BYTES, "Total size of HTTP responses");
            describe_histogram!(
                REQUEST_DURATION_HISTOGRAM,
                "The HTTP request latencies in seconds"
            );
            describe_histogram!(REQUEST_SIZE_HISTOGRAM, "The HTTP request sizes in bytes");
            describe_histogram!(RESPONSE_SIZE_HISTOGRAM, "The HTTP response sizes in bytes");
        });
    }

    /// Returns the value of the `service` label.
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Records one completed request.
    pub fn record_request(&self, observation: &RequestObservation<'_>) {
        let labels = vec![
            Label::new("service", self.service_name.to_string()),
            Label::new("code", observation.status.to_string()),
            Label::new("method", observation.method.to_string()),
            Label::new("url", observation.url.to_string()),
            Label::new("operation", observation.operation.to_string()),
        ];
        let seconds = observation.duration.as_secs_f64();

        metrics::with_local_recorder(self.recorder.as_ref(), || {
            counter!(REQUESTS_TOTAL, labels.clone()).increment(1);
            gauge!(REQUEST_DURATION_SECONDS, labels.clone()).increment(seconds);
            counter!(REQUEST_SIZE_BYTES, labels.clone()).increment(observation.request_size);
            counter!(RESPONSE_SIZE_BYTES, labels.clone()).increment(observation.response_size);
            histogram!(REQUEST_DURATION_HISTOGRAM, labels.clone()).record(seconds);
            histogram!(REQUEST_SIZE_HISTOGRAM, labels.clone())
                .record(observation.request_size as f64);
            histogram!(RESPONSE_SIZE_HISTOGRAM, labels).record(observation.response_size as f64);
        });
    }

    /// Renders all metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle.render()
    }
}
