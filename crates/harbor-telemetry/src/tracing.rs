//! OpenTelemetry tracer provider.
//!
//! The provider is returned to the caller and owned by [`crate::Telemetry`];
//! nothing is installed globally. Spans are exported over OTLP/gRPC in
//! batches.
//!
//! # Example
//!
//! ```rust,ignore
//! use harbor_telemetry::tracing::{init_tracing, TracingConfig};
//!
//! let provider = init_tracing(&TracingConfig::default())?;
//! ```

use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, TracerProvider};
use opentelemetry_sdk::Resource;

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// Tracing configuration.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Whether spans are exported.
    pub enabled: bool,

    /// OTLP endpoint (e.g. `http://localhost:4317`).
    pub otlp_endpoint: String,

    /// Service name resource attribute.
    pub service_name: String,

    /// Service version resource attribute.
    pub service_version: String,

    /// Deployment environment resource attribute.
    pub environment: String,

    /// Sampling ratio in `[0, 1]`.
    pub sample_ratio: f64,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: "http://localhost:4317".to_string(),
            service_name: "harbor".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
            sample_ratio: 1.0,
        }
    }
}

impl TracingConfig {
    /// Checks the sampling ratio.
    ///
    /// # Errors
    ///
    /// Returns `TelemetryError::InvalidConfig` if the ratio is outside `[0, 1]`.
    pub fn validate(&self) -> TelemetryResult<()> {
        if !(0.0..=1.0).contains(&self.sample_ratio) {
            return Err(TelemetryError::InvalidConfig(format!(
                "sample ratio {} outside [0, 1]",
                self.sample_ratio
            )));
        }
        Ok(())
    }

    fn sampler(&self) -> Sampler {
        if self.sample_ratio >= 1.0 {
            Sampler::AlwaysOn
        } else if self.sample_ratio <= 0.0 {
            Sampler::AlwaysOff
        } else {
            Sampler::TraceIdRatioBased(self.sample_ratio)
        }
    }
}

/// Builds the tracer provider, or returns `None` when tracing is disabled.
///
/// Must be called from within a Tokio runtime; the batch exporter runs on it.
///
/// # Errors
///
/// Returns `TelemetryError::InvalidConfig` for a bad sampling ratio and
/// `TelemetryError::TracingInit` if the exporter cannot be built.
pub fn init_tracing(config: &TracingConfig) -> TelemetryResult<Option<TracerProvider>> {
    if !config.enabled {
        return Ok(None);
    }
    config.validate()?;

    let resource = Resource::new([
        KeyValue::new(
            opentelemetry_semantic_conventions::attribute::SERVICE_NAME,
            config.service_name.clone(),
        ),
        KeyValue::new(
            opentelemetry_semantic_conventions::attribute::SERVICE_VERSION,
            config.service_version.clone(),
        ),
        KeyValue::new("deployment.environment", config.environment.clone()),
    ]);

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otlp_endpoint)
        .build()
        .map_err(|e| TelemetryError::TracingInit(e.to_string()))?;

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_sampler(config.sampler())
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource)
        .build();

    ::tracing::info!(
        endpoint = %config.otlp_endpoint,
        ratio = config.sample_ratio,
        "span export enabled"
    );
    Ok(Some(provider))
}

/// Flushes and shuts a provider down.
///
/// The SDK blocks while draining the batch processor, so this runs on the
/// blocking pool.
///
/// # Errors
///
/// Returns `TelemetryError::Shutdown` if flushing or shutting down fails.
pub async fn shutdown_provider(provider: TracerProvider) -> TelemetryResult<()> {
    tokio::task::spawn_blocking(move || {
        for result in provider.force_flush() {
            result.map_err(|e| TelemetryError::Shutdown(format!("flush failed: {e}")))?;
        }
        provider
            .shutdown()
            .map_err(|e| TelemetryError::Shutdown(e.to_string()))
    })
    .await
    .map_err(|e| TelemetryError::Shutdown(format!("shutdown task failed: {e}")))?
}
