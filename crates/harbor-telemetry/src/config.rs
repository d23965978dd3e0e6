//! Telemetry configuration.

use crate::logging::LogConfig;
use crate::metrics::MetricsConfig;
use crate::tracing::TracingConfig;

const DEFAULT_SERVICE_NAME: &str = "harbor";
const DEFAULT_ENVIRONMENT: &str = "development";

/// Settings for logging, metrics and span export, plus the service identity
/// they all report.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name reported in logs, metric labels and spans.
    pub service_name: String,

    /// Service version.
    pub service_version: String,

    /// Deployment environment.
    pub environment: String,

    /// Prometheus registry settings.
    pub metrics: MetricsConfig,

    /// Tracer provider settings.
    pub tracing: TracingConfig,

    /// Log subscriber settings.
    pub logging: LogConfig,
}

impl TelemetryConfig {
    /// Starts from the defaults.
    #[must_use]
    pub fn builder() -> TelemetryConfigBuilder {
        TelemetryConfigBuilder::new()
    }

    /// Copies the service identity into every subsystem.
    fn with_identity(mut self) -> Self {
        self.metrics.service_name.clone_from(&self.service_name);
        self.logging.service_name.clone_from(&self.service_name);
        self.tracing.service_name.clone_from(&self.service_name);
        self.tracing.service_version.clone_from(&self.service_version);
        self.tracing.environment.clone_from(&self.environment);
        self
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: DEFAULT_ENVIRONMENT.to_string(),
            metrics: MetricsConfig::default(),
            tracing: TracingConfig::default(),
            logging: LogConfig::default(),
        }
        .with_identity()
    }
}

/// Builder for [`TelemetryConfig`].
///
/// Subsystem configs may be set in any order relative to the identity;
/// [`build`](Self::build) overwrites their identity fields.
#[derive(Debug, Default)]
pub struct TelemetryConfigBuilder {
    config: TelemetryConfig,
}

impl TelemetryConfigBuilder {
    /// Creates a builder holding the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the service name.
    #[must_use]
    pub fn service_name(mut self, name: &str) -> Self {
        self.config.service_name = name.to_string();
        self
    }

    /// Sets the service version.
    #[must_use]
    pub fn service_version(mut self, version: &str) -> Self {
        self.config.service_version = version.to_string();
        self
    }

    /// Sets the deployment environment.
    #[must_use]
    pub fn environment(mut self, environment: &str) -> Self {
        self.config.environment = environment.to_string();
        self
    }

    /// Replaces the metrics settings.
    #[must_use]
    pub fn metrics(mut self, metrics: MetricsConfig) -> Self {
        self.config.metrics = metrics;
        self
    }

    /// Replaces the tracer provider settings.
    #[must_use]
    pub fn tracing(mut self, tracing: TracingConfig) -> Self {
        self.config.tracing = tracing;
        self
    }

    /// Replaces the log subscriber settings.
    #[must_use]
    pub fn logging(mut self, logging: LogConfig) -> Self {
        self.config.logging = logging;
        self
    }

    /// Turns span export on, sending to `endpoint`.
    #[must_use]
    pub fn otlp_endpoint(mut self, endpoint: &str) -> Self {
        self.config.tracing.enabled = true;
        self.config.tracing.otlp_endpoint = endpoint.to_string();
        self
    }

    /// Finishes the configuration.
    #[must_use]
    pub fn build(self) -> TelemetryConfig {
        self.config.with_identity()
    }
}
