//! Main configuration types.
//!
//! This module provides the top-level [`HarborConfig`] struct and its builder.

use serde::{Deserialize, Serialize};

use crate::{
    CacheConfig, ConfigError, LogFormat, LoggingConfig, MetricsConfig, ServerConfig, ServiceConfig,
    ShutdownConfig, TracingConfig,
};

/// Complete Harbor service configuration.
///
/// This is the root configuration type that contains all configuration sections.
/// Use [`ConfigLoader`](crate::ConfigLoader) to load configuration from files
/// and environment variables.
///
/// # Example
///
/// ```
/// use harbor_config::HarborConfig;
///
/// let config = HarborConfig::default();
/// assert_eq!(config.server.http_addr, "0.0.0.0:8080");
/// assert!(!config.debug);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct HarborConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Graceful shutdown configuration.
    #[serde(default)]
    pub shutdown: ShutdownConfig,

    /// Request metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Span export configuration.
    #[serde(default)]
    pub tracing: TracingConfig,

    /// Cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Service identity.
    #[serde(default)]
    pub service: ServiceConfig,

    /// Serve the `/debug` endpoints.
    #[serde(default)]
    pub debug: bool,
}

impl HarborConfig {
    /// Create a new configuration builder.
    ///
    /// # Example
    ///
    /// ```
    /// use harbor_config::{HarborConfig, ServerConfig};
    ///
    /// let config = HarborConfig::builder()
    ///     .server(ServerConfig {
    ///         http_addr: "127.0.0.1:3000".to_string(),
    ///         ..Default::default()
    ///     })
    ///     .debug(true)
    ///     .build();
    ///
    /// assert_eq!(config.server.http_addr, "127.0.0.1:3000");
    /// assert!(config.debug);
    /// ```
    #[must_use]
    pub fn builder() -> HarborConfigBuilder {
        HarborConfigBuilder::new()
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if:
    /// - The server address is not a socket address
    /// - The request timeout or shutdown deadline is zero
    /// - The metrics path does not start with `/`
    /// - The sample rate is not in `0.0..=1.0`
    /// - Tracing is enabled without an OTLP endpoint
    /// - A cache TTL is zero
    /// - The service name is empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.http_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::invalid_value(
                "server.http_addr",
                format!("invalid socket address: {}", self.server.http_addr),
            ));
        }

        if self.server.request_timeout_ms == 0 {
            return Err(ConfigError::invalid_value(
                "server.request_timeout_ms",
                "must be greater than zero",
            ));
        }

        if self.shutdown.deadline_ms == 0 {
            return Err(ConfigError::invalid_value(
                "shutdown.deadline_ms",
                "must be greater than zero",
            ));
        }

        if !self.metrics.path.starts_with('/') {
            return Err(ConfigError::invalid_value(
                "metrics.path",
                format!("must start with '/': {}", self.metrics.path),
            ));
        }

        if !(0.0..=1.0).contains(&self.tracing.sample_rate) {
            return Err(ConfigError::invalid_value(
                "tracing.sample_rate",
                "must be between 0.0 and 1.0",
            ));
        }

        if self.tracing.enabled && self.tracing.otlp_endpoint.is_none() {
            return Err(ConfigError::invalid_value(
                "tracing.otlp_endpoint",
                "required when tracing is enabled",
            ));
        }

        if self.cache.short_ttl_secs == 0 || self.cache.long_ttl_secs == 0 {
            return Err(ConfigError::invalid_value(
                "cache",
                "TTLs must be greater than zero",
            ));
        }

        if self.service.name.trim().is_empty() {
            return Err(ConfigError::invalid_value("service.name", "must not be empty"));
        }

        Ok(())
    }

    /// Create a development configuration preset.
    ///
    /// - Pretty debug-level logs with source locations
    /// - `/debug` endpoints enabled
    /// - Internal error causes echoed to clients
    ///
    /// # Example
    ///
    /// ```
    /// use harbor_config::{HarborConfig, LogFormat};
    ///
    /// let config = HarborConfig::development();
    /// assert_eq!(config.logging.format, LogFormat::Pretty);
    /// assert!(config.debug);
    /// ```
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();

        config.logging.level = "debug".to_string();
        config.logging.format = LogFormat::Pretty;
        config.logging.include_location = true;

        config.service.environment = "development".to_string();
        config.server.expose_internal_errors = true;
        config.debug = true;

        config
    }

    /// Create a production configuration preset.
    ///
    /// - JSON info-level logs
    /// - `/debug` endpoints disabled
    /// - Internal errors hardened to a generic message
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();

        config.logging.level = "info".to_string();
        config.logging.format = LogFormat::Json;

        config.service.environment = "production".to_string();
        config.server.expose_internal_errors = false;
        config.debug = false;

        config
    }

    /// Builds the telemetry configuration for this service.
    ///
    /// `build_version` is used when no service version is configured.
    #[must_use]
    pub fn telemetry(&self, build_version: &str) -> harbor_telemetry::TelemetryConfig {
        let version = self.service.version.as_deref().unwrap_or(build_version);

        let mut builder = harbor_telemetry::TelemetryConfig::builder()
            .service_name(&self.service.name)
            .service_version(version)
            .environment(&self.service.environment)
            .metrics(harbor_telemetry::MetricsConfig {
                enabled: self.metrics.enabled,
                path: self.metrics.path.clone(),
                ..Default::default()
            })
            .logging(harbor_telemetry::LogConfig {
                enabled: self.logging.enabled,
                level: self.logging.level.clone(),
                format: self.logging.format,
                include_location: self.logging.include_location,
                ..Default::default()
            })
            .tracing(harbor_telemetry::TracingConfig {
                enabled: false,
                sample_ratio: self.tracing.sample_rate,
                ..Default::default()
            });

        if let (true, Some(endpoint)) = (self.tracing.enabled, &self.tracing.otlp_endpoint) {
            builder = builder.otlp_endpoint(endpoint);
        }

        builder.build()
    }
}

/// Builder for [`HarborConfig`].
#[derive(Debug, Default)]
pub struct HarborConfigBuilder {
    config: HarborConfig,
}

impl HarborConfigBuilder {
    /// Create a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the server configuration.
    #[must_use]
    pub fn server(mut self, server: ServerConfig) -> Self {
        self.config.server = server;
        self
    }

    /// Set the shutdown configuration.
    #[must_use]
    pub fn shutdown(mut self, shutdown: ShutdownConfig) -> Self {
        self.config.shutdown = shutdown;
        self
    }

    /// Set the metrics configuration.
    #[must_use]
    pub fn metrics(mut self, metrics: MetricsConfig) -> Self {
        self.config.metrics = metrics;
        self
    }

    /// Set the logging configuration.
    #[must_use]
    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.config.logging = logging;
        self
    }

    /// Set the tracing configuration.
    #[must_use]
    pub fn tracing(mut self, tracing: TracingConfig) -> Self {
        self.config.tracing = tracing;
        self
    }

    /// Set the cache configuration.
    #[must_use]
    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.config.cache = cache;
        self
    }

    /// Set the service identity.
    #[must_use]
    pub fn service(mut self, service: ServiceConfig) -> Self {
        self.config.service = service;
        self
    }

    /// Enable or disable the `/debug` endpoints.
    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> HarborConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_validates() {
        assert!(HarborConfig::default().validate().is_ok());
        assert!(HarborConfig::development().validate().is_ok());
        assert!(HarborConfig::production().validate().is_ok());
    }

    #[test]
    fn test_validate_bad_address() {
        let mut config = HarborConfig::default();
        config.server.http_addr = "not-an-address".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("server.http_addr"));
    }

    #[test]
    fn test_validate_zero_timeouts() {
        let mut config = HarborConfig::default();
        config.server.request_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = HarborConfig::default();
        config.shutdown.deadline_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_sample_rate() {
        let mut config = HarborConfig::default();
        config.tracing.sample_rate = 1.5;
        assert!(config.validate().is_err());

        config.tracing.sample_rate = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_tracing_requires_endpoint() {
        let mut config = HarborConfig::default();
        config.tracing.enabled = true;
        assert!(config.validate().is_err());

        config.tracing.otlp_endpoint = Some("http://localhost:4317".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_metrics_path() {
        let mut config = HarborConfig::default();
        config.metrics.path = "metrics".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_telemetry_config() {
        let mut config = HarborConfig::development();
        config.service.name = "articles".to_string();
        config.tracing.enabled = true;
        config.tracing.otlp_endpoint = Some("http://collector:4317".to_string());

        let telemetry = config.telemetry("abc123");
        assert_eq!(telemetry.service_name, "articles");
        assert_eq!(telemetry.service_version, "abc123");
        assert_eq!(telemetry.metrics.service_name, "articles");
        assert_eq!(telemetry.logging.format, LogFormat::Pretty);
        assert!(telemetry.tracing.enabled);
        assert_eq!(telemetry.tracing.otlp_endpoint, "http://collector:4317");
    }

    #[test]
    fn test_telemetry_prefers_configured_version() {
        let mut config = HarborConfig::default();
        config.service.version = Some("2.1.0".to_string());
        assert_eq!(config.telemetry("abc123").service_version, "2.1.0");
    }
}
