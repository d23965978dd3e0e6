//! Configuration schema types.
//!
//! This module defines the structure of all configuration sections.

use std::time::Duration;

use harbor_core::ExpiryConfig;
use serde::{Deserialize, Serialize};

pub use harbor_telemetry::LogFormat;

/// Server configuration section.
///
/// # Example
///
/// ```
/// use harbor_config::ServerConfig;
///
/// let config = ServerConfig {
///     http_addr: "127.0.0.1:3000".to_string(),
///     ..Default::default()
/// };
/// assert_eq!(config.request_timeout().as_millis(), 2000);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// HTTP server bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_http_addr")]
    pub http_addr: String,

    /// Per-request deadline in milliseconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Echo the innermost cause of internal errors to clients.
    #[serde(default)]
    pub expose_internal_errors: bool,
}

impl ServerConfig {
    /// Returns the request deadline.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            request_timeout_ms: default_request_timeout(),
            expose_internal_errors: false,
        }
    }
}

fn default_http_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_request_timeout() -> u64 {
    2000
}

/// Shutdown configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ShutdownConfig {
    /// How long teardown may take in total, in milliseconds.
    #[serde(default = "default_shutdown_deadline")]
    pub deadline_ms: u64,
}

impl ShutdownConfig {
    /// Returns the teardown deadline.
    #[must_use]
    pub const fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            deadline_ms: default_shutdown_deadline(),
        }
    }
}

fn default_shutdown_deadline() -> u64 {
    10_000
}

/// Metrics configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Record request metrics and serve them.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Path of the exposition endpoint.
    #[serde(default = "default_metrics_path")]
    pub path: String,

    /// Paths excluded from request metrics in addition to the built-in
    /// endpoints. A trailing `/*` matches everything below the prefix.
    #[serde(default)]
    pub skip_paths: Vec<String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_metrics_path(),
            skip_paths: Vec::new(),
        }
    }
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Install the log subscriber.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Log level filter (e.g., "info", "harbor=debug,hyper=warn").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Include file and line in each record.
    #[serde(default)]
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_log_level(),
            format: LogFormat::default(),
            include_location: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Tracing configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TracingConfig {
    /// Export spans over OTLP.
    #[serde(default)]
    pub enabled: bool,

    /// OTLP collector endpoint (e.g., `http://localhost:4317`).
    #[serde(default)]
    pub otlp_endpoint: Option<String>,

    /// Fraction of traces sampled, in `[0, 1]`.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: None,
            sample_rate: default_sample_rate(),
        }
    }
}

fn default_sample_rate() -> f64 {
    1.0
}

/// Cache configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Prefix joined to every key with `###`.
    #[serde(default)]
    pub key_prefix: String,

    /// Lifetime of short-lived entries, in seconds.
    #[serde(default = "default_short_ttl")]
    pub short_ttl_secs: u64,

    /// Lifetime of long-lived entries, in seconds.
    #[serde(default = "default_long_ttl")]
    pub long_ttl_secs: u64,
}

impl CacheConfig {
    /// Returns the expiry classes.
    #[must_use]
    pub const fn expiry(&self) -> ExpiryConfig {
        ExpiryConfig {
            short: Duration::from_secs(self.short_ttl_secs),
            long: Duration::from_secs(self.long_ttl_secs),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: String::new(),
            short_ttl_secs: default_short_ttl(),
            long_ttl_secs: default_long_ttl(),
        }
    }
}

fn default_short_ttl() -> u64 {
    60
}

fn default_long_ttl() -> u64 {
    3600
}

/// Service identity section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Service name, used in logs, metric labels and spans.
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Service version. Defaults to the build identifier.
    #[serde(default)]
    pub version: Option<String>,

    /// Deployment environment (e.g., "production").
    #[serde(default = "default_environment")]
    pub environment: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            version: None,
            environment: default_environment(),
        }
    }
}

fn default_service_name() -> String {
    "harbor".to_string()
}

fn default_environment() -> String {
    "production".to_string()
}

fn default_true() -> bool {
    true
}
