//! Telemetry error types.

use thiserror::Error;

/// Errors that can occur while setting up or tearing down telemetry.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to build the metrics registry.
    #[error("failed to initialize metrics: {0}")]
    MetricsInit(String),

    /// Failed to build the tracer provider.
    #[error("failed to initialize tracing: {0}")]
    TracingInit(String),

    /// Failed to install the log subscriber.
    #[error("failed to initialize logging: {0}")]
    LoggingInit(String),

    /// Invalid configuration.
    #[error("invalid telemetry configuration: {0}")]
    InvalidConfig(String),

    /// A provider failed to flush or shut down.
    #[error("failed to shut down telemetry: {0}")]
    Shutdown(String),
}
