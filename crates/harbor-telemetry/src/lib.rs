//! Observability for Harbor services.
//!
//! - **Logging**: structured JSON or pretty output via `tracing-subscriber`
//! - **Metrics**: the Prometheus request metric family via `metrics`
//! - **Tracing**: an OTLP span exporter via OpenTelemetry
//!
//! # Architecture
//!
//! ```text
//!   main ──► Telemetry::init(config) ──► Telemetry
//!                                          │
//!             ┌────────────────────────────┼─────────────────────────┐
//!             ▼                            ▼                         ▼
//!      global log subscriber      MetricsRegistry (owned)   TracerProvider (owned)
//!             │                            │                         │
//!          stdout                   GET /metrics             OTLP collector
//! ```
//!
//! Only the log subscriber is process-global. The metrics registry and the
//! tracer provider are owned by [`Telemetry`], handed to the server
//! explicitly and released by [`Telemetry::close`] during shutdown.
//!
//! # Example
//!
//! ```rust,ignore
//! use harbor_telemetry::{Telemetry, TelemetryConfig};
//!
//! let telemetry = Telemetry::init(
//!     TelemetryConfig::builder()
//!         .service_name("articles")
//!         .otlp_endpoint("http://localhost:4317")
//!         .build(),
//! )?;
//!
//! let registry = telemetry.metrics().cloned();
//! // ... serve ...
//! telemetry.close().await?;
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod tracing;

use harbor_core::Close;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::TracerProvider;
use parking_lot::Mutex;

pub use config::{TelemetryConfig, TelemetryConfigBuilder};
pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig, LogFormat};
pub use crate::metrics::{MetricsConfig, MetricsRegistry, RequestObservation};
pub use crate::tracing::{init_tracing, TracingConfig};
pub use opentelemetry_sdk::trace::Tracer;

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// The process's telemetry providers.
///
/// Created once at startup and torn down by the shutdown coordinator through
/// its [`Close`] implementation.
pub struct Telemetry {
    config: TelemetryConfig,
    metrics: Option<MetricsRegistry>,
    tracer_provider: Mutex<Option<TracerProvider>>,
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry")
            .field("config", &self.config)
            .field("metrics", &self.metrics)
            .field("tracing", &self.tracer_provider.lock().is_some())
            .finish()
    }
}

impl Telemetry {
    /// Initializes logging, the metrics registry and the tracer provider.
    ///
    /// # Errors
    ///
    /// Returns `TelemetryError` if any subsystem fails to initialize.
    pub fn init(config: TelemetryConfig) -> TelemetryResult<Self> {
        init_logging(&config.logging)?;
        Self::without_logging(config)
    }

    /// Like [`Telemetry::init`] but leaves the global log subscriber alone.
    ///
    /// # Errors
    ///
    /// Returns `TelemetryError` if the metrics registry or tracer provider
    /// cannot be built.
    pub fn without_logging(config: TelemetryConfig) -> TelemetryResult<Self> {
        let metrics = if config.metrics.enabled {
            Some(MetricsRegistry::new(&config.metrics)?)
        } else {
            None
        };
        let tracer_provider = init_tracing(&config.tracing)?;

        ::tracing::info!(
            service = %config.service_name,
            version = %config.service_version,
            metrics = metrics.is_some(),
            tracing = tracer_provider.is_some(),
            "telemetry initialized"
        );

        Ok(Self {
            config,
            metrics,
            tracer_provider: Mutex::new(tracer_provider),
        })
    }

    /// Returns the configuration telemetry was built from.
    #[must_use]
    pub const fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    /// Returns the metrics registry, if metrics are enabled.
    #[must_use]
    pub const fn metrics(&self) -> Option<&MetricsRegistry> {
        self.metrics.as_ref()
    }

    /// Returns a tracer from the owned provider, if tracing is enabled and
    /// the provider has not been closed.
    #[must_use]
    pub fn tracer(&self, name: &'static str) -> Option<Tracer> {
        self.tracer_provider
            .lock()
            .as_ref()
            .map(|provider| provider.tracer(name))
    }
}

impl Close for Telemetry {
    async fn close(&self) -> anyhow::Result<()> {
        let provider = self.tracer_provider.lock().take();
        if let Some(provider) = provider {
            crate::tracing::shutdown_provider(provider).await?;
            ::tracing::debug!("tracer provider shut down");
        }
        Ok(())
    }
}
