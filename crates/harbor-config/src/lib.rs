//! Typed configuration for Harbor services.
//!
//! - TOML and JSON configuration files
//! - Environment variable overrides, with `.env` support
//! - Strict parsing (fails on unknown fields)
//! - Layered configuration (defaults → file → env), validated last
//!
//! # Overview
//!
//! [`HarborConfig`] holds every section:
//!
//! - [`ServerConfig`] - bind address, request deadline, error exposure
//! - [`ShutdownConfig`] - teardown deadline
//! - [`MetricsConfig`] - request metrics and extra skip paths
//! - [`LoggingConfig`] / [`TracingConfig`] - observability
//! - [`CacheConfig`] - key prefix and TTL classes
//! - [`ServiceConfig`] - name, version, environment
//!
//! # Example
//!
//! ```no_run
//! use harbor_config::ConfigLoader;
//!
//! # fn main() -> Result<(), harbor_config::ConfigError> {
//! let config = ConfigLoader::new()
//!     .with_optional_file("harbor.toml")?
//!     .with_dotenv()?
//!     .with_env_prefix("HARBOR")
//!     .load()?;
//!
//! println!("listening on {}", config.server.http_addr);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File Format
//!
//! ```toml
//! debug = false
//!
//! [server]
//! http_addr = "0.0.0.0:8080"
//! request_timeout_ms = 2000
//!
//! [shutdown]
//! deadline_ms = 10000
//!
//! [metrics]
//! enabled = true
//! path = "/metrics"
//! skip_paths = ["/internal/*"]
//!
//! [logging]
//! level = "info"
//! format = "json"
//!
//! [tracing]
//! enabled = true
//! otlp_endpoint = "http://localhost:4317"
//! sample_rate = 1.0
//!
//! [cache]
//! key_prefix = "articles"
//! short_ttl_secs = 60
//! long_ttl_secs = 3600
//!
//! [service]
//! name = "articles"
//! ```
//!
//! # Environment Variable Overrides
//!
//! Values can be overridden with `PREFIX_SECTION__KEY` variables:
//!
//! - `HARBOR_SERVER__HTTP_ADDR=0.0.0.0:9000`
//! - `HARBOR_SHUTDOWN__DEADLINE_MS=5000`
//! - `HARBOR_METRICS__SKIP_PATHS=/internal/*,/status`
//! - `HARBOR_DEBUG=true`

#![warn(missing_docs)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::*;
pub use error::ConfigError;
pub use loader::{ConfigLoader, DEFAULT_ENV_PREFIX};
pub use schema::*;
