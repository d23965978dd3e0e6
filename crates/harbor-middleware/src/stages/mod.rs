//! Core middleware stages.
//!
//! 1. [`tracing`] - One OpenTelemetry server span per request
//! 2. [`timeout`] - Request deadline on the cancellation token
//! 3. [`metrics`] - Request metric family
//! 4. [`classify`] - Error classification, logging and response shaping

pub mod classify;
pub mod metrics;
pub mod timeout;
pub mod tracing;

pub use classify::ErrorClassificationMiddleware;
pub use metrics::{MetricsMiddleware, PathSkipper, SkipPredicate};
pub use timeout::TimeoutMiddleware;
pub use self::tracing::TracingMiddleware;
