//! # Harbor
//!
//! **Service scaffold with error classification and graceful shutdown**
//!
//! Harbor gives an HTTP service the parts every service needs:
//!
//! - **Error Classification** – handler errors become a status code, a public
//!   message and at most one log line
//! - **Request Deadlines** – every request carries a cancellation token bound
//!   to the configured timeout
//! - **Request Metrics** – Prometheus histograms per operation, with a skip list
//! - **Graceful Shutdown** – teardown tasks run concurrently under one deadline
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use harbor::prelude::*;
//! use http::{Method, StatusCode};
//!
//! async fn hello(_ctx: RequestContext, _request: Request) -> Outcome {
//!     Ok(Response::text(StatusCode::OK, "hello"))
//! }
//!
//! # async fn start() -> anyhow::Result<()> {
//! let server = Server::builder()
//!     .http_addr("0.0.0.0:8080")
//!     .route(Method::GET, "/hello", "hello", hello)
//!     .build();
//!
//! let signal = ShutdownSignal::with_os_signals()?;
//! server.run(signal).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! Every request runs through a fixed pipeline. The tracing and metrics
//! stages are present when telemetry provides a tracer or a registry:
//!
//! ```text
//! Request → Tracing → Timeout → Metrics → ErrorClassification → Handler
//!                                                                  ↓
//! Response ←────────────────────────────────────────────────────────┘
//! ```
//!
//! On SIGTERM or SIGINT the [`ShutdownCoordinator`](server::ShutdownCoordinator)
//! stops the listener, drains connections and closes every registered
//! resource, reporting each task's outcome.

#![doc(html_root_url = "https://docs.rs/harbor/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod app;
pub mod articles;

// Re-export core types
pub use harbor_core as core;

// Re-export server types
pub use harbor_server as server;

// Re-export middleware types
pub use harbor_middleware as middleware;

// Re-export telemetry types
pub use harbor_telemetry as telemetry;

// Re-export configuration types
pub use harbor_config as config;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use harbor::prelude::*;
///
/// let err = constraint!("invalid int: {}", "a");
/// assert_eq!(err.kind(), ErrorKind::Constraint);
/// ```
pub mod prelude {
    pub use harbor_core::{
        classify, constraint, is_not_found, Classifier, Close, ErrorKind, EventBody, EventBus,
        MemoryStore, RequestContext, ServiceError, ServiceResult, Store, Topic, TtlClass,
    };

    pub use harbor_middleware::{Outcome, Pipeline, Request, Response, ResponseExt};

    pub use harbor_server::{
        PathParams, Server, ShutdownCoordinator, ShutdownReport, ShutdownSignal, TaskOutcome,
    };

    pub use harbor_telemetry::{MetricsRegistry, Telemetry};

    pub use harbor_config::{ConfigLoader, HarborConfig};
}
