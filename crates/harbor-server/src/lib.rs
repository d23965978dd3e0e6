//! # Harbor Server
//!
//! HTTP server and shutdown orchestration for Harbor services.
//!
//! - HTTP/1.1 via Hyper, one Tokio task per connection
//! - Routing by `(method, template)` with operation names
//! - Built-in `/ping`, `/_version`, `/metrics` and `/debug` endpoints
//! - Graceful shutdown: [`ShutdownSignal`] for OS signals and
//!   [`ShutdownCoordinator`] for bounded, concurrent teardown
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use harbor_server::{Server, ShutdownCoordinator, ShutdownSignal};
//!
//! # async fn run() -> Result<(), harbor_server::ServerError> {
//! let server = Server::builder().http_addr("0.0.0.0:8080").build();
//!
//! let stop = ShutdownSignal::new();
//! let serving = tokio::spawn(server.run(stop.clone()));
//!
//! let mut coordinator = ShutdownCoordinator::new(Duration::from_secs(10));
//! coordinator.register_task("http", move || async move {
//!     stop.trigger();
//!     serving.await??;
//!     anyhow::Ok(())
//! });
//!
//! let os = ShutdownSignal::with_os_signals()?;
//! let report = coordinator.run(os.recv()).await;
//! assert!(report.is_clean());
//! # Ok(())
//! # }
//! ```

#![doc(html_root_url = "https://docs.rs/harbor-server/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod coordinator;
pub mod endpoints;
mod error;
pub mod handler;
pub mod router;
pub mod server;
pub mod shutdown;

pub use config::{ServerConfig, ServerConfigBuilder};
pub use coordinator::{
    CoordinatorState, ShutdownCoordinator, ShutdownReport, TaskOutcome, DEFAULT_SHUTDOWN_DEADLINE,
};
pub use endpoints::{build_version, Endpoints};
pub use error::ServerError;
pub use handler::HandlerRegistry;
pub use router::{PathParams, RouteMatch, Router};
pub use server::{Server, ServerBuilder};
pub use shutdown::{ConnectionTracker, ShutdownSignal};
