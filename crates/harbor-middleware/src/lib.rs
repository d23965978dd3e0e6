//! # Harbor Middleware
//!
//! The fixed-order request pipeline of a Harbor service.
//!
//! ## Pipeline Stages
//!
//! ```text
//! Request → Tracing → Timeout → Metrics → ErrorClassification → Handler
//!                                                                  ↓
//! Response ← Tracing ← Timeout ← Metrics ← ErrorClassification ←──┘
//! ```
//!
//! | Stage | Middleware           | Purpose                                       |
//! |-------|----------------------|-----------------------------------------------|
//! | 1     | Tracing              | Record an OpenTelemetry server span           |
//! | 2     | Timeout              | Cancel the request token at the deadline      |
//! | 3     | Metrics              | Record the request metric family on success   |
//! | 4     | Error Classification | Classify, log once, shape the error response  |
//!
//! Handlers return `Result<Response, anyhow::Error>`. Errors travel up the
//! chain untouched until the classification stage turns them into a JSON
//! response, so each failed request gets exactly one error log line and is
//! never counted by the metrics stage. Every request, failed or not, gets one
//! `request info` access log line.
//!
//! ## Example
//!
//! ```
//! use harbor_middleware::pipeline::{Pipeline, Stage};
//!
//! let stages = Stage::all();
//! assert_eq!(stages.len(), 4);
//! assert_eq!(stages[0].name(), "tracing");
//! assert_eq!(stages[3].name(), "error_classification");
//! ```

#![doc(html_root_url = "https://docs.rs/harbor-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod context;
pub mod middleware;
pub mod pipeline;
pub mod stages;
pub mod types;

// Re-export main types at crate root
pub use context::MiddlewareContext;
pub use middleware::{BoxFuture, HandlerFn, Middleware, Next};
pub use pipeline::{Pipeline, PipelineBuilder, Stage};
pub use types::{Outcome, Request, Response, ResponseExt};
