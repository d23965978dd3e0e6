//! # Harbor Core
//!
//! Core types and traits for the Harbor service scaffold.
//!
//! - [`ServiceError`] / [`ErrorKind`] - The error taxonomy
//! - [`Classifier`] / [`ClassifiedError`] - Mapping arbitrary errors onto the taxonomy
//! - [`RequestContext`] - Per-request id, cancellation token, operation name and metadata
//! - [`Store`] / [`MemoryStore`] - Key/value store interface and in-memory implementation
//! - [`Close`] - Resources released by the shutdown coordinator
//! - [`events`] - System events published from handlers

#![doc(html_root_url = "https://docs.rs/harbor-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod classify;
mod context;
mod error;
pub mod events;
mod resource;
pub mod store;

pub use classify::{classify, ClassifiedError, Classifier};
pub use context::{millis, RequestContext, RequestId, RequestMeta, UNKNOWN_OPERATION};
pub use error::{is_not_found, Cancellation, ErrorKind, ServiceError, ServiceResult};
pub use events::{EventBody, EventBus, Publishers, SystemEvent, Topic};
pub use resource::Close;
pub use store::{ExpiryConfig, MemoryStore, Store, TtlClass};
