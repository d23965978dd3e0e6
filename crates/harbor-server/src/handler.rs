//! Handler registration and dispatch.
//!
//! Handlers are registered against an operation name, the same name the
//! router assigns to a `(method, template)` pair. A handler receives the
//! [`RequestContext`] (request id, cancellation token, operation) and the
//! buffered request, and returns `anyhow::Result<Response>`. Errors are not
//! turned into responses here; they travel up the middleware chain to the
//! classification stage.
//!
//! Path parameters of the matched route are available from the request
//! extensions as [`PathParams`](crate::PathParams).
//!
//! # Example
//!
//! ```rust
//! use harbor_core::{RequestContext, ServiceError};
//! use harbor_middleware::{Request, Response, ResponseExt};
//! use harbor_server::{HandlerRegistry, PathParams};
//! use http::StatusCode;
//!
//! async fn get_article(_ctx: RequestContext, request: Request) -> anyhow::Result<Response> {
//!     let params = request.extensions().get::<PathParams>().cloned().unwrap_or_default();
//!     match params.get("id") {
//!         Some("1") => Ok(Response::text(StatusCode::OK, "hello")),
//!         _ => Err(ServiceError::not_found().into()),
//!     }
//! }
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register("getArticle", get_article).unwrap();
//! assert!(registry.contains("getArticle"));
//! assert!(registry.register("getArticle", get_article).is_err());
//! ```

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use harbor_core::{RequestContext, ServiceError};
use harbor_middleware::{Outcome, Request};
use http::StatusCode;

use crate::error::ServerError;

/// A type-erased handler function.
pub type ErasedHandler =
    Arc<dyn Fn(RequestContext, Request) -> BoxFuture<'static, Outcome> + Send + Sync>;

/// Registry for operation handlers.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, ErasedHandler>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut operations = self.operations();
        operations.sort_unstable();
        f.debug_struct("HandlerRegistry")
            .field("operations", &operations)
            .finish()
    }
}

impl HandlerRegistry {
    /// Creates a new empty handler registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for an operation.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::DuplicateOperation`] if the operation already
    /// has a handler. The existing handler stays registered.
    pub fn register<F, Fut>(
        &mut self,
        operation: impl Into<String>,
        handler: F,
    ) -> Result<(), ServerError>
    where
        F: Fn(RequestContext, Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        match self.handlers.entry(operation.into()) {
            Entry::Occupied(entry) => Err(ServerError::duplicate_operation(entry.key())),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(move |ctx, request| handler(ctx, request).boxed()));
                Ok(())
            }
        }
    }

    /// Checks if a handler is registered for an operation.
    #[must_use]
    pub fn contains(&self, operation: &str) -> bool {
        self.handlers.contains_key(operation)
    }

    /// Returns the handler of an operation.
    #[must_use]
    pub fn get(&self, operation: &str) -> Option<ErasedHandler> {
        self.handlers.get(operation).cloned()
    }

    /// Returns the number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns `true` if no handlers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Returns the registered operation names.
    #[must_use]
    pub fn operations(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    /// Invokes the handler of `operation`.
    ///
    /// A routed operation without a handler fails with a 501 status error.
    pub fn invoke(
        &self,
        operation: &str,
        ctx: RequestContext,
        request: Request,
    ) -> BoxFuture<'static, Outcome> {
        match self.handlers.get(operation) {
            Some(handler) => handler(ctx, request),
            None => {
                let err = ServiceError::status(
                    StatusCode::NOT_IMPLEMENTED,
                    format!("no handler registered for operation: {operation}"),
                );
                async move { Err(err.into()) }.boxed()
            }
        }
    }
}
