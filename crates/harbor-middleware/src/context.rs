//! Middleware context types.
//!
//! The [`MiddlewareContext`] carries state through the middleware pipeline.
//! It wraps the handler-facing [`RequestContext`] and adds type-keyed
//! extensions that stages use to talk to each other (the classification
//! stage leaves its [`harbor_core::ClassifiedError`] there, for example).

use std::any::{Any, TypeId};
use std::collections::HashMap;

use harbor_core::{RequestContext, RequestId, RequestMeta};
use tokio::time::Instant;

/// Context that flows through the middleware pipeline.
///
/// # Example
///
/// ```
/// use harbor_middleware::context::MiddlewareContext;
///
/// let mut ctx = MiddlewareContext::new();
/// ctx.set_operation("getArticle");
///
/// assert_eq!(ctx.operation(), "getArticle");
/// assert_eq!(ctx.to_request_context().operation(), "getArticle");
/// ```
#[derive(Debug)]
pub struct MiddlewareContext {
    /// Handler-facing request state.
    request: RequestContext,

    /// Type-erased extension data.
    extensions: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl MiddlewareContext {
    /// Creates a new middleware context with a fresh request ID.
    #[must_use]
    pub fn new() -> Self {
        Self::from_request_context(RequestContext::new())
    }

    /// Creates a context with a specific request ID.
    #[must_use]
    pub fn with_request_id(request_id: RequestId) -> Self {
        Self::from_request_context(RequestContext::with_request_id(request_id))
    }

    /// Wraps an existing request context.
    #[must_use]
    pub fn from_request_context(request: RequestContext) -> Self {
        Self {
            request,
            extensions: HashMap::new(),
        }
    }

    /// Returns the request ID.
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request.request_id()
    }

    /// Returns the operation name (`UNKNOWN` when no route matched).
    #[must_use]
    pub fn operation(&self) -> &str {
        self.request.operation()
    }

    /// Sets the operation name.
    ///
    /// This is set after routing resolves the path to a registered route.
    pub fn set_operation(&mut self, operation: impl Into<String>) {
        self.request.set_operation(operation);
    }

    /// Returns the matched route template, if any.
    #[must_use]
    pub fn route(&self) -> Option<&str> {
        self.request.route()
    }

    /// Sets the matched route template.
    pub fn set_route(&mut self, route: impl Into<String>) {
        self.request.set_route(route);
    }

    /// Returns the request metadata.
    #[must_use]
    pub fn meta(&self) -> &RequestMeta {
        self.request.meta()
    }

    /// Returns the wrapped request context.
    #[must_use]
    pub const fn request_context(&self) -> &RequestContext {
        &self.request
    }

    /// Returns the wrapped request context mutably.
    pub fn request_context_mut(&mut self) -> &mut RequestContext {
        &mut self.request
    }

    /// Returns when the request started processing.
    #[must_use]
    pub fn started_at(&self) -> Instant {
        self.request.started_at()
    }

    /// Returns the elapsed time since the request started.
    #[must_use]
    pub fn elapsed(&self) -> std::time::Duration {
        self.request.elapsed()
    }

    /// Stores a typed extension value, replacing any previous value of that type.
    ///
    /// # Example
    ///
    /// ```
    /// use harbor_middleware::context::MiddlewareContext;
    ///
    /// struct CacheHit(bool);
    ///
    /// let mut ctx = MiddlewareContext::new();
    /// ctx.set_extension(CacheHit(true));
    /// assert!(ctx.get_extension::<CacheHit>().unwrap().0);
    /// ```
    pub fn set_extension<T: Send + Sync + 'static>(&mut self, value: T) {
        self.extensions.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Retrieves a typed extension value.
    #[must_use]
    pub fn get_extension<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref())
    }

    /// Removes and returns a typed extension value.
    pub fn remove_extension<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.extensions
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast().ok())
            .map(|b| *b)
    }

    /// Checks if an extension of the given type exists.
    #[must_use]
    pub fn has_extension<T: Send + Sync + 'static>(&self) -> bool {
        self.extensions.contains_key(&TypeId::of::<T>())
    }

    /// Returns a snapshot of the request context for a handler.
    ///
    /// The snapshot shares the cancellation token, so a handler holding it
    /// still observes deadline and disconnect cancellation.
    #[must_use]
    pub fn to_request_context(&self) -> RequestContext {
        self.request.clone()
    }
}

impl Default for MiddlewareContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harbor_core::UNKNOWN_OPERATION;

    #[test]
    fn test_new_context_is_unrouted() {
        let ctx = MiddlewareContext::new();
        assert_eq!(ctx.operation(), UNKNOWN_OPERATION);
        assert!(ctx.route().is_none());
    }

    #[test]
    fn test_set_route_and_operation() {
        let mut ctx = MiddlewareContext::new();
        ctx.set_route("/articles/{id}");
        ctx.set_operation("getArticle");

        assert_eq!(ctx.route(), Some("/articles/{id}"));
        assert_eq!(ctx.operation(), "getArticle");
    }

    #[test]
    fn test_extensions() {
        #[derive(Debug, Clone, PartialEq)]
        struct MyExtension {
            value: i32,
        }

        let mut ctx = MiddlewareContext::new();
        assert!(!ctx.has_extension::<MyExtension>());

        ctx.set_extension(MyExtension { value: 42 });
        assert_eq!(ctx.get_extension::<MyExtension>(), Some(&MyExtension { value: 42 }));

        let removed = ctx.remove_extension::<MyExtension>();
        assert_eq!(removed, Some(MyExtension { value: 42 }));
        assert!(!ctx.has_extension::<MyExtension>());
    }

    #[test]
    fn test_snapshot_shares_cancellation() {
        let ctx = MiddlewareContext::new();
        let snapshot = ctx.to_request_context();

        assert_eq!(snapshot.request_id(), ctx.request_id());
        ctx.request_context().cancellation_token().cancel();
        assert!(snapshot.is_cancelled());
    }
}
