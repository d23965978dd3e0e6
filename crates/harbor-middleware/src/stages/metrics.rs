//! Request metrics middleware.
//!
//! Records the request metric family into an explicit [`MetricsRegistry`]
//! for every request that completed successfully. Failed requests (those the
//! classification stage turned into a response) and skip-listed paths are not
//! recorded.
//!
//! # Labels
//!
//! | Label       | Value                                       |
//! |-------------|---------------------------------------------|
//! | `service`   | Service name of the registry                |
//! | `code`      | Response status code                        |
//! | `method`    | Request method                              |
//! | `url`       | Matched route template, or the raw path     |
//! | `operation` | Registered operation name, or `UNKNOWN`     |

use std::sync::Arc;

use harbor_core::ClassifiedError;
use harbor_telemetry::{MetricsRegistry, RequestObservation};
use hyper::body::Body as _;

use crate::{
    context::MiddlewareContext,
    middleware::{BoxFuture, Middleware, Next},
    types::{Outcome, Request},
};

/// Decides whether a request is excluded from metrics.
pub trait SkipPredicate: Send + Sync + 'static {
    /// Returns `true` if the request must not be recorded.
    fn should_skip(&self, request: &Request) -> bool;
}

impl<F> SkipPredicate for F
where
    F: Fn(&Request) -> bool + Send + Sync + 'static,
{
    fn should_skip(&self, request: &Request) -> bool {
        self(request)
    }
}

/// Skips requests by path.
///
/// A path ending in `/*` skips everything below it; any other path must match
/// exactly.
///
/// # Example
///
/// ```
/// use harbor_middleware::stages::{PathSkipper, SkipPredicate};
///
/// let skipper = PathSkipper::default().with_paths(["/internal/*"]);
/// let request = |path: &str| {
///     http::Request::builder()
///         .uri(path)
///         .body(http_body_util::Full::new(bytes::Bytes::new()))
///         .unwrap()
/// };
///
/// assert!(skipper.should_skip(&request("/ping")));
/// assert!(skipper.should_skip(&request("/debug/vars")));
/// assert!(skipper.should_skip(&request("/internal/state")));
/// assert!(!skipper.should_skip(&request("/articles")));
/// ```
#[derive(Debug, Clone)]
pub struct PathSkipper {
    exact: Vec<String>,
    prefixes: Vec<String>,
}

impl PathSkipper {
    /// Creates a skipper that skips nothing.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            exact: Vec::new(),
            prefixes: Vec::new(),
        }
    }

    /// Adds paths to skip.
    #[must_use]
    pub fn with_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for path in paths {
            let path = path.into();
            match path.strip_suffix("/*") {
                Some(prefix) => {
                    self.exact.push(prefix.to_string());
                    self.prefixes.push(format!("{prefix}/"));
                }
                None => self.exact.push(path),
            }
        }
        self
    }

    fn matches(&self, path: &str) -> bool {
        self.exact.iter().any(|p| p == path)
            || self.prefixes.iter().any(|p| path.starts_with(p.as_str()))
    }
}

impl Default for PathSkipper {
    /// Skips the built-in endpoints.
    fn default() -> Self {
        Self::empty().with_paths(["/ping", "/_version", "/metrics", "/debug/*"])
    }
}

impl SkipPredicate for PathSkipper {
    fn should_skip(&self, request: &Request) -> bool {
        self.matches(request.uri().path())
    }
}

/// Middleware that records the request metric family.
#[derive(Clone)]
pub struct MetricsMiddleware {
    registry: MetricsRegistry,
    skipper: Arc<dyn SkipPredicate>,
}

impl std::fmt::Debug for MetricsMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsMiddleware")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl MetricsMiddleware {
    /// Creates the stage with the default [`PathSkipper`].
    #[must_use]
    pub fn new(registry: MetricsRegistry) -> Self {
        Self {
            registry,
            skipper: Arc::new(PathSkipper::default()),
        }
    }

    /// Replaces the skip predicate.
    #[must_use]
    pub fn skipper(mut self, skipper: impl SkipPredicate) -> Self {
        self.skipper = Arc::new(skipper);
        self
    }

    /// Returns the registry metrics are recorded into.
    #[must_use]
    pub const fn registry(&self) -> &MetricsRegistry {
        &self.registry
    }
}

impl Middleware for MetricsMiddleware {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            if self.skipper.should_skip(&request) {
                return next.run(ctx, request).await;
            }

            let started = tokio::time::Instant::now();
            let request_size = approximate_request_size(&request);
            let method = request.method().clone();
            let path = request.uri().path().to_string();

            let outcome = next.run(ctx, request).await;

            if let Ok(response) = &outcome {
                if !ctx.has_extension::<ClassifiedError>() {
                    let response_size = response.body().size_hint().exact().unwrap_or(0);
                    self.registry.record_request(&RequestObservation {
                        status: response.status().as_u16(),
                        method: method.as_str(),
                        url: ctx.route().unwrap_or(path.as_str()),
                        operation: ctx.operation(),
                        duration: started.elapsed(),
                        request_size,
                        response_size,
                    });
                }
            }

            outcome
        })
    }
}

/// Approximates the size of a request on the wire.
///
/// Counts the path, method, protocol, header names and values, host and the
/// body when its length is known.
#[must_use]
pub fn approximate_request_size(request: &Request) -> u64 {
    let mut size = request.uri().path().len();
    size += request.method().as_str().len();
    size += format!("{:?}", request.version()).len();
    for (name, value) in request.headers() {
        size += name.as_str().len() + value.len();
    }
    size += request.uri().host().map_or(0, str::len);

    let body = request.body().size_hint().exact().unwrap_or(0);
    u64::try_from(size).unwrap_or(u64::MAX).saturating_add(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::classify::ErrorClassificationMiddleware;
    use crate::types::{Response, ResponseExt};
    use bytes::Bytes;
    use harbor_core::ServiceError;
    use harbor_telemetry::MetricsConfig;
    use http::{Method, StatusCode};
    use http_body_util::Full;

    fn registry() -> MetricsRegistry {
        MetricsRegistry::new(&MetricsConfig {
            service_name: "articles".to_string(),
            ..MetricsConfig::default()
        })
        .unwrap()
    }

    fn request(path: &str) -> Request {
        http::Request::builder()
            .method(Method::GET)
            .uri(path)
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    fn ok_handler() -> Next<'static> {
        Next::handler(|_ctx, _req| Box::pin(async { Ok(Response::text(StatusCode::OK, "[]")) }))
    }

    #[tokio::test]
    async fn test_records_routed_request() {
        let registry = registry();
        let middleware = MetricsMiddleware::new(registry.clone());
        let mut ctx = MiddlewareContext::new();
        ctx.set_route("/articles/{id}");
        ctx.set_operation("getArticle");

        middleware
            .process(&mut ctx, request("/articles/7"), ok_handler())
            .await
            .unwrap();

        let rendered = registry.render();
        assert!(rendered.contains("http_requests_total{"));
        assert!(rendered.contains(r#"service="articles""#));
        assert!(rendered.contains(r#"code="200""#));
        assert!(rendered.contains(r#"url="/articles/{id}""#));
        assert!(rendered.contains(r#"operation="getArticle""#));
        assert!(rendered.contains("http_request_duration_histogram_seconds_bucket"));
    }

    #[tokio::test]
    async fn test_unrouted_request_uses_path() {
        let registry = registry();
        let middleware = MetricsMiddleware::new(registry.clone());
        let mut ctx = MiddlewareContext::new();

        middleware
            .process(&mut ctx, request("/nowhere"), ok_handler())
            .await
            .unwrap();

        let rendered = registry.render();
        assert!(rendered.contains(r#"url="/nowhere""#));
        assert!(rendered.contains(r#"operation="UNKNOWN""#));
    }

    #[tokio::test]
    async fn test_skipped_paths_not_recorded() {
        let registry = registry();
        let middleware = MetricsMiddleware::new(registry.clone());

        for path in ["/ping", "/metrics", "/debug/vars"] {
            let mut ctx = MiddlewareContext::new();
            middleware.process(&mut ctx, request(path), ok_handler()).await.unwrap();
        }

        assert!(!registry.render().contains("http_requests_total{"));
    }

    #[tokio::test]
    async fn test_failed_request_not_recorded() {
        let registry = registry();
        let metrics = MetricsMiddleware::new(registry.clone());
        let classify = ErrorClassificationMiddleware::default();
        let mut ctx = MiddlewareContext::new();

        let handler =
            Next::handler(|_ctx, _req| Box::pin(async { Err(ServiceError::NotFound.into()) }));
        let response = metrics
            .process(&mut ctx, request("/articles/7"), Next::new(&classify, handler))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(!registry.render().contains("http_requests_total{"));
    }

    #[tokio::test]
    async fn test_custom_skipper() {
        let registry = registry();
        let middleware = MetricsMiddleware::new(registry.clone())
            .skipper(|request: &Request| request.method() == Method::GET);
        let mut ctx = MiddlewareContext::new();

        middleware
            .process(&mut ctx, request("/articles"), ok_handler())
            .await
            .unwrap();

        assert!(!registry.render().contains("http_requests_total{"));
    }

    #[test]
    fn test_path_skipper_prefix_and_exact() {
        let skipper = PathSkipper::empty().with_paths(["/health", "/admin/*"]);

        assert!(skipper.should_skip(&request("/health")));
        assert!(!skipper.should_skip(&request("/health/deep")));
        assert!(skipper.should_skip(&request("/admin")));
        assert!(skipper.should_skip(&request("/admin/users")));
        assert!(!skipper.should_skip(&request("/administrator")));
    }

    #[test]
    fn test_approximate_request_size() {
        let request = http::Request::builder()
            .method(Method::POST)
            .uri("http://example.com/articles")
            .header("x-key", "abc")
            .body(Full::new(Bytes::from("0123456789")))
            .unwrap();

        // "/articles" + "POST" + "HTTP/1.1" + "x-key" "abc" + "example.com" + body
        assert_eq!(approximate_request_size(&request), 9 + 4 + 8 + 5 + 3 + 11 + 10);
    }
}
