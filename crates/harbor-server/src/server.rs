//! HTTP server implementation.
//!
//! The server accepts connections on a Tokio [`TcpListener`] and serves them
//! with Hyper's HTTP/1 connection driver. Every request is:
//!
//! 1. buffered into a [`Request`],
//! 2. resolved to a built-in endpoint or an application route, which fixes
//!    the route template and operation name,
//! 3. passed through the middleware [`Pipeline`] with a cancellation token
//!    that is a child of its connection's token.
//!
//! Closing a connection cancels its requests. On shutdown the listener stops
//! accepting, open connections finish their in-flight requests, and the
//! server waits up to the drain timeout for them to close.
//!
//! # Example
//!
//! ```rust,no_run
//! use harbor_middleware::{Response, ResponseExt};
//! use harbor_server::{Server, ShutdownSignal};
//! use http::{Method, StatusCode};
//!
//! # async fn run() -> Result<(), harbor_server::ServerError> {
//! let server = Server::builder()
//!     .http_addr("127.0.0.1:8080")
//!     .route(Method::GET, "/articles", "fetchArticles", |_ctx, _req| async {
//!         Ok::<_, anyhow::Error>(Response::json(StatusCode::OK, &serde_json::json!([])))
//!     })
//!     .build();
//!
//! server.run(ShutdownSignal::with_os_signals()?).await
//! # }
//! ```

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::FutureExt;
use harbor_core::events::{EventPublisher, Publishers, Topic};
use harbor_core::{Classifier, RequestContext, ServiceError, UNKNOWN_OPERATION};
use harbor_middleware::stages::{
    ErrorClassificationMiddleware, MetricsMiddleware, PathSkipper, TimeoutMiddleware,
    TracingMiddleware,
};
use harbor_middleware::{MiddlewareContext, Outcome, Pipeline, Request, Response};
use harbor_telemetry::{MetricsRegistry, Tracer};
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::endpoints::{Endpoint, Endpoints, METRICS_PATH};
use crate::error::ServerError;
use crate::handler::HandlerRegistry;
use crate::router::{RouteMatch, Router};
use crate::shutdown::{ConnectionTracker, ShutdownSignal};

/// The Harbor HTTP server.
///
/// Cloning is cheap; clones share routes, handlers and connection state.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

struct Inner {
    config: ServerConfig,
    router: Router,
    handlers: HandlerRegistry,
    pipeline: Pipeline,
    endpoints: Endpoints,
    tracker: ConnectionTracker,
    duplicates: Vec<String>,
    publishers: Publishers,
}

/// Where a request is dispatched to.
enum Target {
    Endpoint(Endpoint),
    Route(RouteMatch),
    Rejected(ServiceError),
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.inner.config)
            .field("routes", &self.inner.router.route_count())
            .field("handlers", &self.inner.handlers)
            .field("pipeline", &self.inner.pipeline)
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Creates a new server builder.
    #[must_use]
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Returns the server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Returns the router.
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.inner.router
    }

    /// Returns the handler registry.
    #[must_use]
    pub fn handlers(&self) -> &HandlerRegistry {
        &self.inner.handlers
    }

    /// Returns the middleware pipeline.
    #[must_use]
    pub fn pipeline(&self) -> &Pipeline {
        &self.inner.pipeline
    }

    /// Returns the number of open connections.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.inner.tracker.active_connections()
    }

    /// Binds a listener to the configured address.
    ///
    /// # Errors
    ///
    /// Returns an error if two routes were registered under the same
    /// operation name, or if the address is invalid or cannot be bound.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        if let Some(operation) = self.inner.duplicates.first() {
            return Err(ServerError::duplicate_operation(operation.as_str()));
        }
        let addr = self.inner.config.socket_addr()?;
        TcpListener::bind(addr)
            .await
            .map_err(|err| ServerError::bind(addr, err))
    }

    /// Binds the configured address and serves until `shutdown` fires.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot bind.
    pub async fn run(self, shutdown: ShutdownSignal) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await
    }

    /// Serves connections from `listener` until `shutdown` fires, then waits
    /// up to the drain timeout for open connections to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener's local address cannot be read.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: ShutdownSignal,
    ) -> Result<(), ServerError> {
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "server listening");

        let stopped = shutdown.recv();
        tokio::pin!(stopped);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote_addr)) => {
                        self.spawn_connection(stream, remote_addr, shutdown.clone());
                    }
                    Err(err) => tracing::warn!(error = %err, "failed to accept connection"),
                },
                () = &mut stopped => break,
            }
        }
        drop(listener);

        let tracker = &self.inner.tracker;
        let drain_timeout = self.inner.config.drain_timeout();
        tracing::info!(
            active_connections = tracker.active_connections(),
            drain_timeout_ms = harbor_core::millis(drain_timeout),
            "listener stopped, draining connections"
        );

        tokio::select! {
            () = tracker.wait_for_drain() => tracing::info!("all connections closed"),
            () = tokio::time::sleep(drain_timeout) => tracing::warn!(
                active_connections = tracker.active_connections(),
                "drain timeout reached"
            ),
        }

        tracing::info!("server stopped");
        Ok(())
    }

    fn spawn_connection(
        &self,
        stream: TcpStream,
        remote_addr: SocketAddr,
        shutdown: ShutdownSignal,
    ) {
        let inner = Arc::clone(&self.inner);
        let token = inner.tracker.acquire();

        tokio::spawn(async move {
            let _token = token;
            let connection = CancellationToken::new();
            // Requests of this connection are cancelled when it goes away.
            let _cancel_on_close = connection.clone().drop_guard();

            let service_inner = Arc::clone(&inner);
            let service = service_fn(move |request: http::Request<Incoming>| {
                let inner = Arc::clone(&service_inner);
                let cancel = connection.child_token();
                async move {
                    Ok::<_, Infallible>(inner.handle_incoming(request, cancel).await)
                }
            });

            let mut builder = http1::Builder::new();
            builder.keep_alive(inner.config.keep_alive());
            let conn = builder.serve_connection(TokioIo::new(stream), service);
            tokio::pin!(conn);

            let stopped = shutdown.recv();
            tokio::pin!(stopped);

            let result = tokio::select! {
                result = conn.as_mut() => result,
                () = &mut stopped => {
                    conn.as_mut().graceful_shutdown();
                    conn.await
                }
            };

            if let Err(err) = result {
                tracing::debug!(
                    remote = %remote_addr,
                    error = %err,
                    "connection closed with error"
                );
            }
        });
    }

    /// Dispatches a buffered request in-process.
    ///
    /// The request runs through routing and the full middleware pipeline, as
    /// if it had arrived on a connection.
    pub async fn handle(&self, request: Request) -> Response {
        let target = self.inner.resolve(request.method(), request.uri().path());
        Arc::clone(&self.inner)
            .dispatch(request, CancellationToken::new(), target)
            .await
    }
}

impl Inner {
    async fn handle_incoming(
        self: Arc<Self>,
        request: http::Request<Incoming>,
        cancel: CancellationToken,
    ) -> Response {
        let (parts, body) = request.into_parts();

        let (body, target) = match body.collect().await {
            Ok(collected) => {
                let target = self.resolve(&parts.method, parts.uri.path());
                (collected.to_bytes(), target)
            }
            Err(err) => {
                tracing::debug!(error = %err, "failed to read request body");
                let rejected =
                    ServiceError::status(StatusCode::BAD_REQUEST, "failed to read request body");
                (bytes::Bytes::new(), Target::Rejected(rejected))
            }
        };

        let request = http::Request::from_parts(parts, Full::new(body));
        self.dispatch(request, cancel, target).await
    }

    fn resolve(&self, method: &Method, path: &str) -> Target {
        if let Some(endpoint) = self.endpoints.resolve(method, path) {
            return Target::Endpoint(endpoint);
        }
        match self.router.match_route(method, path) {
            Some(route) => Target::Route(route),
            None => Target::Rejected(ServiceError::not_found()),
        }
    }

    async fn dispatch(
        self: Arc<Self>,
        request: Request,
        cancel: CancellationToken,
        target: Target,
    ) -> Response {
        let mut ctx = RequestContext::new()
            .with_cancellation_token(cancel)
            .with_publishers(self.publishers.clone());
        match &target {
            Target::Endpoint(endpoint) => {
                ctx.set_route(endpoint.template(self.endpoints.metrics_path()));
                ctx.set_operation(endpoint.operation());
            }
            Target::Route(route) => {
                ctx.set_route(route.template());
                ctx.set_operation(route.operation());
            }
            Target::Rejected(_) => ctx.set_operation(UNKNOWN_OPERATION),
        }

        tracing::debug!(
            request_id = %ctx.request_id(),
            method = %request.method(),
            path = %request.uri().path(),
            operation = %ctx.operation(),
            "dispatching request"
        );

        let inner = Arc::clone(&self);
        self.pipeline
            .process(
                MiddlewareContext::from_request_context(ctx),
                request,
                move |ctx, mut request| match target {
                    Target::Endpoint(endpoint) => {
                        let outcome =
                            inner.endpoints.serve(&endpoint, &inner.router, &inner.tracker);
                        async move { outcome }.boxed()
                    }
                    Target::Route(route) => {
                        let (_, operation, params) = route.into_parts();
                        request.extensions_mut().insert(params);
                        inner.handlers.invoke(&operation, ctx.to_request_context(), request)
                    }
                    Target::Rejected(err) => async move { Outcome::Err(err.into()) }.boxed(),
                },
            )
            .await
    }
}

/// Builder for [`Server`].
///
/// Unless a custom pipeline is supplied, the server runs the span stage when
/// a tracer is set, the timeout stage with the configured request timeout,
/// the metrics stage when a registry is set, and the error classification
/// stage with the configured classifier.
#[derive(Debug)]
pub struct ServerBuilder {
    config: crate::config::ServerConfigBuilder,
    router: Router,
    handlers: HandlerRegistry,
    duplicates: Vec<String>,
    pipeline: Option<Pipeline>,
    classifier: Classifier,
    metrics: Option<MetricsRegistry>,
    tracer: Option<Tracer>,
    publishers: Publishers,
    metrics_path: String,
    skip_paths: Vec<String>,
    service_name: String,
    version: Option<String>,
    base: Option<ServerConfig>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    /// Creates a builder with default configuration and no routes.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: ServerConfig::builder(),
            router: Router::new(),
            handlers: HandlerRegistry::new(),
            duplicates: Vec::new(),
            pipeline: None,
            classifier: Classifier::new(),
            metrics: None,
            tracer: None,
            publishers: Publishers::new(),
            metrics_path: METRICS_PATH.to_string(),
            skip_paths: Vec::new(),
            service_name: "harbor".to_string(),
            version: None,
            base: None,
        }
    }

    /// Uses a complete server configuration, replacing individual settings.
    #[must_use]
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.base = Some(config);
        self
    }

    /// Sets the HTTP bind address.
    #[must_use]
    pub fn http_addr(mut self, addr: impl Into<String>) -> Self {
        self.config = self.config.http_addr(addr);
        self
    }

    /// Sets the per-request deadline.
    #[must_use]
    pub fn request_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.config = self.config.request_timeout(timeout);
        self
    }

    /// Sets the connection drain timeout.
    #[must_use]
    pub fn drain_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.config = self.config.drain_timeout(timeout);
        self
    }

    /// Enables or disables the `/debug` endpoints.
    #[must_use]
    pub fn debug(mut self, enabled: bool) -> Self {
        self.config = self.config.debug(enabled);
        self
    }

    /// Registers a route and its handler.
    ///
    /// Each operation name may be registered once. A second route under the
    /// same name is dropped and makes [`Server::bind`] fail.
    #[must_use]
    pub fn route<F, Fut>(
        mut self,
        method: Method,
        template: &str,
        operation: &str,
        handler: F,
    ) -> Self
    where
        F: Fn(RequestContext, Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        match self.handlers.register(operation, handler) {
            Ok(()) => self.router.add_route(method, template, operation),
            Err(err) => {
                tracing::error!(%method, template, error = %err, "route rejected");
                self.duplicates.push(operation.to_string());
            }
        }
        self
    }

    /// Replaces the router.
    #[must_use]
    pub fn router(mut self, router: Router) -> Self {
        self.router = router;
        self
    }

    /// Replaces the handler registry.
    #[must_use]
    pub fn handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    /// Sets the classifier of the error classification stage.
    #[must_use]
    pub fn classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Records request metrics into `registry` and serves it.
    #[must_use]
    pub fn metrics(mut self, registry: MetricsRegistry) -> Self {
        self.metrics = Some(registry);
        self
    }

    /// Records a server span per request on `tracer`.
    #[must_use]
    pub fn tracer(mut self, tracer: Tracer) -> Self {
        self.tracer = Some(tracer);
        self
    }

    /// Makes handlers publish events of `topic` to `publisher`.
    #[must_use]
    pub fn publisher(mut self, topic: Topic, publisher: impl EventPublisher) -> Self {
        self.publishers = self.publishers.with(topic, publisher);
        self
    }

    /// Sets the metrics exposition path.
    #[must_use]
    pub fn metrics_path(mut self, path: impl Into<String>) -> Self {
        self.metrics_path = path.into();
        self
    }

    /// Adds paths the metrics stage skips, on top of the built-in endpoints.
    #[must_use]
    pub fn skip_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip_paths.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Sets the service name reported by `/debug/vars`.
    #[must_use]
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// Overrides the version reported by `/_version`.
    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Uses a custom pipeline instead of the default stages.
    #[must_use]
    pub fn pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    /// Builds the server.
    #[must_use]
    pub fn build(self) -> Server {
        let config = self.base.unwrap_or_else(|| self.config.build());

        let pipeline = self.pipeline.unwrap_or_else(|| {
            let mut pipeline = Pipeline::builder()
                .timeout(TimeoutMiddleware::new(config.request_timeout()))
                .error_classification(ErrorClassificationMiddleware::new(self.classifier));

            if let Some(tracer) = self.tracer {
                pipeline = pipeline.tracing(TracingMiddleware::new(tracer));
            }
            if let Some(registry) = &self.metrics {
                let skipped = self.skip_paths.iter().cloned();
                let skipper =
                    PathSkipper::default().with_paths(skipped.chain([self.metrics_path.clone()]));
                let middleware = MetricsMiddleware::new(registry.clone()).skipper(skipper);
                pipeline = pipeline.metrics(middleware);
            }
            pipeline.build()
        });

        let mut endpoints = Endpoints::new(self.service_name).debug(config.debug());
        if let Some(version) = self.version {
            endpoints = endpoints.version(version);
        }
        if let Some(registry) = self.metrics {
            endpoints = endpoints.metrics(registry, self.metrics_path);
        }

        Server {
            inner: Arc::new(Inner {
                config,
                router: self.router,
                handlers: self.handlers,
                pipeline,
                endpoints,
                tracker: ConnectionTracker::new(),
                duplicates: self.duplicates,
                publishers: self.publishers,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use harbor_middleware::pipeline::Stage;
    use harbor_middleware::ResponseExt;

    fn request(method: Method, path: &str) -> Request {
        http::Request::builder()
            .method(method)
            .uri(path)
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    async fn body_of(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn server() -> Server {
        Server::builder()
            .route(Method::GET, "/articles", "fetchArticles", |ctx, _req| async move {
                Ok(Response::text(StatusCode::OK, ctx.operation().to_string()))
            })
            .route(Method::GET, "/articles/{id}", "getArticle", |_ctx, req: Request| async move {
                let params = req
                    .extensions()
                    .get::<crate::PathParams>()
                    .cloned()
                    .unwrap_or_default();
                let id = params.require("id")?;
                Ok::<_, anyhow::Error>(Response::text(StatusCode::OK, id.to_string()))
            })
            .build()
    }

    #[test]
    fn test_default_pipeline_stages() {
        assert_eq!(
            server().pipeline().stages(),
            vec![Stage::Timeout, Stage::ErrorClassification]
        );
    }

    #[tokio::test]
    async fn test_handle_routes_with_operation() {
        let response = server().handle(request(Method::GET, "/articles")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_of(response).await, "fetchArticles");
    }

    #[tokio::test]
    async fn test_handle_passes_path_params() {
        let response = server().handle(request(Method::GET, "/articles/42")).await;
        assert_eq!(body_of(response).await, "42");
    }

    #[tokio::test]
    async fn test_unmatched_is_not_found() {
        let response = server().handle(request(Method::GET, "/nowhere")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_of(response).await, r#"{"message":"not found"}"#);
    }

    #[tokio::test]
    async fn test_routed_without_handler_is_not_implemented() {
        let mut router = Router::new();
        router.add_route(Method::GET, "/articles", "fetchArticles");
        let server = Server::builder().router(router).build();

        let response = server.handle(request(Method::GET, "/articles")).await;
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    }

    #[tokio::test]
    async fn test_ping() {
        let response = server().handle(request(Method::GET, "/ping")).await;
        assert_eq!(body_of(response).await, "pong");
    }

    #[tokio::test]
    async fn test_debug_disabled_by_default() {
        let response = server().handle(request(Method::GET, "/debug/vars")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_metrics_stage_added_with_registry() {
        let registry = MetricsRegistry::new(&harbor_telemetry::MetricsConfig::default()).unwrap();
        let server = Server::builder().metrics(registry).build();
        assert_eq!(server.pipeline().stage_count(), 3);

        let response = server.handle(request(Method::GET, "/metrics")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_bind_invalid_address() {
        let server = Server::builder().http_addr("not-an-address").build();
        assert!(matches!(
            server.bind().await.unwrap_err(),
            ServerError::InvalidAddress { .. }
        ));
    }

    #[tokio::test]
    async fn test_duplicate_operation_fails_bind() {
        let server = Server::builder()
            .http_addr("127.0.0.1:0")
            .route(Method::GET, "/articles", "fetchArticles", |_ctx, _req| async move {
                Ok(Response::empty(StatusCode::OK))
            })
            .route(Method::GET, "/posts", "fetchArticles", |_ctx, _req| async move {
                Ok(Response::empty(StatusCode::NO_CONTENT))
            })
            .build();

        assert_eq!(server.router().route_count(), 1);
        assert_eq!(server.handlers().len(), 1);
        assert!(matches!(
            server.bind().await.unwrap_err(),
            ServerError::DuplicateOperation { ref operation } if operation == "fetchArticles"
        ));

        let response = server.handle(request(Method::GET, "/articles")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_tracer_adds_span_stage() {
        use opentelemetry::trace::TracerProvider as _;
        use opentelemetry_sdk::testing::trace::InMemorySpanExporter;

        let exporter = InMemorySpanExporter::default();
        let provider = opentelemetry_sdk::trace::TracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        let server = Server::builder()
            .tracer(provider.tracer("harbor"))
            .route(Method::GET, "/articles", "fetchArticles", |_ctx, _req| async move {
                Ok(Response::empty(StatusCode::OK))
            })
            .build();
        assert_eq!(
            server.pipeline().stages(),
            vec![Stage::Tracing, Stage::Timeout, Stage::ErrorClassification]
        );

        server.handle(request(Method::GET, "/articles")).await;
        server.handle(request(Method::GET, "/missing")).await;

        let spans = exporter.get_finished_spans().unwrap();
        let names: Vec<&str> = spans.iter().map(|span| span.name.as_ref()).collect();
        assert_eq!(names, vec!["GET /articles", "GET"]);
    }

    #[tokio::test]
    async fn test_handlers_publish_to_configured_topic() {
        use harbor_core::events::{EventBody, EventBus, SystemEvent};
        use serde::{Deserialize, Serialize};

        #[derive(Serialize, Deserialize)]
        struct ArticleViewed {
            id: String,
        }

        impl EventBody for ArticleViewed {
            const NAME: &'static str = "article.viewed";
            const TOPIC: Topic = Topic::new("articles");
        }

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let bus = EventBus::new();
        bus.subscribe(move |event: &SystemEvent| {
            let _ = tx.send(event.clone());
        });

        let server = Server::builder()
            .publisher(ArticleViewed::TOPIC, bus)
            .route(Method::GET, "/articles/{id}", "getArticle", |ctx, req: Request| async move {
                let params = req.extensions().get::<crate::PathParams>().cloned();
                let id = params.unwrap_or_default().require("id")?.to_string();
                ctx.publish(ArticleViewed { id });
                Ok::<_, anyhow::Error>(Response::empty(StatusCode::NO_CONTENT))
            })
            .build();

        let response = server.handle(request(Method::GET, "/articles/7")).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.name(), "article.viewed");
        assert_eq!(event.body::<ArticleViewed>().unwrap().id, "7");
        assert!(rx.try_recv().is_err());
    }
}
