//! End-to-end pipeline integration tests.
//!
//! These tests run requests through the stages in their fixed order:
//!
//! 1. Timeout - Request deadline on the cancellation token
//! 2. Metrics - Request metric family
//! 3. Error Classification - Classification, logging and response shaping
//!
//! The span stage has its own tests next to it.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use harbor_core::{constraint, Classifier, ServiceError};
use harbor_middleware::{
    context::MiddlewareContext,
    pipeline::Pipeline,
    stages::{ErrorClassificationMiddleware, MetricsMiddleware, TimeoutMiddleware},
    types::{Outcome, Request, Response, ResponseExt},
    BoxFuture,
};
use harbor_telemetry::{MetricsConfig, MetricsRegistry};
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use parking_lot::Mutex;
use tracing_subscriber::fmt::MakeWriter;

/// Log output captured from a test-local subscriber.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Installs a capturing subscriber on the current thread.
fn capture_logs() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (logs, guard)
}

fn registry() -> MetricsRegistry {
    MetricsRegistry::new(&MetricsConfig::default()).unwrap()
}

fn build_pipeline(registry: &MetricsRegistry, classifier: Classifier) -> Pipeline {
    Pipeline::builder()
        .timeout(TimeoutMiddleware::new(Duration::from_millis(100)))
        .metrics(MetricsMiddleware::new(registry.clone()))
        .error_classification(ErrorClassificationMiddleware::new(classifier))
        .build()
}

fn make_request(method: Method, path: &str) -> Request {
    http::Request::builder()
        .method(method)
        .uri(path)
        .header("x-trace", "abc")
        .body(Full::new(Bytes::new()))
        .unwrap()
}

async fn run<H>(pipeline: &Pipeline, request: Request, handler: H) -> Response
where
    H: FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, Outcome> + Send + 'static,
{
    pipeline.process(MiddlewareContext::new(), request, handler).await
}

async fn body_string(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

// =============================================================================
// Classification
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_deadline_is_408_and_not_logged() {
    let (logs, _guard) = capture_logs();
    let pipeline = build_pipeline(&registry(), Classifier::new());

    let response = run(&pipeline, make_request(Method::GET, "/something/5000"), |ctx, _req| {
        let request = ctx.to_request_context();
        Box::pin(async move {
            request
                .run_until_cancelled(tokio::time::sleep(Duration::from_secs(5)))
                .await?;
            Ok(Response::text(StatusCode::OK, "done"))
        })
    })
    .await;

    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    assert_eq!(
        body_string(response).await,
        r#"{"message":"request deadline exceeded"}"#
    );
    assert!(!logs.contents().contains("ERROR"));
}

#[tokio::test]
async fn test_elapsed_timeout_is_408() {
    let pipeline = build_pipeline(&registry(), Classifier::new());

    let response = run(&pipeline, make_request(Method::GET, "/slow"), |_ctx, _req| {
        Box::pin(async {
            tokio::time::timeout(Duration::from_millis(1), std::future::pending::<()>())
                .await
                .context("waiting for upstream")?;
            Ok(Response::empty(StatusCode::OK))
        })
    })
    .await;

    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
}

#[tokio::test]
async fn test_not_found_sentinel() {
    let pipeline = build_pipeline(&registry(), Classifier::new());

    let response = run(&pipeline, make_request(Method::GET, "/articles/9"), |_ctx, _req| {
        Box::pin(async {
            Err(anyhow::Error::new(ServiceError::NotFound).context("loading article 9"))
        })
    })
    .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_string(response).await, r#"{"message":"not found"}"#);
}

#[tokio::test]
async fn test_constraint_message_is_exact() {
    let pipeline = build_pipeline(&registry(), Classifier::new());

    let response = run(&pipeline, make_request(Method::GET, "/something/abc"), |_ctx, _req| {
        Box::pin(async { Err(constraint!("invalid duration: {}", "abc").into()) })
    })
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_string(response).await, r#"{"message":"invalid duration: abc"}"#);
}

fn three_layer_error() -> anyhow::Error {
    anyhow::anyhow!("connection reset")
        .context("reading row")
        .context("querying articles")
        .context("serving fetchArticles")
}

#[tokio::test]
async fn test_wrapped_error_hardened() {
    let (logs, _guard) = capture_logs();
    let pipeline = build_pipeline(&registry(), Classifier::new());

    let response = run(&pipeline, make_request(Method::GET, "/articles"), |ctx, _req| {
        ctx.set_operation("fetchArticles");
        Box::pin(async { Err(three_layer_error()) })
    })
    .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_string(response).await, r#"{"message":"internal server error"}"#);

    let logs = logs.contents();
    assert_eq!(logs.matches("request failed").count(), 1);
    let chain = [
        "serving fetchArticles",
        "querying articles",
        "reading row",
        "connection reset",
    ];
    for message in chain {
        assert!(logs.contains(message), "log is missing {message:?}: {logs}");
    }
    assert!(logs.contains("operation=fetchArticles"));
    assert!(logs.contains("x-trace:abc"));
}

#[tokio::test]
async fn test_wrapped_error_exposed() {
    let pipeline = build_pipeline(&registry(), Classifier::new().expose_internal_errors(true));

    let response = run(&pipeline, make_request(Method::GET, "/articles"), |_ctx, _req| {
        Box::pin(async { Err(three_layer_error()) })
    })
    .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_string(response).await, r#"{"message":"connection reset"}"#);
}

#[tokio::test]
async fn test_head_has_empty_body() {
    let pipeline = build_pipeline(&registry(), Classifier::new());

    for err in [
        ServiceError::NotFound,
        ServiceError::constraint("bad"),
        ServiceError::deadline_exceeded(),
    ] {
        let status = err.status_code();
        let response = run(&pipeline, make_request(Method::HEAD, "/articles/1"), move |_ctx, _req| {
            Box::pin(async move { Err(err.into()) })
        })
        .await;

        assert_eq!(response.status(), status);
        assert!(body_string(response).await.is_empty());
    }
}

#[tokio::test]
async fn test_expected_errors_not_logged() {
    let (logs, _guard) = capture_logs();
    let pipeline = build_pipeline(&registry(), Classifier::new());

    let response = run(&pipeline, make_request(Method::GET, "/articles/1"), |_ctx, _req| {
        Box::pin(async { Err(ServiceError::NotFound.into()) })
    })
    .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(!logs.contents().contains("request failed"));
}

// =============================================================================
// Metrics
// =============================================================================

#[tokio::test]
async fn test_success_is_recorded_once() {
    let registry = registry();
    let pipeline = build_pipeline(&registry, Classifier::new());

    let response = run(&pipeline, make_request(Method::GET, "/articles"), |ctx, _req| {
        ctx.set_route("/articles");
        ctx.set_operation("fetchArticles");
        Box::pin(async { Ok(Response::json(StatusCode::OK, &serde_json::json!([]))) })
    })
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let rendered = registry.render();
    let line = rendered
        .lines()
        .find(|line| line.starts_with("http_requests_total{"))
        .unwrap();
    assert!(line.contains(r#"operation="fetchArticles""#));
    assert!(line.ends_with(" 1"));
}

#[tokio::test]
async fn test_failures_are_not_recorded() {
    let registry = registry();
    let pipeline = build_pipeline(&registry, Classifier::new());

    run(&pipeline, make_request(Method::GET, "/articles"), |_ctx, _req| {
        Box::pin(async { Err(three_layer_error()) })
    })
    .await;

    assert!(!registry.render().contains("http_requests_total{"));
}

#[tokio::test]
async fn test_skip_listed_paths_never_recorded() {
    let registry = registry();
    let pipeline = build_pipeline(&registry, Classifier::new());

    for path in ["/ping", "/_version", "/metrics", "/debug/vars", "/debug/config"] {
        let response = run(&pipeline, make_request(Method::GET, path), |_ctx, _req| {
            Box::pin(async { Ok(Response::text(StatusCode::OK, "pong")) })
        })
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    assert!(!registry.render().contains("http_requests_total{"));
}

// =============================================================================
// Access log
// =============================================================================

#[tokio::test]
async fn test_every_request_gets_one_access_log_line() {
    let (logs, _guard) = capture_logs();
    let pipeline = build_pipeline(&registry(), Classifier::new());

    run(&pipeline, make_request(Method::GET, "/articles?limit=5"), |ctx, _req| {
        ctx.set_route("/articles");
        ctx.set_operation("fetchArticles");
        Box::pin(async { Ok(Response::json(StatusCode::OK, &serde_json::json!([]))) })
    })
    .await;
    run(&pipeline, make_request(Method::GET, "/articles/9"), |ctx, _req| {
        ctx.set_route("/articles/{id}");
        ctx.set_operation("getArticle");
        Box::pin(async { Err(ServiceError::NotFound.into()) })
    })
    .await;
    run(&pipeline, make_request(Method::GET, "/articles"), |_ctx, _req| {
        Box::pin(async { Err(three_layer_error()) })
    })
    .await;

    let logs = logs.contents();
    let lines: Vec<&str> = logs
        .lines()
        .filter(|line| line.contains("request info"))
        .collect();
    assert_eq!(lines.len(), 3, "{logs}");

    assert!(lines[0].contains(" INFO "));
    assert!(lines[0].contains("method=GET"));
    assert!(lines[0].contains("uri=/articles?limit=5"));
    assert!(lines[0].contains("route=/articles"));
    assert!(lines[0].contains("operation=fetchArticles"));
    assert!(lines[0].contains("status=200"));
    assert!(lines[0].contains("latency_ms="));
    assert!(lines[0].contains("request_id="));

    assert!(lines[1].contains("route=/articles/{id}"));
    assert!(lines[1].contains("operation=getArticle"));
    assert!(lines[1].contains("status=404"));

    assert!(lines[2].contains("status=500"));
}
