//! Request span middleware.
//!
//! Opens one OpenTelemetry server span per request on the tracer owned by
//! `harbor_telemetry::Telemetry`, so the OTLP exporter receives every
//! request. The outermost stage: it sees the final status after the
//! classification stage has shaped any error.
//!
//! ## Trace Context Propagation
//!
//! A W3C `traceparent` (and `tracestate`) header on the request makes the
//! span a child of the caller's span. Without one a new trace is started.
//!
//! ## Span Attributes
//!
//! - `http.request.method`, `url.path`, `http.route`
//! - `operation` - the operation the route maps to
//! - `request.id`
//! - `http.response.status_code` - added on completion
//! - `error.type` - the error kind, for failed requests

use harbor_core::{classify, ClassifiedError};
use http::HeaderMap;
use opentelemetry::propagation::{Extractor, TextMapPropagator};
use opentelemetry::trace::{Span as _, SpanKind, Status, Tracer as _};
use opentelemetry::KeyValue;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::Tracer;
use opentelemetry_semantic_conventions::attribute;

use crate::{
    context::MiddlewareContext,
    middleware::{BoxFuture, Middleware, Next},
    types::{Outcome, Request},
};

/// Span attribute holding the operation name.
pub const OPERATION_ATTRIBUTE: &str = "operation";

/// Span attribute holding the request id.
pub const REQUEST_ID_ATTRIBUTE: &str = "request.id";

/// Middleware that records a server span per request.
#[derive(Debug, Clone)]
pub struct TracingMiddleware {
    tracer: Tracer,
    propagator: TraceContextPropagator,
}

impl TracingMiddleware {
    /// Creates the stage recording spans on `tracer`.
    #[must_use]
    pub fn new(tracer: Tracer) -> Self {
        Self {
            tracer,
            propagator: TraceContextPropagator::new(),
        }
    }
}

struct HeaderExtractor<'a>(&'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(http::HeaderName::as_str).collect()
    }
}

/// `METHOD route`, or just the method for unrouted requests.
fn span_name(method: &http::Method, route: Option<&str>) -> String {
    match route {
        Some(route) => format!("{method} {route}"),
        None => method.to_string(),
    }
}

impl Middleware for TracingMiddleware {
    fn name(&self) -> &'static str {
        "tracing"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            let parent = self.propagator.extract(&HeaderExtractor(request.headers()));

            let mut attributes = vec![
                KeyValue::new(attribute::HTTP_REQUEST_METHOD, request.method().to_string()),
                KeyValue::new(attribute::URL_PATH, request.uri().path().to_string()),
                KeyValue::new(OPERATION_ATTRIBUTE, ctx.operation().to_string()),
                KeyValue::new(REQUEST_ID_ATTRIBUTE, ctx.request_id().to_string()),
            ];
            if let Some(route) = ctx.route() {
                attributes.push(KeyValue::new(attribute::HTTP_ROUTE, route.to_string()));
            }

            let mut span = self
                .tracer
                .span_builder(span_name(request.method(), ctx.route()))
                .with_kind(SpanKind::Server)
                .with_attributes(attributes)
                .start_with_context(&self.tracer, &parent);

            let outcome = next.run(ctx, request).await;

            match &outcome {
                Ok(response) => {
                    span.set_attribute(KeyValue::new(
                        attribute::HTTP_RESPONSE_STATUS_CODE,
                        i64::from(response.status().as_u16()),
                    ));
                    if let Some(classified) = ctx.get_extension::<ClassifiedError>() {
                        span.set_attribute(KeyValue::new(
                            attribute::ERROR_TYPE,
                            classified.kind.as_str(),
                        ));
                        span.set_status(Status::error(classified.public_message.clone()));
                    }
                }
                // Only reachable without a classification stage.
                Err(err) => {
                    let classified = classify(err);
                    span.set_attribute(KeyValue::new(
                        attribute::HTTP_RESPONSE_STATUS_CODE,
                        i64::from(classified.status.as_u16()),
                    ));
                    span.set_attribute(KeyValue::new(
                        attribute::ERROR_TYPE,
                        classified.kind.as_str(),
                    ));
                    span.set_status(Status::error(classified.public_message));
                }
            }
            span.end();

            outcome
        })
    }
}
