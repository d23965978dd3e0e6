//! Error classification middleware.
//!
//! The innermost stage. Handler errors arrive here as `Err`, are classified
//! once, logged once when the classification asks for it, and leave as a
//! shaped response. The [`ClassifiedError`] is stored in the context so outer
//! stages can tell the request failed.
//!
//! # Response Shape
//!
//! ```json
//! {"message": "not found"}
//! ```
//!
//! with `Content-Type: application/json`. `HEAD` requests get the status
//! only.

use bytes::Bytes;
use harbor_core::{ClassifiedError, Classifier};
use http::header::{HeaderValue, CONTENT_TYPE};
use http::Method;
use http_body_util::Full;

use crate::{
    context::MiddlewareContext,
    middleware::{BoxFuture, Middleware, Next},
    types::{Outcome, Request, Response},
};

/// Middleware that converts handler errors into responses.
#[derive(Debug, Clone, Default)]
pub struct ErrorClassificationMiddleware {
    classifier: Classifier,
}

impl ErrorClassificationMiddleware {
    /// Creates the stage with the given classifier.
    #[must_use]
    pub const fn new(classifier: Classifier) -> Self {
        Self { classifier }
    }

    /// Returns the classifier.
    #[must_use]
    pub const fn classifier(&self) -> &Classifier {
        &self.classifier
    }
}

impl Middleware for ErrorClassificationMiddleware {
    fn name(&self) -> &'static str {
        "error_classification"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            let is_head = request.method() == Method::HEAD;

            match next.run(ctx, request).await {
                Ok(response) => Ok(response),
                Err(err) => {
                    let classified = self.classifier.classify(&err);
                    Ok(respond_with_error(ctx, classified, is_head))
                }
            }
        })
    }
}

/// Logs `classified` if required, records it in the context and builds the
/// response.
pub(crate) fn respond_with_error(
    ctx: &mut MiddlewareContext,
    classified: ClassifiedError,
    is_head: bool,
) -> Response {
    if classified.should_log {
        log_classified(ctx, &classified);
    }
    let response = error_response(&classified, is_head);
    ctx.set_extension(classified);
    response
}

fn log_classified(ctx: &MiddlewareContext, classified: &ClassifiedError) {
    let meta = ctx.meta();
    tracing::error!(
        request_id = %ctx.request_id(),
        operation = %ctx.operation(),
        method = %meta.method,
        uri = %meta.uri,
        headers = %meta.flatten_headers(),
        status = classified.status.as_u16(),
        kind = %classified.kind,
        error = %classified.cause,
        frames = ?classified.frames,
        "request failed"
    );
}

/// Builds the response for a classified error.
///
/// # Example
///
/// ```
/// use harbor_core::{classify, ServiceError};
/// use harbor_middleware::stages::classify::error_response;
///
/// let classified = classify(&ServiceError::NotFound.into());
/// let response = error_response(&classified, false);
/// assert_eq!(response.status(), 404);
/// assert_eq!(response.headers()["content-type"], "application/json");
/// ```
#[must_use]
pub fn error_response(classified: &ClassifiedError, is_head: bool) -> Response {
    let body = if is_head {
        Bytes::new()
    } else {
        Bytes::from(classified.body())
    };

    let mut response = http::Response::new(Full::new(body));
    *response.status_mut() = classified.status;
    if !is_head {
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    response
}
