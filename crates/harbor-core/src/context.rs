//! Request context types.
//!
//! The [`RequestContext`] carries per-request state through the middleware
//! pipeline and into handlers: the request id, the cancellation token bounded
//! by the request deadline, the resolved operation name and the request
//! metadata used to enrich error logs.

use std::future::Future;
use std::time::Duration;

use http::{HeaderMap, Method, Uri, Version};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

use crate::error::{Cancellation, ServiceError};
use crate::events::{EventBody, Publishers};

/// Operation name used when no route matched.
pub const UNKNOWN_OPERATION: &str = "UNKNOWN";

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
///
/// Used for `*_ms` log fields.
///
/// ```
/// use std::time::Duration;
/// use harbor_core::millis;
///
/// assert_eq!(millis(Duration::from_micros(2_500)), 2);
/// assert_eq!(millis(Duration::MAX), u64::MAX);
/// ```
#[must_use]
pub fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// A unique identifier for each request, using UUID v7.
///
/// UUID v7 is time-ordered, which keeps log lines of one request easy to
/// correlate and sort.
///
/// # Example
///
/// ```
/// use harbor_core::RequestId;
///
/// let id = RequestId::new();
/// assert_eq!(id.to_string().len(), 36);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new unique request ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `RequestId` from an existing UUID, e.g. one parsed from a header.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RequestId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Request line and headers, kept for log enrichment.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    /// HTTP method.
    pub method: Method,
    /// Request URI.
    pub uri: Uri,
    /// HTTP version.
    pub version: Version,
    /// Request headers.
    pub headers: HeaderMap,
}

impl RequestMeta {
    /// Captures the metadata of a request.
    #[must_use]
    pub fn from_request<B>(request: &http::Request<B>) -> Self {
        Self {
            method: request.method().clone(),
            uri: request.uri().clone(),
            version: request.version(),
            headers: request.headers().clone(),
        }
    }

    /// Flattens the headers into one line: `name:v1,v2 | name2:v`.
    ///
    /// Values that are not valid UTF-8 are rendered lossily.
    #[must_use]
    pub fn flatten_headers(&self) -> String {
        self.headers
            .keys()
            .map(|name| {
                let values = self
                    .headers
                    .get_all(name)
                    .iter()
                    .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
                    .collect::<Vec<_>>()
                    .join(",");
                format!("{}:{}", name.as_str(), values)
            })
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

/// Per-request context that flows through the middleware pipeline.
///
/// # Example
///
/// ```
/// use harbor_core::RequestContext;
///
/// let ctx = RequestContext::new().with_operation("getArticle");
/// assert_eq!(ctx.operation(), "getArticle");
/// assert!(!ctx.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique identifier for this request.
    request_id: RequestId,

    /// Cancelled when the client goes away or the deadline elapses.
    token: CancellationToken,

    /// Point in time after which cancellation means the deadline elapsed.
    deadline: Option<Instant>,

    /// Registered name of the matched route.
    operation: Option<String>,

    /// Template of the matched route (e.g. `/articles/{id}`).
    route: Option<String>,

    /// Request line and headers.
    meta: RequestMeta,

    /// When the request started processing.
    started_at: Instant,

    /// Event publishers by topic.
    publishers: Publishers,
}

impl RequestContext {
    /// Creates a new request context with a fresh request ID and token.
    #[must_use]
    pub fn new() -> Self {
        Self::with_request_id(RequestId::new())
    }

    /// Creates a new request context with the specified request ID.
    #[must_use]
    pub fn with_request_id(request_id: RequestId) -> Self {
        Self {
            request_id,
            token: CancellationToken::new(),
            deadline: None,
            operation: None,
            route: None,
            meta: RequestMeta::default(),
            started_at: Instant::now(),
            publishers: Publishers::default(),
        }
    }

    /// Returns the request ID.
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Returns the request metadata.
    #[must_use]
    pub const fn meta(&self) -> &RequestMeta {
        &self.meta
    }

    /// Sets the request metadata.
    pub fn set_meta(&mut self, meta: RequestMeta) {
        self.meta = meta;
    }

    /// Returns a new context with the specified request metadata.
    #[must_use]
    pub fn with_meta(mut self, meta: RequestMeta) -> Self {
        self.meta = meta;
        self
    }

    /// Returns the operation name, or [`UNKNOWN_OPERATION`] if no route matched.
    #[must_use]
    pub fn operation(&self) -> &str {
        self.operation.as_deref().unwrap_or(UNKNOWN_OPERATION)
    }

    /// Sets the operation name.
    pub fn set_operation(&mut self, operation: impl Into<String>) {
        self.operation = Some(operation.into());
    }

    /// Returns a new context with the specified operation name.
    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// Returns the matched route template, if any.
    #[must_use]
    pub fn route(&self) -> Option<&str> {
        self.route.as_deref()
    }

    /// Sets the matched route template.
    pub fn set_route(&mut self, route: impl Into<String>) {
        self.route = Some(route.into());
    }

    /// Returns a new context with the specified route template.
    #[must_use]
    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    /// Returns the request's cancellation token.
    #[must_use]
    pub const fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Returns a new context whose token is the given one.
    ///
    /// The server uses this to tie the request to its connection.
    #[must_use]
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Narrows the request to `timeout` from now.
    ///
    /// The current token is replaced by a child token so cancelling it does
    /// not affect the parent. The returned token must be cancelled by the
    /// caller once the deadline elapses.
    pub fn bound_deadline(&mut self, timeout: Duration) -> CancellationToken {
        let deadline = Instant::now() + timeout;
        self.deadline = Some(self.deadline.map_or(deadline, |current| current.min(deadline)));
        self.token = self.token.child_token();
        self.token.clone()
    }

    /// Returns the request deadline, if one was set.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns `true` once the request has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes when the request is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// Returns why the request was cancelled.
    ///
    /// Cancellation at or after the deadline counts as the deadline elapsing;
    /// anything earlier means the client went away.
    #[must_use]
    pub fn cancellation(&self) -> Cancellation {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Cancellation::DeadlineExceeded,
            _ => Cancellation::Canceled,
        }
    }

    /// Runs `future` unless the request is cancelled first.
    ///
    /// # Example
    ///
    /// ```
    /// use harbor_core::{RequestContext, ServiceError};
    ///
    /// # tokio_test::block_on(async {
    /// let ctx = RequestContext::new();
    /// ctx.cancellation_token().cancel();
    ///
    /// let result = ctx.run_until_cancelled(async { 42 }).await;
    /// assert_eq!(result, Err(ServiceError::canceled()));
    /// # });
    /// ```
    pub async fn run_until_cancelled<F>(&self, future: F) -> Result<F::Output, ServiceError>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            () = self.token.cancelled() => Err(ServiceError::Cancelled(self.cancellation())),
            output = future => Ok(output),
        }
    }

    /// Returns a new context publishing events through `publishers`.
    #[must_use]
    pub fn with_publishers(mut self, publishers: Publishers) -> Self {
        self.publishers = publishers;
        self
    }

    /// Returns the event publishers.
    #[must_use]
    pub const fn publishers(&self) -> &Publishers {
        &self.publishers
    }

    /// Publishes `body` on its topic. Dropped if the topic has no publisher.
    pub fn publish<B: EventBody>(&self, body: B) {
        self.publishers.publish(body);
    }

    /// Returns the instant the request started processing.
    #[must_use]
    pub const fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Returns the elapsed time since the request started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
