//! Request timeout middleware.
//!
//! Bounds every request by a deadline. The deadline is not enforced by
//! dropping the handler: when it elapses the request's cancellation token is
//! cancelled and the handler is still awaited, so it can observe the
//! cancellation and return `ServiceError::Cancelled` itself.

use std::time::Duration;

use crate::{
    context::MiddlewareContext,
    middleware::{BoxFuture, Middleware, Next},
    types::{Outcome, Request},
};

/// Default ceiling for a single request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Middleware that cancels the request token once the deadline elapses.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use harbor_middleware::stages::TimeoutMiddleware;
///
/// let timeout = TimeoutMiddleware::new(Duration::from_millis(500));
/// assert_eq!(timeout.timeout(), Duration::from_millis(500));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct TimeoutMiddleware {
    timeout: Duration,
}

impl TimeoutMiddleware {
    /// Creates the stage with the given ceiling.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Returns the configured ceiling.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for TimeoutMiddleware {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_TIMEOUT)
    }
}

impl Middleware for TimeoutMiddleware {
    fn name(&self) -> &'static str {
        "timeout"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            let token = ctx.request_context_mut().bound_deadline(self.timeout);
            let Some(deadline) = ctx.request_context().deadline() else {
                return next.run(ctx, request).await;
            };
            let request_id = ctx.request_id();

            let downstream = next.run(ctx, request);
            tokio::pin!(downstream);

            tokio::select! {
                outcome = &mut downstream => outcome,
                () = tokio::time::sleep_until(deadline) => {
                    tracing::debug!(
                        request_id = %request_id,
                        timeout_ms = harbor_core::millis(self.timeout),
                        "request deadline elapsed"
                    );
                    token.cancel();
                    downstream.await
                }
            }
        })
    }
}
