//! Core middleware trait and types.
//!
//! This module defines the [`Middleware`] trait that every pipeline stage
//! implements. A stage receives the context, the request and a [`Next`] to
//! call downstream, and returns an [`Outcome`]: either a response or the
//! error that is still waiting to be classified.
//!
//! # Example
//!
//! ```
//! use harbor_middleware::{BoxFuture, Middleware, Next, Outcome, Request};
//! use harbor_middleware::context::MiddlewareContext;
//!
//! struct Annotate;
//!
//! impl Middleware for Annotate {
//!     fn name(&self) -> &'static str {
//!         "annotate"
//!     }
//!
//!     fn process<'a>(
//!         &'a self,
//!         ctx: &'a mut MiddlewareContext,
//!         request: Request,
//!         next: Next<'a>,
//!     ) -> BoxFuture<'a, Outcome> {
//!         Box::pin(async move {
//!             use anyhow::Context;
//!             let operation = ctx.operation().to_string();
//!             next.run(ctx, request).await.with_context(|| format!("serving {operation}"))
//!         })
//!     }
//! }
//! ```

use std::future::Future;
use std::pin::Pin;

use crate::context::MiddlewareContext;
use crate::types::{Outcome, Request};

/// A boxed future that returns a value.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The terminal handler of a chain.
///
/// Handlers read what they need from the context synchronously and return a
/// `'static` future.
pub type HandlerFn<'a> =
    Box<dyn FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, Outcome> + Send + 'a>;

/// The core middleware trait.
///
/// # Invariants
///
/// - Middleware MUST call `next.run()` at most once
/// - Middleware MUST NOT log an error it passes on as `Err`; the
///   classification stage logs each error exactly once
pub trait Middleware: Send + Sync + 'static {
    /// Returns the unique name of this middleware stage.
    fn name(&self) -> &'static str;

    /// Process the request through this middleware.
    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Outcome>;
}

/// Callback to invoke the next middleware in the chain.
///
/// Consumed by [`Next::run`], so it can only be called once.
pub struct Next<'a> {
    inner: NextInner<'a>,
}

enum NextInner<'a> {
    /// More middleware to process
    Chain {
        middleware: &'a dyn Middleware,
        next: Box<Next<'a>>,
    },
    /// End of chain
    Handler(HandlerFn<'a>),
}

impl<'a> Next<'a> {
    /// Creates a `Next` that invokes `middleware` and then `next`.
    pub(crate) fn new(middleware: &'a dyn Middleware, next: Next<'a>) -> Self {
        Self {
            inner: NextInner::Chain {
                middleware,
                next: Box::new(next),
            },
        }
    }

    /// Creates a terminal `Next` that invokes the handler.
    pub fn handler<F>(f: F) -> Self
    where
        F: FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, Outcome> + Send + 'a,
    {
        Self {
            inner: NextInner::Handler(Box::new(f)),
        }
    }

    /// Invokes the next middleware or handler in the chain.
    pub async fn run(self, ctx: &mut MiddlewareContext, request: Request) -> Outcome {
        match self.inner {
            NextInner::Chain { middleware, next } => middleware.process(ctx, request, *next).await,
            NextInner::Handler(handler) => handler(ctx, request).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Response, ResponseExt};
    use bytes::Bytes;
    use http::StatusCode;
    use http_body_util::Full;

    struct VisitMiddleware {
        name: &'static str,
    }

    #[derive(Debug, Default)]
    struct Visits(Vec<&'static str>);

    impl Middleware for VisitMiddleware {
        fn name(&self) -> &'static str {
            self.name
        }

        fn process<'a>(
            &'a self,
            ctx: &'a mut MiddlewareContext,
            request: Request,
            next: Next<'a>,
        ) -> BoxFuture<'a, Outcome> {
            Box::pin(async move {
                let mut visits = ctx.remove_extension::<Visits>().unwrap_or_default();
                visits.0.push(self.name);
                ctx.set_extension(visits);
                next.run(ctx, request).await
            })
        }
    }

    fn request() -> Request {
        http::Request::builder()
            .uri("/test")
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    fn ok_handler() -> Next<'static> {
        Next::handler(|_ctx, _req| Box::pin(async { Ok(Response::text(StatusCode::OK, "OK")) }))
    }

    #[tokio::test]
    async fn test_next_handler() {
        let mut ctx = MiddlewareContext::new();
        let response = ok_handler().run(&mut ctx, request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_handler_error_passes_through() {
        let mut ctx = MiddlewareContext::new();
        let next = Next::handler(|_ctx, _req| Box::pin(async { Err(anyhow::anyhow!("boom")) }));
        let err = next.run(&mut ctx, request()).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[tokio::test]
    async fn test_middleware_chain_order() {
        let first = VisitMiddleware { name: "first" };
        let second = VisitMiddleware { name: "second" };

        let mut ctx = MiddlewareContext::new();
        let chain = Next::new(&first, Next::new(&second, ok_handler()));

        let response = chain.run(&mut ctx, request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(ctx.get_extension::<Visits>().unwrap().0, vec!["first", "second"]);
    }
}
