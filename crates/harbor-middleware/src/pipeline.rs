//! Fixed-order middleware pipeline.
//!
//! ## Pipeline Stages
//!
//! 1. **Tracing** - Record an OpenTelemetry server span
//! 2. **Timeout** - Bound the request by a deadline on its cancellation token
//! 3. **Metrics** - Record the request metric family for successful requests
//! 4. **Error Classification** - Turn handler errors into shaped responses
//!
//! Stages may be left out, but those that are present always run in this
//! order regardless of the order they were registered in.
//!
//! Errors that escape every stage (for example because no classification
//! stage is registered) are classified at the pipeline boundary with the
//! pipeline's [`Classifier`], so [`Pipeline::process`] always produces a
//! response. Every finished request then gets one `request info` log line
//! with its status and latency.

use std::collections::BTreeMap;
use std::sync::Arc;

use harbor_core::{Classifier, RequestMeta};
use http::Method;

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::stages::classify::{respond_with_error, ErrorClassificationMiddleware};
use crate::stages::metrics::MetricsMiddleware;
use crate::stages::timeout::TimeoutMiddleware;
use crate::stages::tracing::TracingMiddleware;
use crate::types::{Outcome, Request, Response};

/// A type-erased middleware that can be stored in a vector.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// The fixed-order middleware pipeline.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use harbor_core::Classifier;
/// use harbor_middleware::pipeline::{Pipeline, Stage};
/// use harbor_middleware::stages::{ErrorClassificationMiddleware, TimeoutMiddleware};
///
/// let pipeline = Pipeline::builder()
///     .error_classification(ErrorClassificationMiddleware::new(Classifier::new()))
///     .timeout(TimeoutMiddleware::new(Duration::from_secs(2)))
///     .build();
///
/// assert_eq!(pipeline.stages(), vec![Stage::Timeout, Stage::ErrorClassification]);
/// ```
pub struct Pipeline {
    /// Registered stages in execution order
    stages: Vec<(Stage, BoxedMiddleware)>,

    /// Classifier for errors that escape every stage
    classifier: Classifier,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .field("classifier", &self.classifier)
            .finish()
    }
}

impl Pipeline {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Processes a request through the entire pipeline.
    ///
    /// Records the request metadata in the context, runs every stage and the
    /// handler, classifies any error that is still unhandled and logs the
    /// finished request.
    pub async fn process<H>(
        &self,
        mut ctx: MiddlewareContext,
        request: Request,
        handler: H,
    ) -> Response
    where
        H: FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, Outcome> + Send + 'static,
    {
        ctx.request_context_mut()
            .set_meta(RequestMeta::from_request(&request));
        let is_head = request.method() == Method::HEAD;

        let next = self.build_chain(handler);
        let response = match next.run(&mut ctx, request).await {
            Ok(response) => response,
            Err(err) => {
                let classified = self.classifier.classify(&err);
                respond_with_error(&mut ctx, classified, is_head)
            }
        };

        log_request(&ctx, &response);
        response
    }

    fn build_chain<'a, H>(&'a self, handler: H) -> Next<'a>
    where
        H: FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, Outcome> + Send + 'a,
    {
        let mut next = Next::handler(handler);
        for (_, middleware) in self.stages.iter().rev() {
            next = Next::new(middleware.as_ref(), next);
        }
        next
    }

    /// Returns the registered stages in execution order.
    #[must_use]
    pub fn stages(&self) -> Vec<Stage> {
        self.stages.iter().map(|(stage, _)| *stage).collect()
    }

    /// Returns the names of the registered middleware in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|(_, mw)| mw.name()).collect()
    }

    /// Returns the number of registered stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Returns the boundary classifier.
    #[must_use]
    pub const fn classifier(&self) -> &Classifier {
        &self.classifier
    }
}

/// Emits the access log line of a finished request.
fn log_request(ctx: &MiddlewareContext, response: &Response) {
    let meta = ctx.meta();
    tracing::info!(
        request_id = %ctx.request_id(),
        method = %meta.method,
        uri = %meta.uri,
        route = %ctx.route().unwrap_or_default(),
        operation = %ctx.operation(),
        status = response.status().as_u16(),
        latency_ms = harbor_core::millis(ctx.elapsed()),
        "request info"
    );
}

/// Builder for constructing a [`Pipeline`].
///
/// Each [`Stage`] holds at most one middleware; registering a stage twice
/// replaces the earlier middleware.
pub struct PipelineBuilder {
    stages: BTreeMap<Stage, BoxedMiddleware>,
    classifier: Classifier,
}

impl PipelineBuilder {
    /// Creates a builder with no stages and the default classifier.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stages: BTreeMap::new(),
            classifier: Classifier::new(),
        }
    }

    /// Registers `middleware` for `stage`.
    #[must_use]
    pub fn stage<M: Middleware>(mut self, stage: Stage, middleware: M) -> Self {
        self.stages.insert(stage, Arc::new(middleware));
        self
    }

    /// Registers the span stage.
    #[must_use]
    pub fn tracing(self, middleware: TracingMiddleware) -> Self {
        self.stage(Stage::Tracing, middleware)
    }

    /// Registers the timeout stage.
    #[must_use]
    pub fn timeout(self, middleware: TimeoutMiddleware) -> Self {
        self.stage(Stage::Timeout, middleware)
    }

    /// Registers the metrics stage.
    #[must_use]
    pub fn metrics(self, middleware: MetricsMiddleware) -> Self {
        self.stage(Stage::Metrics, middleware)
    }

    /// Registers the classification stage and uses its classifier at the
    /// pipeline boundary as well.
    #[must_use]
    pub fn error_classification(mut self, middleware: ErrorClassificationMiddleware) -> Self {
        self.classifier = middleware.classifier().clone();
        self.stage(Stage::ErrorClassification, middleware)
    }

    /// Sets the classifier used at the pipeline boundary.
    #[must_use]
    pub fn classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Builds the pipeline.
    #[must_use]
    pub fn build(self) -> Pipeline {
        Pipeline {
            stages: self.stages.into_iter().collect(),
            classifier: self.classifier,
        }
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Middleware stage marker for ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Stage {
    /// Stage 1: Request span
    Tracing = 1,
    /// Stage 2: Request deadline
    Timeout = 2,
    /// Stage 3: Request metrics
    Metrics = 3,
    /// Stage 4: Error classification
    ErrorClassification = 4,
}

impl Stage {
    /// Returns the stage name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Tracing => "tracing",
            Self::Timeout => "timeout",
            Self::Metrics => "metrics",
            Self::ErrorClassification => "error_classification",
        }
    }

    /// Returns all stages in order.
    #[must_use]
    pub const fn all() -> [Stage; 4] {
        [
            Self::Tracing,
            Self::Timeout,
            Self::Metrics,
            Self::ErrorClassification,
        ]
    }
}
