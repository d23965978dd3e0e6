//! Built-in endpoints.
//!
//! | Path | Response |
//! |------|----------|
//! | `GET /ping` | `pong` |
//! | `GET /_version` | build identifier |
//! | `GET /metrics` | Prometheus text exposition (when metrics are enabled) |
//! | `GET /debug/vars` | runtime information as JSON (debug mode only) |
//! | `GET /debug/routes` | registered routes as JSON (debug mode only) |
//!
//! Built-in endpoints go through the same middleware pipeline as application
//! routes; the default metrics skip list keeps them out of request metrics.

use std::time::Instant;

use harbor_core::ServiceError;
use harbor_middleware::{Outcome, Response, ResponseExt};
use harbor_telemetry::MetricsRegistry;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Method, StatusCode};
use serde::Serialize;

use crate::router::Router;
use crate::shutdown::ConnectionTracker;

/// Liveness check path.
pub const PING_PATH: &str = "/ping";

/// Build identifier path.
pub const VERSION_PATH: &str = "/_version";

/// Default metrics exposition path.
pub const METRICS_PATH: &str = "/metrics";

/// Root of the debug subtree.
pub const DEBUG_PREFIX: &str = "/debug";

/// Returns the build identifier: the git commit baked in at build time via
/// `HARBOR_GIT_COMMIT`, or the crate version.
#[must_use]
pub fn build_version() -> &'static str {
    match option_env!("HARBOR_GIT_COMMIT") {
        Some(commit) if !commit.is_empty() => commit,
        _ => env!("CARGO_PKG_VERSION"),
    }
}

/// A resolved built-in endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `/ping`
    Ping,
    /// `/_version`
    Version,
    /// The metrics path
    Metrics,
    /// Anything under `/debug`, with the remainder of the path.
    Debug(String),
}

impl Endpoint {
    /// Returns the operation name used in logs and metrics.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Version => "version",
            Self::Metrics => "metrics",
            Self::Debug(_) => "debug",
        }
    }

    /// Returns the path template used as the route label.
    #[must_use]
    pub fn template(&self, metrics_path: &str) -> String {
        match self {
            Self::Ping => PING_PATH.to_string(),
            Self::Version => VERSION_PATH.to_string(),
            Self::Metrics => metrics_path.to_string(),
            Self::Debug(_) => format!("{DEBUG_PREFIX}/*"),
        }
    }
}

/// What `/debug/vars` reports.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DebugVars {
    /// Service name.
    pub service: String,
    /// Build identifier.
    pub version: String,
    /// Seconds since the server was built.
    pub uptime_seconds: f64,
    /// Open connections.
    pub active_connections: usize,
    /// Tokio worker threads.
    pub worker_threads: usize,
    /// Registered application routes.
    pub routes: usize,
}

#[derive(Debug, Serialize)]
struct RouteInfo<'a> {
    method: &'a str,
    path: &'a str,
    operation: &'a str,
}

/// The set of built-in endpoints a server exposes.
#[derive(Debug, Clone)]
pub struct Endpoints {
    service: String,
    version: String,
    metrics: Option<MetricsRegistry>,
    metrics_path: String,
    debug: bool,
    started_at: Instant,
}

impl Endpoints {
    /// Creates the endpoint set for a service.
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            version: build_version().to_string(),
            metrics: None,
            metrics_path: METRICS_PATH.to_string(),
            debug: false,
            started_at: Instant::now(),
        }
    }

    /// Overrides the version reported by `/_version`.
    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Serves `registry` on `path`.
    #[must_use]
    pub fn metrics(mut self, registry: MetricsRegistry, path: impl Into<String>) -> Self {
        self.metrics = Some(registry);
        self.metrics_path = path.into();
        self
    }

    /// Enables or disables the `/debug` subtree.
    #[must_use]
    pub const fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    /// Returns the metrics path.
    #[must_use]
    pub fn metrics_path(&self) -> &str {
        &self.metrics_path
    }

    /// Resolves a request to a built-in endpoint.
    ///
    /// Only `GET` and `HEAD` are served. Disabled endpoints do not resolve.
    #[must_use]
    pub fn resolve(&self, method: &Method, path: &str) -> Option<Endpoint> {
        if method != Method::GET && method != Method::HEAD {
            return None;
        }

        match path {
            PING_PATH => Some(Endpoint::Ping),
            VERSION_PATH => Some(Endpoint::Version),
            p if p == self.metrics_path && self.metrics.is_some() => Some(Endpoint::Metrics),
            p if self.debug => {
                let rest = p.strip_prefix(DEBUG_PREFIX)?;
                (rest.is_empty() || rest.starts_with('/'))
                    .then(|| Endpoint::Debug(rest.to_string()))
            }
            _ => None,
        }
    }

    /// Serves a resolved endpoint.
    pub(crate) fn serve(
        &self,
        endpoint: &Endpoint,
        router: &Router,
        tracker: &ConnectionTracker,
    ) -> Outcome {
        match endpoint {
            Endpoint::Ping => Ok(Response::text(StatusCode::OK, "pong")),
            Endpoint::Version => Ok(Response::text(StatusCode::OK, self.version.clone())),
            Endpoint::Metrics => {
                let body = self.metrics.as_ref().map(MetricsRegistry::render).unwrap_or_default();
                let mut response = Response::text(StatusCode::OK, body);
                response.headers_mut().insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
                );
                Ok(response)
            }
            Endpoint::Debug(rest) => match rest.as_str() {
                "/vars" => Ok(Response::json(StatusCode::OK, &self.vars(router, tracker))),
                "/routes" => Ok(Response::json(StatusCode::OK, &routes(router))),
                _ => Err(ServiceError::not_found().into()),
            },
        }
    }

    fn vars(&self, router: &Router, tracker: &ConnectionTracker) -> serde_json::Value {
        let vars = DebugVars {
            service: self.service.clone(),
            version: self.version.clone(),
            uptime_seconds: self.started_at.elapsed().as_secs_f64(),
            active_connections: tracker.active_connections(),
            worker_threads: tokio::runtime::Handle::current().metrics().num_workers(),
            routes: router.route_count(),
        };
        serde_json::to_value(vars).unwrap_or_default()
    }
}

fn routes(router: &Router) -> serde_json::Value {
    let routes: Vec<RouteInfo<'_>> = router
        .routes()
        .map(|(method, path, operation)| RouteInfo {
            method: method.as_str(),
            path,
            operation,
        })
        .collect();
    serde_json::to_value(routes).unwrap_or_default()
}
