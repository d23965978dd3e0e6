//! Request routing and operation-name resolution.
//!
//! Routes are registered as `(method, template, name)`. Templates use
//! `{param}` segments. The name of every `(method, template)` pair is kept in
//! a map built at registration, so resolving the operation name of a matched
//! template is a single lookup.
//!
//! # Example
//!
//! ```rust
//! use harbor_server::Router;
//! use http::Method;
//!
//! let mut router = Router::new();
//! router.add_route(Method::GET, "/articles", "fetchArticles");
//! router.add_route(Method::GET, "/articles/{id}", "getArticle");
//!
//! let m = router.match_route(&Method::GET, "/articles/42").unwrap();
//! assert_eq!(m.operation(), "getArticle");
//! assert_eq!(m.template(), "/articles/{id}");
//! assert_eq!(m.param("id"), Some("42"));
//!
//! assert_eq!(router.operation_name(&Method::GET, "/articles"), "fetchArticles");
//! assert_eq!(router.operation_name(&Method::POST, "/articles"), "UNKNOWN");
//! ```

use std::collections::HashMap;

use harbor_core::{ServiceError, UNKNOWN_OPERATION};
use http::Method;

/// Path parameters extracted from a matched template.
///
/// The server stores them in the request extensions before calling the
/// handler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams(HashMap<String, String>);

impl PathParams {
    /// Returns a parameter by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Returns a parameter by name, or a constraint error naming it.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Constraint` if the parameter is absent.
    pub fn require(&self, name: &str) -> Result<&str, ServiceError> {
        self.get(name)
            .ok_or_else(|| ServiceError::constraint(format!("missing path parameter: {name}")))
    }

    /// Returns the number of parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the template had no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A matched route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    template: String,
    operation: String,
    params: PathParams,
}

impl RouteMatch {
    /// Returns the matched template.
    #[must_use]
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Returns the registered operation name.
    #[must_use]
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Returns the extracted path parameters.
    #[must_use]
    pub const fn params(&self) -> &PathParams {
        &self.params
    }

    /// Returns a specific path parameter by name.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    /// Splits the match into its template, operation name and parameters.
    #[must_use]
    pub fn into_parts(self) -> (String, String, PathParams) {
        (self.template, self.operation, self.params)
    }
}

/// A segment of a path template.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PathSegment {
    Literal(String),
    Param(String),
}

#[derive(Debug, Clone)]
struct Route {
    method: Method,
    template: String,
    segments: Vec<PathSegment>,
}

impl Route {
    fn new(method: Method, template: &str) -> Self {
        Self {
            method,
            template: template.to_string(),
            segments: parse_segments(template),
        }
    }

    fn match_path(&self, path: &str) -> Option<PathParams> {
        let mut actual = path.split('/').filter(|s| !s.is_empty());
        let mut params = HashMap::new();

        for pattern in &self.segments {
            let segment = actual.next()?;
            match pattern {
                PathSegment::Literal(expected) if expected != segment => return None,
                PathSegment::Literal(_) => {}
                PathSegment::Param(name) => {
                    params.insert(name.clone(), segment.to_string());
                }
            }
        }

        if actual.next().is_some() {
            return None;
        }
        Some(PathParams(params))
    }
}

fn parse_segments(template: &str) -> Vec<PathSegment> {
    template
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| match s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            Some(name) => PathSegment::Param(name.to_string()),
            None => PathSegment::Literal(s.to_string()),
        })
        .collect()
}

/// HTTP request router.
///
/// Routes are checked in registration order; the first match wins. `HEAD`
/// requests fall back to `GET` routes.
#[derive(Debug, Clone, Default)]
pub struct Router {
    routes: Vec<Route>,
    names: HashMap<(Method, String), String>,
}

impl Router {
    /// Creates a new empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a route.
    ///
    /// Registering the same method and template again renames the route.
    pub fn add_route(
        &mut self,
        method: Method,
        template: impl AsRef<str>,
        name: impl Into<String>,
    ) {
        let template = template.as_ref();
        let key = (method.clone(), template.to_string());

        if self.names.insert(key, name.into()).is_none() {
            self.routes.push(Route::new(method, template));
        }
    }

    /// Returns the number of registered routes.
    #[must_use]
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Matches a request to a route.
    ///
    /// # Example
    ///
    /// ```rust
    /// use harbor_server::Router;
    /// use http::Method;
    ///
    /// let mut router = Router::new();
    /// router.add_route(Method::GET, "/something/{duration}", "getSomething");
    ///
    /// assert!(router.match_route(&Method::GET, "/something/150").is_some());
    /// assert!(router.match_route(&Method::HEAD, "/something/150").is_some());
    /// assert!(router.match_route(&Method::POST, "/something/150").is_none());
    /// assert!(router.match_route(&Method::GET, "/something").is_none());
    /// ```
    #[must_use]
    pub fn match_route(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        self.match_exact(method, path).or_else(|| {
            if method == Method::HEAD {
                self.match_exact(&Method::GET, path)
            } else {
                None
            }
        })
    }

    fn match_exact(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        self.routes
            .iter()
            .filter(|route| route.method == *method)
            .find_map(|route| {
                let params = route.match_path(path)?;
                Some(RouteMatch {
                    template: route.template.clone(),
                    operation: self.operation_name(method, &route.template).to_string(),
                    params,
                })
            })
    }

    /// Returns the operation name of a registered template, or `UNKNOWN`.
    #[must_use]
    pub fn operation_name(&self, method: &Method, template: &str) -> &str {
        self.names
            .get(&(method.clone(), template.to_string()))
            .map_or(UNKNOWN_OPERATION, String::as_str)
    }

    /// Checks if an operation name is registered.
    #[must_use]
    pub fn has_operation(&self, name: &str) -> bool {
        self.names.values().any(|n| n == name)
    }

    /// Returns every route as `(method, template, name)` in registration order.
    pub fn routes(&self) -> impl Iterator<Item = (&Method, &str, &str)> {
        self.routes.iter().map(|route| {
            (
                &route.method,
                route.template.as_str(),
                self.operation_name(&route.method, &route.template),
            )
        })
    }
}
