//! Demo article routes.
//!
//! | Operation       | Route                        |
//! |-----------------|------------------------------|
//! | `fetchArticles` | `GET /articles`              |
//! | `getArticle`    | `GET /articles/{id}`         |
//! | `getSomething`  | `GET /something/{duration}`  |
//!
//! `getArticle` reads through a [`Store`]: a hit is served from the cache, a
//! miss loads the article and caches it with [`TtlClass::Short`], then
//! publishes [`ArticleLoaded`] on [`ARTICLES_TOPIC`].

use std::sync::Arc;
use std::time::Duration;

use harbor_core::events::{EventBody, Topic};
use harbor_core::{is_not_found, millis, RequestContext, ServiceError, Store, TtlClass};
use harbor_middleware::{Outcome, Request, Response, ResponseExt};
use harbor_server::{PathParams, ServerBuilder};
use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, warn};

/// Simulated latency of loading an article from primary storage.
pub const DEFAULT_LOAD_DELAY: Duration = Duration::from_millis(150);

/// Fallback sleep for `getSomething` when the duration is not a number.
const FALLBACK_SLEEP: Duration = Duration::from_millis(1);

/// Topic of article events.
pub const ARTICLES_TOPIC: Topic = Topic::new("articles");

/// An article was loaded from primary storage after a cache miss.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleLoaded {
    /// Article id.
    pub id: String,
    /// Whether the loaded article made it into the cache.
    pub cached: bool,
}

impl EventBody for ArticleLoaded {
    const NAME: &'static str = "article.loaded";
    const TOPIC: Topic = ARTICLES_TOPIC;
}

/// The article handlers and the cache they read through.
#[derive(Debug, Clone)]
pub struct Articles<S> {
    store: S,
    load_delay: Duration,
}

impl<S: Store> Articles<S> {
    /// Creates the handlers over `store`.
    #[must_use]
    pub const fn new(store: S) -> Self {
        Self {
            store,
            load_delay: DEFAULT_LOAD_DELAY,
        }
    }

    /// Sets how long a cache miss spends "loading" the article.
    #[must_use]
    pub const fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    /// Adds the article routes to `builder`.
    #[must_use]
    pub fn register(self, builder: ServerBuilder) -> ServerBuilder {
        let articles = Arc::new(self);
        builder
            .route(Method::GET, "/articles", "fetchArticles", fetch_articles)
            .route(Method::GET, "/articles/{id}", "getArticle", move |ctx, request| {
                let articles = Arc::clone(&articles);
                async move { articles.get_article(ctx, request).await }
            })
            .route(
                Method::GET,
                "/something/{duration}",
                "getSomething",
                get_something,
            )
    }

    async fn get_article(&self, ctx: RequestContext, request: Request) -> Outcome {
        let id = path_param(&request, "id")?;

        match self.store.get(&id).await {
            Ok(cached) => match serde_json::from_slice::<serde_json::Value>(&cached) {
                Ok(article) => return Ok(Response::json(StatusCode::OK, &article)),
                Err(err) => {
                    warn!(article_id = %id, error = %err, "cached article is not valid JSON");
                }
            },
            Err(err) if is_not_found(&err) => debug!(article_id = %id, "article cache miss"),
            Err(err) => warn!(
                article_id = %id,
                error = %format_args!("{err:#}"),
                "failed to read article from cache"
            ),
        }

        ctx.run_until_cancelled(tokio::time::sleep(self.load_delay))
            .await?;
        let article = json!({ "id": id });

        let cached = match self
            .store
            .set(&id, article.to_string().into_bytes(), TtlClass::Short)
            .await
        {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    article_id = %id,
                    error = %format_args!("{err:#}"),
                    "failed to cache article"
                );
                false
            }
        };
        ctx.publish(ArticleLoaded { id, cached });

        Ok(Response::json(StatusCode::OK, &article))
    }
}

async fn fetch_articles(_ctx: RequestContext, _request: Request) -> Outcome {
    Ok(Response::json(StatusCode::OK, &json!([])))
}

async fn get_something(ctx: RequestContext, request: Request) -> Outcome {
    let raw = path_param(&request, "duration")?;
    let sleep = match raw.parse::<u64>() {
        Ok(millis) => Duration::from_millis(millis),
        Err(err) => {
            error!(duration = %raw, error = %err, "invalid sleep duration, using fallback");
            FALLBACK_SLEEP
        }
    };

    debug!(sleep_ms = millis(sleep), "sleeping");
    ctx.run_until_cancelled(tokio::time::sleep(sleep)).await?;
    debug!("returning");

    Ok(Response::text(StatusCode::OK, "ok"))
}

fn path_param(request: &Request, name: &str) -> Result<String, ServiceError> {
    let params = request
        .extensions()
        .get::<PathParams>()
        .cloned()
        .unwrap_or_default();
    let value = params.require(name)?.to_owned();
    Ok(value)
}
