//! Wires configuration, telemetry, the store and the HTTP server together.

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use futures_util::FutureExt;
use harbor_config::HarborConfig;
use harbor_core::events::{EventBus, SystemEvent};
use harbor_core::{Classifier, MemoryStore};
use harbor_server::{
    build_version, CoordinatorState, Server, ShutdownCoordinator, ShutdownReport, ShutdownSignal,
};
use harbor_telemetry::Telemetry;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::articles::{Articles, ARTICLES_TOPIC};

/// Tracer name of the request spans.
const TRACER_NAME: &str = "harbor";

/// Creates the in-process event bus. Every event is logged at debug level.
#[must_use]
pub fn build_events() -> EventBus {
    let events = EventBus::new();
    events.subscribe(|event: &SystemEvent| {
        debug!(
            event = event.name(),
            body = %event.raw_body(),
            occurred_at = %event.occurred_at(),
            "system event"
        );
    });
    events
}

/// Builds the HTTP server described by `config`, with the article routes
/// reading through `store` and publishing to `events`.
///
/// Request metrics and spans go to `telemetry` when it has them enabled.
#[must_use]
pub fn build_server(
    config: &HarborConfig,
    telemetry: &Telemetry,
    store: MemoryStore,
    events: EventBus,
) -> Server {
    let version = config
        .service
        .version
        .clone()
        .unwrap_or_else(|| build_version().to_string());
    let classifier =
        Classifier::new().expose_internal_errors(config.server.expose_internal_errors);

    let mut builder = Server::builder()
        .http_addr(&config.server.http_addr)
        .request_timeout(config.server.request_timeout())
        .drain_timeout(config.shutdown.deadline())
        .debug(config.debug)
        .classifier(classifier)
        .service_name(&config.service.name)
        .version(version)
        .metrics_path(&config.metrics.path)
        .skip_paths(config.metrics.skip_paths.iter().cloned())
        .publisher(ARTICLES_TOPIC, events);

    if let Some(registry) = telemetry.metrics() {
        builder = builder.metrics(registry.clone());
    }
    if let Some(tracer) = telemetry.tracer(TRACER_NAME) {
        builder = builder.tracer(tracer);
    }

    Articles::new(store).register(builder).build()
}

/// Creates the article cache described by the `cache` section.
#[must_use]
pub fn build_store(config: &HarborConfig) -> MemoryStore {
    MemoryStore::new()
        .with_prefix(config.cache.key_prefix.clone())
        .with_expiry(config.cache.expiry())
}

/// Runs the service until `signal` resolves, then shuts it down.
///
/// The HTTP server, the store and telemetry are registered with a
/// [`ShutdownCoordinator`] before serving starts. Once `signal` resolves the
/// coordinator stops the server, closes the store and tears down telemetry
/// concurrently, bounded by the configured deadline.
///
/// # Errors
///
/// Returns an error if the HTTP listener cannot be bound, or if the server
/// stops on its own before `signal` resolves. Errors during shutdown are
/// reported per task in the returned [`ShutdownReport`].
pub async fn run<S>(
    config: HarborConfig,
    telemetry: Telemetry,
    signal: S,
) -> anyhow::Result<ShutdownReport>
where
    S: Future<Output = ()>,
{
    let store = build_store(&config);
    let server = build_server(&config, &telemetry, store.clone(), build_events());

    let listener = server
        .bind()
        .await
        .context("failed to start HTTP server")?;
    let addr = listener.local_addr().context("failed to read listener address")?;
    info!(
        addr = %addr,
        routes = server.router().route_count(),
        "harbor started"
    );

    let stop = ShutdownSignal::new();
    let serving = tokio::spawn(server.serve(listener, stop.clone()))
        .map(|joined| match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(Arc::new(anyhow::Error::new(err).context("HTTP server failed"))),
            Err(err) => Err(Arc::new(
                anyhow::Error::new(err).context("HTTP server task failed"),
            )),
        })
        .shared();

    let mut coordinator = ShutdownCoordinator::new(config.shutdown.deadline());
    let http = serving.clone();
    coordinator
        .register_task("http", move || async move {
            stop.trigger();
            http.await.map_err(|err| anyhow::anyhow!("{err:#}"))
        })
        .register_resource("store", Some(store))
        .register_resource("telemetry", Some(telemetry));
    let state = coordinator.subscribe();

    tokio::select! {
        report = coordinator.run(signal) => Ok(report),
        stopped = stopped_early(serving, state) => {
            stopped.map_err(|err| anyhow::anyhow!("{err:#}"))?;
            anyhow::bail!("HTTP server stopped before shutdown was requested")
        }
    }
}

/// Resolves with the server's result if it stops while the coordinator is
/// still running. A server stopped by the coordinator never resolves it.
async fn stopped_early<F: Future>(
    serving: F,
    state: watch::Receiver<CoordinatorState>,
) -> F::Output {
    let stopped = serving.await;
    if *state.borrow() == CoordinatorState::Running {
        return stopped;
    }
    std::future::pending().await
}
