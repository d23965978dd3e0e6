//! Graceful shutdown coordination.
//!
//! The [`ShutdownCoordinator`] owns a set of named teardown tasks (stopping
//! the HTTP listener, closing stores, flushing telemetry). On shutdown it
//! runs all of them concurrently, waits until they finish or the deadline
//! elapses, and returns a [`ShutdownReport`] with one [`TaskOutcome`] per
//! task.
//!
//! ```text
//! Running ──signal──▶ Draining ──all done / deadline──▶ Terminated
//! ```
//!
//! Each task runs at most once: registration takes an `FnOnce` and
//! [`ShutdownCoordinator::shutdown`] consumes the coordinator. A task that
//! fails or panics is recorded as [`TaskOutcome::Failed`] and does not
//! affect its siblings.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use harbor_server::{ShutdownCoordinator, TaskOutcome};
//!
//! # tokio_test::block_on(async {
//! let mut coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
//! coordinator.register_task("http", || async { Ok(()) });
//! coordinator.register_task("store", || async { Err(anyhow::anyhow!("connection reset")) });
//!
//! let report = coordinator.shutdown(Duration::from_secs(1)).await;
//! assert_eq!(report.outcome("http"), Some(&TaskOutcome::Ok));
//! assert!(matches!(report.outcome("store"), Some(TaskOutcome::Failed(_))));
//! # });
//! ```

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use harbor_core::Close;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Default time allowed for all shutdown tasks together.
pub const DEFAULT_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

/// Lifecycle state of a [`ShutdownCoordinator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoordinatorState {
    /// Tasks are registered; shutdown has not started.
    Running,
    /// Shutdown tasks are executing.
    Draining,
    /// Every task finished or was abandoned.
    Terminated,
}

/// How a single shutdown task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The task completed successfully.
    Ok,
    /// The task returned an error or panicked.
    Failed(String),
    /// The task was registered without a resource.
    Skipped,
    /// The task was still running at the deadline and was aborted.
    TimedOut,
}

impl TaskOutcome {
    /// Returns `true` for outcomes that do not indicate a problem.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        matches!(self, Self::Ok | Self::Skipped)
    }
}

impl std::fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => f.write_str("ok"),
            Self::Failed(detail) => write!(f, "failed: {detail}"),
            Self::Skipped => f.write_str("skipped"),
            Self::TimedOut => f.write_str("timed out"),
        }
    }
}

/// Per-task results of a shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    outcomes: BTreeMap<String, TaskOutcome>,
    elapsed: Duration,
}

impl ShutdownReport {
    /// Returns the outcome of the named task.
    #[must_use]
    pub fn outcome(&self, name: &str) -> Option<&TaskOutcome> {
        self.outcomes.get(name)
    }

    /// Returns every outcome keyed by task name.
    #[must_use]
    pub const fn outcomes(&self) -> &BTreeMap<String, TaskOutcome> {
        &self.outcomes
    }

    /// Returns the wall-clock time the shutdown took.
    #[must_use]
    pub const fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Returns `true` if no task failed or timed out.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.outcomes.values().all(TaskOutcome::is_clean)
    }
}

type ShutdownAction = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

enum ShutdownTask {
    Action(ShutdownAction),
    Absent,
}

/// Runs named teardown tasks concurrently within a deadline.
pub struct ShutdownCoordinator {
    tasks: BTreeMap<String, ShutdownTask>,
    deadline: Duration,
    state: watch::Sender<CoordinatorState>,
    deadline_token: CancellationToken,
}

impl std::fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("tasks", &self.task_names())
            .field("deadline", &self.deadline)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_SHUTDOWN_DEADLINE)
    }
}

impl ShutdownCoordinator {
    /// Creates a coordinator whose [`run`](Self::run) uses `deadline`.
    #[must_use]
    pub fn new(deadline: Duration) -> Self {
        let (state, _) = watch::channel(CoordinatorState::Running);
        Self {
            tasks: BTreeMap::new(),
            deadline,
            state,
            deadline_token: CancellationToken::new(),
        }
    }

    /// Returns the deadline used by [`run`](Self::run).
    #[must_use]
    pub const fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Registers a teardown task.
    ///
    /// Registering a second task under the same name replaces the first.
    pub fn register_task<F, Fut>(&mut self, name: impl Into<String>, action: F) -> &mut Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let action: ShutdownAction = Box::new(move || action().boxed());
        self.insert(name.into(), ShutdownTask::Action(action))
    }

    /// Registers a resource to be closed on shutdown.
    ///
    /// `None` stands for a resource that was never initialized; it is
    /// reported as [`TaskOutcome::Skipped`].
    pub fn register_resource<R: Close>(
        &mut self,
        name: impl Into<String>,
        resource: Option<R>,
    ) -> &mut Self {
        match resource {
            Some(resource) => {
                self.register_task(name, move || async move { resource.close().await })
            }
            None => self.insert(name.into(), ShutdownTask::Absent),
        }
    }

    fn insert(&mut self, name: String, task: ShutdownTask) -> &mut Self {
        if self.tasks.insert(name.clone(), task).is_some() {
            tracing::debug!(task = %name, "replaced shutdown task");
        }
        self
    }

    /// Returns the registered task names in report order.
    #[must_use]
    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.keys().map(String::as_str).collect()
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> CoordinatorState {
        *self.state.borrow()
    }

    /// Returns a receiver that observes state transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CoordinatorState> {
        self.state.subscribe()
    }

    /// Returns a token cancelled when the deadline elapses or shutdown ends.
    ///
    /// Tasks can watch it to cut their own work short.
    #[must_use]
    pub fn deadline_token(&self) -> CancellationToken {
        self.deadline_token.clone()
    }

    /// Waits for `signal`, then shuts down with the configured deadline.
    pub async fn run<S>(self, signal: S) -> ShutdownReport
    where
        S: Future<Output = ()>,
    {
        signal.await;
        tracing::info!("shutdown requested");

        let deadline = self.deadline;
        self.shutdown(deadline).await
    }

    /// Runs every task concurrently and waits at most `deadline` for them.
    ///
    /// Tasks still running at the deadline are aborted and reported as
    /// [`TaskOutcome::TimedOut`].
    pub async fn shutdown(self, deadline: Duration) -> ShutdownReport {
        let started = Instant::now();
        self.state.send_replace(CoordinatorState::Draining);
        tracing::info!(
            tasks = self.tasks.len(),
            deadline_ms = harbor_core::millis(deadline),
            "draining"
        );

        let mut outcomes = BTreeMap::new();
        let mut pending = HashMap::new();
        let mut running = JoinSet::new();

        for (name, task) in self.tasks {
            match task {
                ShutdownTask::Absent => {
                    outcomes.insert(name, TaskOutcome::Skipped);
                }
                ShutdownTask::Action(action) => {
                    let handle = running.spawn(async move { action().await });
                    pending.insert(handle.id(), name);
                }
            }
        }

        let expired = tokio::time::sleep(deadline);
        tokio::pin!(expired);

        loop {
            tokio::select! {
                biased;

                joined = running.join_next_with_id() => match joined {
                    Some(Ok((id, result))) => {
                        if let Some(name) = pending.remove(&id) {
                            outcomes.insert(name, outcome_of(result));
                        }
                    }
                    Some(Err(err)) => {
                        if let Some(name) = pending.remove(&err.id()) {
                            outcomes.insert(name, join_failure(err));
                        }
                    }
                    None => break,
                },
                () = &mut expired => {
                    self.deadline_token.cancel();
                    running.abort_all();
                    break;
                }
            }
        }

        for name in pending.into_values() {
            outcomes.insert(name, TaskOutcome::TimedOut);
        }
        self.deadline_token.cancel();

        let report = ShutdownReport {
            outcomes,
            elapsed: started.elapsed(),
        };
        log_report(&report);

        self.state.send_replace(CoordinatorState::Terminated);
        report
    }
}

fn outcome_of(result: anyhow::Result<()>) -> TaskOutcome {
    match result {
        Ok(()) => TaskOutcome::Ok,
        Err(err) => TaskOutcome::Failed(format!("{err:#}")),
    }
}

fn join_failure(err: JoinError) -> TaskOutcome {
    match err.try_into_panic() {
        Ok(panic) => TaskOutcome::Failed(format!("panicked: {}", panic_message(panic.as_ref()))),
        Err(err) => TaskOutcome::Failed(err.to_string()),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic payload"
    }
}

fn log_report(report: &ShutdownReport) {
    for (task, outcome) in report.outcomes() {
        match outcome {
            TaskOutcome::Ok | TaskOutcome::Skipped => {
                tracing::info!(task = %task, outcome = %outcome, "shutdown task finished");
            }
            TaskOutcome::TimedOut => {
                tracing::warn!(task = %task, outcome = %outcome, "shutdown task finished");
            }
            TaskOutcome::Failed(_) => {
                tracing::error!(task = %task, outcome = %outcome, "shutdown task finished");
            }
        }
    }

    tracing::info!(
        elapsed_ms = harbor_core::millis(report.elapsed()),
        clean = report.is_clean(),
        "shutdown complete"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingResource {
        closed: Arc<AtomicUsize>,
    }

    impl Close for CountingResource {
        async fn close(&self) -> anyhow::Result<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_all_tasks_ok() {
        let mut coordinator = ShutdownCoordinator::default();
        coordinator
            .register_task("http", || async { Ok(()) })
            .register_task("store", || async { Ok(()) });

        let report = coordinator.shutdown(Duration::from_secs(1)).await;
        assert!(report.is_clean());
        assert_eq!(report.outcomes().len(), 2);
    }

    #[tokio::test]
    async fn test_failure_does_not_affect_siblings() {
        let mut coordinator = ShutdownCoordinator::default();
        coordinator
            .register_task("store", || async {
                Err(anyhow::anyhow!("connection reset").context("closing pool"))
            })
            .register_task("telemetry", || async { Ok(()) });

        let report = coordinator.shutdown(Duration::from_secs(1)).await;
        assert_eq!(
            report.outcome("store"),
            Some(&TaskOutcome::Failed("closing pool: connection reset".to_string()))
        );
        assert_eq!(report.outcome("telemetry"), Some(&TaskOutcome::Ok));
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn test_panic_is_recorded_as_failure() {
        let mut coordinator = ShutdownCoordinator::default();
        coordinator
            .register_task("broken", || async {
                if true {
                    panic!("exporter poisoned");
                }
                Ok(())
            })
            .register_task("http", || async { Ok(()) });

        let report = coordinator.shutdown(Duration::from_secs(1)).await;
        assert_eq!(
            report.outcome("broken"),
            Some(&TaskOutcome::Failed("panicked: exporter poisoned".to_string()))
        );
        assert_eq!(report.outcome("http"), Some(&TaskOutcome::Ok));
    }

    #[tokio::test]
    async fn test_concurrent_panics_are_attributed_to_their_tasks() {
        let mut coordinator = ShutdownCoordinator::default();
        coordinator
            .register_task("store", || async {
                tokio::task::yield_now().await;
                if true {
                    panic!("pool poisoned");
                }
                Ok(())
            })
            .register_task("telemetry", || -> futures_util::future::Ready<anyhow::Result<()>> {
                panic!("exporter gone")
            })
            .register_task("http", || async { Ok(()) });

        let report = coordinator.shutdown(Duration::from_secs(1)).await;
        assert_eq!(
            report.outcome("store"),
            Some(&TaskOutcome::Failed("panicked: pool poisoned".to_string()))
        );
        assert_eq!(
            report.outcome("telemetry"),
            Some(&TaskOutcome::Failed("panicked: exporter gone".to_string()))
        );
        assert_eq!(report.outcome("http"), Some(&TaskOutcome::Ok));
        assert_eq!(report.outcomes().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_task_times_out() {
        let mut coordinator = ShutdownCoordinator::default();
        coordinator
            .register_task("fast", || async { Ok(()) })
            .register_task("slow", || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            });

        let report = coordinator.shutdown(Duration::from_secs(1)).await;
        assert_eq!(report.outcome("fast"), Some(&TaskOutcome::Ok));
        assert_eq!(report.outcome("slow"), Some(&TaskOutcome::TimedOut));
        assert!(report.elapsed() >= Duration::from_secs(1));
        assert!(report.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_absent_resource_is_skipped() {
        let closed = Arc::new(AtomicUsize::new(0));
        let mut coordinator = ShutdownCoordinator::default();
        coordinator
            .register_resource(
                "store",
                Some(CountingResource {
                    closed: Arc::clone(&closed),
                }),
            )
            .register_resource::<CountingResource>("cache", None);

        let report = coordinator.shutdown(Duration::from_secs(1)).await;
        assert_eq!(report.outcome("store"), Some(&TaskOutcome::Ok));
        assert_eq!(report.outcome("cache"), Some(&TaskOutcome::Skipped));
        assert!(report.is_clean());
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_duplicate_name_replaces_task() {
        let runs = Arc::new(AtomicUsize::new(0));
        let first = Arc::clone(&runs);
        let second = Arc::clone(&runs);

        let mut coordinator = ShutdownCoordinator::default();
        coordinator
            .register_task("http", move || async move {
                first.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::anyhow!("replaced task ran"))
            })
            .register_task("http", move || async move {
                second.fetch_add(10, Ordering::SeqCst);
                Ok(())
            });
        assert_eq!(coordinator.task_names(), vec!["http"]);

        let report = coordinator.shutdown(Duration::from_secs(1)).await;
        assert_eq!(report.outcome("http"), Some(&TaskOutcome::Ok));
        assert_eq!(runs.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let coordinator = ShutdownCoordinator::default();
        assert_eq!(coordinator.state(), CoordinatorState::Running);

        let state = coordinator.subscribe();
        let token = coordinator.deadline_token();
        assert!(!token.is_cancelled());

        coordinator.shutdown(Duration::from_secs(1)).await;
        assert_eq!(*state.borrow(), CoordinatorState::Terminated);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_run_waits_for_signal() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let mut coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        coordinator.register_task("http", || async { Ok(()) });
        let mut state = coordinator.subscribe();

        let handle = tokio::spawn(coordinator.run(async move {
            let _ = rx.await;
        }));

        tokio::task::yield_now().await;
        assert_eq!(*state.borrow_and_update(), CoordinatorState::Running);

        tx.send(()).unwrap();
        let report = handle.await.unwrap();
        assert_eq!(report.outcome("http"), Some(&TaskOutcome::Ok));
        assert_eq!(*state.borrow(), CoordinatorState::Terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_token_cancelled_at_deadline() {
        let mut coordinator = ShutdownCoordinator::default();
        let token = coordinator.deadline_token();
        let watcher = token.clone();

        coordinator.register_task("flush", move || async move {
            watcher.cancelled().await;
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });

        let report = coordinator.shutdown(Duration::from_millis(100)).await;
        assert_eq!(report.outcome("flush"), Some(&TaskOutcome::TimedOut));
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(TaskOutcome::Ok.to_string(), "ok");
        assert_eq!(TaskOutcome::Failed("boom".into()).to_string(), "failed: boom");
        assert_eq!(TaskOutcome::Skipped.to_string(), "skipped");
        assert_eq!(TaskOutcome::TimedOut.to_string(), "timed out");
    }
}
