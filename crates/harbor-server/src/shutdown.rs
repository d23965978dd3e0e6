//! Shutdown signal handling and connection tracking.
//!
//! [`ShutdownSignal`] is the trigger the server and the shutdown
//! coordinator both listen on. [`ConnectionTracker`] counts live connections
//! so the server can wait for them to drain.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use harbor_server::ShutdownSignal;
//!
//! # tokio_test::block_on(async {
//! let shutdown = ShutdownSignal::new();
//! let trigger = shutdown.clone();
//!
//! tokio::spawn(async move { trigger.trigger() });
//!
//! tokio::select! {
//!     _ = shutdown.recv() => println!("shutdown requested"),
//!     _ = tokio::time::sleep(Duration::from_secs(60)) => println!("gave up"),
//! }
//! # });
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use tokio::sync::{broadcast, Notify};

use crate::error::ServerError;

/// A signal that can be used to trigger and await graceful shutdown.
///
/// Clones share the same state; triggering any clone notifies all of them.
///
/// # Example
///
/// ```rust
/// use harbor_server::ShutdownSignal;
///
/// let shutdown = ShutdownSignal::new();
/// let other = shutdown.clone();
///
/// shutdown.trigger();
/// assert!(other.is_shutdown());
/// ```
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    /// Whether shutdown has been triggered
    triggered: Arc<AtomicBool>,

    /// Broadcast sender for notifying waiters
    sender: broadcast::Sender<()>,
}

impl ShutdownSignal {
    /// Creates a new, untriggered shutdown signal.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            triggered: Arc::new(AtomicBool::new(false)),
            sender,
        }
    }

    /// Triggers the shutdown signal. Idempotent.
    pub fn trigger(&self) {
        if self
            .triggered
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            // No receivers is fine.
            let _ = self.sender.send(());
        }
    }

    /// Returns `true` if shutdown has been triggered.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Returns a future that completes when shutdown is triggered.
    ///
    /// Completes immediately if the signal was already triggered.
    pub fn recv(&self) -> ShutdownReceiver {
        let triggered = Arc::clone(&self.triggered);
        // Subscribe now; `trigger` sets the flag before sending, so either the
        // flag is visible or the message is delivered.
        let mut receiver = self.sender.subscribe();

        ShutdownReceiver {
            inner: Box::pin(async move {
                if triggered.load(Ordering::SeqCst) {
                    return;
                }
                // A closed or lagged channel also means the signal fired.
                let _ = receiver.recv().await;
            }),
        }
    }

    /// Creates a shutdown signal triggered by SIGTERM or SIGINT.
    ///
    /// On non-Unix platforms only Ctrl-C is observed. Must be called from
    /// within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Signal` if a signal handler cannot be installed.
    pub fn with_os_signals() -> Result<Self, ServerError> {
        let signal = Self::new();
        let listener = OsSignals::install()?;

        let trigger = signal.clone();
        tokio::spawn(async move {
            let name = listener.recv().await;
            tracing::info!(signal = name, "received shutdown signal");
            trigger.trigger();
        });

        Ok(signal)
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// A future that completes when the shutdown signal is triggered.
///
/// Created by [`ShutdownSignal::recv()`].
pub struct ShutdownReceiver {
    inner: BoxFuture<'static, ()>,
}

impl std::fmt::Debug for ShutdownReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownReceiver").finish_non_exhaustive()
    }
}

impl Future for ShutdownReceiver {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

#[cfg(unix)]
struct OsSignals {
    sigterm: tokio::signal::unix::Signal,
    sigint: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl OsSignals {
    fn install() -> Result<Self, ServerError> {
        use tokio::signal::unix::{signal, SignalKind};

        let sigterm = signal(SignalKind::terminate())
            .map_err(|source| ServerError::Signal { signal: "SIGTERM", source })?;
        let sigint = signal(SignalKind::interrupt())
            .map_err(|source| ServerError::Signal { signal: "SIGINT", source })?;

        Ok(Self { sigterm, sigint })
    }

    async fn recv(mut self) -> &'static str {
        tokio::select! {
            _ = self.sigterm.recv() => "SIGTERM",
            _ = self.sigint.recv() => "SIGINT",
        }
    }
}

#[cfg(not(unix))]
struct OsSignals;

#[cfg(not(unix))]
impl OsSignals {
    fn install() -> Result<Self, ServerError> {
        Ok(Self)
    }

    async fn recv(self) -> &'static str {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Ctrl-C listener failed");
            std::future::pending::<()>().await;
        }
        "Ctrl-C"
    }
}

/// Counts active connections so shutdown can wait for them to drain.
///
/// # Example
///
/// ```rust
/// use harbor_server::ConnectionTracker;
///
/// let tracker = ConnectionTracker::new();
///
/// let token = tracker.acquire();
/// assert_eq!(tracker.active_connections(), 1);
///
/// drop(token);
/// assert_eq!(tracker.active_connections(), 0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active: Arc<AtomicUsize>,
    notify: Arc<Notify>,
}

impl ConnectionTracker {
    /// Creates a new connection tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires a token held for the lifetime of one connection.
    #[must_use]
    pub fn acquire(&self) -> ConnectionToken {
        self.active.fetch_add(1, Ordering::SeqCst);
        ConnectionToken {
            active: Arc::clone(&self.active),
            notify: Arc::clone(&self.notify),
        }
    }

    /// Returns the number of active connections.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Waits until every token has been dropped.
    pub async fn wait_for_drain(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent final drop is not missed.
            notified.as_mut().enable();

            if self.active.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// A token representing an active connection.
#[derive(Debug)]
pub struct ConnectionToken {
    active: Arc<AtomicUsize>,
    notify: Arc<Notify>,
}

impl Drop for ConnectionToken {
    fn drop(&mut self) {
        if self.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notify.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_test::{assert_pending, assert_ready};

    #[test]
    fn test_trigger_is_shared_and_idempotent() {
        let signal = ShutdownSignal::default();
        let observer = signal.clone();
        assert!(!observer.is_shutdown());

        signal.trigger();
        signal.trigger();
        assert!(observer.is_shutdown());
    }

    #[test]
    fn test_receiver_created_before_trigger_wakes() {
        let signal = ShutdownSignal::new();
        let mut receiver = tokio_test::task::spawn(signal.recv());
        assert_pending!(receiver.poll());

        signal.trigger();
        assert!(receiver.is_woken());
        assert_ready!(receiver.poll());
    }

    #[tokio::test]
    async fn test_receiver_created_after_trigger_is_ready() {
        let signal = ShutdownSignal::new();
        signal.trigger();

        let receivers = [signal.recv(), signal.recv(), signal.clone().recv()];
        for receiver in receivers {
            tokio::time::timeout(Duration::from_millis(10), receiver)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_with_os_signals_installs() {
        let signal = ShutdownSignal::with_os_signals().unwrap();
        assert!(!signal.is_shutdown());
    }

    #[test]
    fn test_tokens_release_on_drop() {
        let tracker = ConnectionTracker::new();
        let connections: Vec<_> = (0..3).map(|_| tracker.acquire()).collect();
        assert_eq!(tracker.active_connections(), 3);

        drop(connections);
        assert_eq!(tracker.active_connections(), 0);
    }

    #[test]
    fn test_drain_waits_for_last_token() {
        let tracker = ConnectionTracker::new();
        let first = tracker.acquire();
        let second = tracker.acquire();

        let mut drained = tokio_test::task::spawn(tracker.wait_for_drain());
        assert_pending!(drained.poll());

        drop(first);
        assert_pending!(drained.poll());

        drop(second);
        assert!(drained.is_woken());
        assert_ready!(drained.poll());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_across_tasks() {
        let tracker = ConnectionTracker::new();
        let token = tracker.acquire();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(token);
        });

        tokio::time::timeout(Duration::from_secs(1), tracker.wait_for_drain())
            .await
            .unwrap();
        assert_eq!(tracker.active_connections(), 0);
    }
}
