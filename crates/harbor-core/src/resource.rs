//! Closable resources.

use std::future::Future;
use std::sync::Arc;

/// A resource that must be released during shutdown.
///
/// Implementors are registered with the shutdown coordinator, which calls
/// [`Close::close`] exactly once.
pub trait Close: Send + Sync + 'static {
    /// Releases the resource.
    fn close(&self) -> impl Future<Output = anyhow::Result<()>> + Send;
}

impl<T: Close> Close for Arc<T> {
    fn close(&self) -> impl Future<Output = anyhow::Result<()>> + Send {
        (**self).close()
    }
}
