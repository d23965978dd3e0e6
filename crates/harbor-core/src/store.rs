//! Key/value store interface.
//!
//! Handlers talk to caches through the narrow [`Store`] trait. A miss is
//! reported as [`ServiceError::NotFound`] so read-through callers can tell it
//! apart from a failing backend with [`crate::is_not_found`].
//!
//! [`MemoryStore`] is the in-process implementation; expired entries are
//! dropped lazily on access.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::ServiceError;
use crate::resource::Close;

/// Separator between the key prefix and the key.
pub const KEY_SEPARATOR: &str = "###";

/// Expiry class of a stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtlClass {
    /// Short-lived values.
    Short,
    /// Long-lived values.
    Long,
}

/// Expiration durations per [`TtlClass`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryConfig {
    /// Expiration of [`TtlClass::Short`] values.
    pub short: Duration,
    /// Expiration of [`TtlClass::Long`] values.
    pub long: Duration,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            short: Duration::from_secs(60),
            long: Duration::from_secs(60 * 60),
        }
    }
}

impl ExpiryConfig {
    /// Returns the expiration for a class.
    #[must_use]
    pub const fn ttl(&self, class: TtlClass) -> Duration {
        match class {
            TtlClass::Short => self.short,
            TtlClass::Long => self.long,
        }
    }
}

/// A byte-oriented key/value store.
pub trait Store: Send + Sync + 'static {
    /// Returns the value stored under `key`, or [`ServiceError::NotFound`].
    fn get(&self, key: &str) -> impl Future<Output = anyhow::Result<Vec<u8>>> + Send;

    /// Stores `value` under `key` with the expiration of `ttl`.
    fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: TtlClass,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Deletes `key`; deleting a missing key is [`ServiceError::NotFound`].
    fn delete(&self, key: &str) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Removes every entry.
    fn flush(&self) -> impl Future<Output = anyhow::Result<()>> + Send;
}

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// In-memory [`Store`].
///
/// Cloning is cheap and clones share the same entries.
///
/// # Example
///
/// ```
/// use harbor_core::{is_not_found, MemoryStore, Store, TtlClass};
///
/// # tokio_test::block_on(async {
/// let store = MemoryStore::new().with_prefix("articles");
/// store.set("42", b"hello".to_vec(), TtlClass::Short).await?;
/// assert_eq!(store.get("42").await?, b"hello");
///
/// store.delete("42").await?;
/// assert!(is_not_found(&store.get("42").await.unwrap_err()));
/// # anyhow::Ok(())
/// # }).unwrap();
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    prefix: Option<String>,
    expiry: ExpiryConfig,
}

impl MemoryStore {
    /// Creates an empty store with default expirations and no prefix.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefixes every key with `prefix###`. An empty prefix is ignored.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.prefix = (!prefix.is_empty()).then_some(prefix);
        self
    }

    /// Sets the expiration per class.
    #[must_use]
    pub const fn with_expiry(mut self, expiry: ExpiryConfig) -> Self {
        self.expiry = expiry;
        self
    }

    /// Returns the number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    /// Returns `true` if no live entries exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn full_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}{KEY_SEPARATOR}{key}"),
            None => key.to_string(),
        }
    }
}

impl Store for MemoryStore {
    async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        let key = self.full_key(key);
        let now = Instant::now();

        if let Some(entry) = self.entries.read().get(&key) {
            if entry.expires_at > now {
                return Ok(entry.value.clone());
            }
        }

        // Expired or missing; drop a stale entry if one is left behind.
        let mut entries = self.entries.write();
        if entries.get(&key).is_some_and(|entry| entry.expires_at <= now) {
            entries.remove(&key);
        }
        Err(ServiceError::NotFound.into())
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: TtlClass) -> anyhow::Result<()> {
        let entry = Entry {
            value,
            expires_at: Instant::now() + self.expiry.ttl(ttl),
        };
        self.entries.write().insert(self.full_key(key), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let now = Instant::now();
        match self.entries.write().remove(&self.full_key(key)) {
            Some(entry) if entry.expires_at > now => Ok(()),
            _ => Err(ServiceError::NotFound.into()),
        }
    }

    async fn flush(&self) -> anyhow::Result<()> {
        self.entries.write().clear();
        Ok(())
    }
}

impl Close for MemoryStore {
    async fn close(&self) -> anyhow::Result<()> {
        let dropped = self.entries.read().len();
        self.entries.write().clear();
        tracing::debug!(entries = dropped, "memory store closed");
        Ok(())
    }
}
