//! Retain-counted identity map of open connections.
//!
//! At most one connection is opened per key. Every holder increments the
//! retain count on `acquire` and decrements it on `release`; the connection is
//! handed back for closing only when the last holder releases it.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::Mutex;

struct Entry<C> {
    retain_count: usize,
    connection: Arc<C>,
}

/// Shared connections keyed by their connection signature.
pub struct ConnectionRegistry<K, C> {
    entries: Mutex<HashMap<K, Entry<C>>>,
}

impl<K, C> ConnectionRegistry<K, C>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Return the connection registered under `key`, opening it with
    /// `connect` if there is none yet.
    ///
    /// The registry lock is held while connecting, so concurrent callers with
    /// the same key never open two connections. A failed connect leaves the
    /// registry untouched.
    pub async fn acquire<F, Fut, E>(&self, key: &K, connect: F) -> Result<Arc<C>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<C, E>>,
    {
        let mut entries = self.entries.lock().await;

        if let Some(entry) = entries.get_mut(key) {
            entry.retain_count += 1;
            return Ok(Arc::clone(&entry.connection));
        }

        let connection = Arc::new(connect().await?);
        entries.insert(
            key.clone(),
            Entry {
                retain_count: 1,
                connection: Arc::clone(&connection),
            },
        );
        Ok(connection)
    }

    /// Drop one reference to `key`.
    ///
    /// Returns the connection once no holder is left; the caller is
    /// responsible for closing it. Unknown keys return `None`.
    pub async fn release(&self, key: &K) -> Option<Arc<C>> {
        let mut entries = self.entries.lock().await;
        let entry = entries.get_mut(key)?;

        entry.retain_count = entry.retain_count.saturating_sub(1);
        if entry.retain_count > 0 {
            return None;
        }

        entries.remove(key).map(|entry| entry.connection)
    }

    /// Run `cleanup`, then drop one reference to `key` whatever its outcome.
    ///
    /// Returns the cleanup's output together with what [`release`] returned,
    /// so a failing cleanup never leaks a retain count.
    ///
    /// [`release`]: ConnectionRegistry::release
    pub async fn release_after<Fut, T>(&self, key: &K, cleanup: Fut) -> (T, Option<Arc<C>>)
    where
        Fut: Future<Output = T>,
    {
        let outcome = cleanup.await;
        (outcome, self.release(key).await)
    }

    /// Number of live holders for `key` (0 when not registered).
    pub async fn retain_count(&self, key: &K) -> usize {
        self.entries
            .lock()
            .await
            .get(key)
            .map(|entry| entry.retain_count)
            .unwrap_or(0)
    }

    /// Number of distinct open connections.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl<K, C> Default for ConnectionRegistry<K, C>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
