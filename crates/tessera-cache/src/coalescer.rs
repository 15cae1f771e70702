//! Get-or-fetch with per-key fetch coalescing.

use crate::jitter::TtlJitter;
use crate::keys::CacheKey;
use crate::lock_table::{Acquisition, LockLease, LockTable};
use crate::store::CacheStore;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tessera_config::CacheConfig;
use tessera_core::EntityId;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Failure of a get-or-fetch call.
#[derive(Error, Debug)]
pub enum GetOrFetchError<E> {
    /// The fetch function failed. Nothing was cached.
    #[error("fetch failed: {0}")]
    Fetch(#[source] E),

    /// The caller cancelled before a value was available.
    #[error("get-or-fetch cancelled")]
    Cancelled,

    /// The cache key could not be built.
    #[error("invalid cache key: {0}")]
    InvalidKey(String),
}

impl<E> GetOrFetchError<E> {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns the fetch error, if that is what failed.
    pub fn into_fetch_error(self) -> Option<E> {
        match self {
            Self::Fetch(e) => Some(e),
            _ => None,
        }
    }
}

/// Read-through cache that runs at most one fetch per key at a time.
///
/// On a miss the first caller takes the key's lock and fetches; concurrent
/// callers for the same key wait for it and then read what it stored. A
/// failed fetch caches nothing, so the next waiter in line fetches again.
/// `None` results are returned but never cached.
///
/// Fetches run on the tokio runtime as their own task, hence the `'static`
/// bounds on the fetch closure and its output.
pub struct StampedeCoalescer {
    store: CacheStore,
    locks: LockTable,
    jitter: TtlJitter,
    config: CacheConfig,
}

impl StampedeCoalescer {
    #[must_use]
    pub fn new(store: CacheStore, config: &CacheConfig) -> Self {
        Self {
            store,
            locks: LockTable::new(config.lock_cleanup_delay()),
            jitter: TtlJitter::new(config.ttl_jitter_percent),
            config: config.clone(),
        }
    }

    #[must_use]
    pub fn with_lock_cleanup_delay(mut self, delay: Duration) -> Self {
        self.locks = LockTable::new(delay);
        self
    }

    #[must_use]
    pub fn with_jitter(mut self, jitter: TtlJitter) -> Self {
        self.jitter = jitter;
        self
    }

    #[must_use]
    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    #[must_use]
    pub fn lock_table(&self) -> &LockTable {
        &self.locks
    }

    #[must_use]
    pub fn jitter(&self) -> TtlJitter {
        self.jitter
    }

    /// Returns the cached value for `key`, or fetches and caches it.
    pub async fn get_or_fetch<T, F, Fut, E>(
        &self,
        key: &CacheKey,
        ttl: Duration,
        fetch: F,
    ) -> Result<Option<T>, GetOrFetchError<E>>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<T>, E>> + Send + 'static,
        E: Send + 'static,
    {
        self.get_or_fetch_with_cancellation(key, ttl, &CancellationToken::new(), fetch)
            .await
    }

    /// Like [`get_or_fetch`](Self::get_or_fetch), but stops waiting when
    /// `cancel` fires.
    ///
    /// The fetch runs on its own task holding the key's lock, so a cancelled
    /// caller, fetcher or waiter alike, never aborts it: it still completes,
    /// caches its result and releases the lock to the callers waiting on it.
    pub async fn get_or_fetch_with_cancellation<T, F, Fut, E>(
        &self,
        key: &CacheKey,
        ttl: Duration,
        cancel: &CancellationToken,
        fetch: F,
    ) -> Result<Option<T>, GetOrFetchError<E>>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<T>, E>> + Send + 'static,
        E: Send + 'static,
    {
        if cancel.is_cancelled() {
            return Err(GetOrFetchError::Cancelled);
        }

        if !self.store.is_enabled() {
            return match until_cancelled(cancel, fetch()).await {
                Some(outcome) => outcome.map_err(GetOrFetchError::Fetch),
                None => Err(GetOrFetchError::Cancelled),
            };
        }

        if let Some(value) = self.store.get::<T>(key).await {
            return Ok(Some(value));
        }

        let Some(lease) = self.lock(key, cancel).await else {
            return Err(GetOrFetchError::Cancelled);
        };

        // Whoever held the lock before us may have filled the entry. The
        // lookup was already counted on the fast path.
        if let Some(value) = self.store.get_uncounted::<T>(key).await {
            return Ok(Some(value));
        }

        let in_flight = self.spawn_fetch(key.clone(), ttl, lease, fetch);
        match until_cancelled(cancel, in_flight).await {
            Some(Ok(result)) => result,
            Some(Err(e)) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Some(Err(_)) => Err(GetOrFetchError::Cancelled),
            None => {
                debug!(key = %key, "Caller cancelled, fetch continues for waiters");
                Err(GetOrFetchError::Cancelled)
            }
        }
    }

    /// Get-or-fetch for an entity, keyed and expired by scope.
    pub async fn get_or_fetch_scoped<T, F, Fut, E>(
        &self,
        scope: &str,
        id: EntityId,
        fetch: F,
    ) -> Result<Option<T>, GetOrFetchError<E>>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<T>, E>> + Send + 'static,
        E: Send + 'static,
    {
        let key = self
            .store
            .codec()
            .entity(scope, id)
            .map_err(|e| GetOrFetchError::InvalidKey(e.to_string()))?;
        self.get_or_fetch(&key, self.config.ttl_for_scope(scope), fetch)
            .await
    }

    /// Takes the key's lock, waiting behind an in-flight fetch if needed.
    /// Returns `None` if cancelled while waiting.
    async fn lock(&self, key: &CacheKey, cancel: &CancellationToken) -> Option<LockLease> {
        match self.locks.try_acquire(key.as_str()) {
            Acquisition::Acquired(lease) => Some(lease),
            Acquisition::Contended(contended) => {
                debug!(key = %key, "Fetch in flight, waiting");
                self.store.statistics().record_stampede_prevented();
                let lease = until_cancelled(cancel, contended.wait()).await;
                if lease.is_none() {
                    self.locks.schedule_cleanup(key.as_str().to_string());
                }
                lease
            }
        }
    }

    /// Runs `fetch` and the write-back on a separate task that owns `lease`.
    fn spawn_fetch<T, F, Fut, E>(
        &self,
        key: CacheKey,
        ttl: Duration,
        lease: LockLease,
        fetch: F,
    ) -> JoinHandle<Result<Option<T>, GetOrFetchError<E>>>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<T>, E>> + Send + 'static,
        E: Send + 'static,
    {
        let store = self.store.clone();
        let jitter = self.jitter;
        tokio::spawn(async move {
            let result = run_fetch(&store, jitter, &key, ttl, fetch).await;
            drop(lease);
            result
        })
    }
}

async fn run_fetch<T, F, Fut, E>(
    store: &CacheStore,
    jitter: TtlJitter,
    key: &CacheKey,
    ttl: Duration,
    fetch: F,
) -> Result<Option<T>, GetOrFetchError<E>>
where
    T: Serialize + Sync,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let started = Instant::now();
    let outcome = fetch().await;
    let elapsed = started.elapsed();

    match outcome {
        Ok(Some(value)) => {
            store.statistics().record_fetch(elapsed);
            store.set(key, &value, jitter.apply(ttl)).await;
            debug!(key = %key, elapsed_ms = elapsed.as_millis() as u64, "Fetched and cached");
            Ok(Some(value))
        }
        Ok(None) => {
            store.statistics().record_fetch(elapsed);
            debug!(key = %key, "Fetch returned nothing, not caching");
            Ok(None)
        }
        Err(e) => {
            store.statistics().record_fetch_failure(elapsed);
            warn!(key = %key, elapsed_ms = elapsed.as_millis() as u64, "Fetch failed, nothing cached");
            Err(GetOrFetchError::Fetch(e))
        }
    }
}

async fn until_cancelled<F: Future>(cancel: &CancellationToken, future: F) -> Option<F::Output> {
    tokio::select! {
        output = future => Some(output),
        () = cancel.cancelled() => None,
    }
}
