//! Typed cache store.

use crate::backend::CacheBackend;
use crate::keys::{CacheKey, KeyCodec};
use crate::stats::CacheStatistics;
use futures::future::join_all;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tessera_config::CacheConfig;
use tessera_core::TesseraResult;
use tracing::{debug, warn};

/// Typed get/set/remove over a [`CacheBackend`].
///
/// No operation here fails to the caller. Backend errors and unreadable
/// entries are logged, counted and turned into a miss (reads) or a no-op
/// (writes). When the store is disabled every read misses without touching
/// the backend and every write is skipped.
#[derive(Clone)]
pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
    codec: KeyCodec,
    stats: Arc<CacheStatistics>,
    enabled: bool,
}

impl CacheStore {
    /// Creates an enabled store with statistics.
    #[must_use]
    pub fn new(backend: Arc<dyn CacheBackend>, codec: KeyCodec) -> Self {
        Self {
            backend,
            codec,
            stats: Arc::new(CacheStatistics::default()),
            enabled: true,
        }
    }

    /// Creates a store from cache configuration.
    pub fn from_config(backend: Arc<dyn CacheBackend>, config: &CacheConfig) -> TesseraResult<Self> {
        let codec = KeyCodec::new(config.key_prefix.clone())?;
        Ok(Self::new(backend, codec)
            .with_statistics(Arc::new(CacheStatistics::new(config.enable_statistics)))
            .with_enabled(config.enabled))
    }

    /// Replaces the statistics sink.
    #[must_use]
    pub fn with_statistics(mut self, stats: Arc<CacheStatistics>) -> Self {
        self.stats = stats;
        self
    }

    /// Sets the kill switch.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn codec(&self) -> &KeyCodec {
        &self.codec
    }

    #[must_use]
    pub fn statistics(&self) -> &Arc<CacheStatistics> {
        &self.stats
    }

    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Gets the raw stored string.
    pub async fn get_raw(&self, key: &CacheKey) -> Option<String> {
        self.read_raw(key, true).await
    }

    /// Gets and deserializes a value.
    ///
    /// An entry that no longer deserializes as `T` is deleted and reported as
    /// a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let raw = self.read_raw(key, true).await?;
        self.decode(key, &raw).await
    }

    /// Like [`get`](Self::get), but does not count a hit or miss.
    ///
    /// Used for re-reads within one logical lookup, which was already counted.
    pub(crate) async fn get_uncounted<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let raw = self.read_raw(key, false).await?;
        self.decode(key, &raw).await
    }

    async fn read_raw(&self, key: &CacheKey, counted: bool) -> Option<String> {
        if !self.enabled {
            return None;
        }

        match self.backend.get_raw(key.as_str()).await {
            Ok(Some(value)) => {
                debug!(key = %key, "Cache hit");
                if counted {
                    self.stats.record_hit();
                }
                Some(value)
            }
            Ok(None) => {
                debug!(key = %key, "Cache miss");
                if counted {
                    self.stats.record_miss();
                }
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed, treating as miss");
                self.stats.record_error("get");
                if counted {
                    self.stats.record_miss();
                }
                None
            }
        }
    }

    async fn decode<T: DeserializeOwned>(&self, key: &CacheKey, raw: &str) -> Option<T> {
        match serde_json::from_str(raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %key, error = %e, "Evicting unreadable cache entry");
                self.stats.record_error("deserialize");
                if let Err(e) = self.backend.delete(key.as_str()).await {
                    warn!(key = %key, error = %e, "Failed to evict unreadable cache entry");
                }
                None
            }
        }
    }

    /// Serializes and stores a value for `ttl`.
    pub async fn set<T>(&self, key: &CacheKey, value: &T, ttl: Duration)
    where
        T: Serialize + ?Sized + Sync,
    {
        if !self.enabled {
            return;
        }

        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to serialize cache value");
                self.stats.record_error("serialize");
                return;
            }
        };

        match self.backend.set_raw(key.as_str(), &raw, ttl).await {
            Ok(()) => {
                debug!(key = %key, ttl_ms = ttl.as_millis() as u64, "Cache set");
                self.stats.record_set();
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache write failed");
                self.stats.record_error("set");
            }
        }
    }

    /// Removes a key. Returns true if an entry was removed.
    pub async fn remove(&self, key: &CacheKey) -> bool {
        if !self.enabled {
            return false;
        }

        match self.backend.delete(key.as_str()).await {
            Ok(removed) => {
                if removed {
                    debug!(key = %key, "Cache entry removed");
                    self.stats.record_removal(1);
                }
                removed
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache delete failed");
                self.stats.record_error("remove");
                false
            }
        }
    }

    /// Checks whether a key is present.
    pub async fn exists(&self, key: &CacheKey) -> bool {
        if !self.enabled {
            return false;
        }

        match self.backend.exists(key.as_str()).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache exists check failed");
                self.stats.record_error("exists");
                false
            }
        }
    }

    /// Gets several keys concurrently, in input order.
    pub async fn get_many<T: DeserializeOwned>(&self, keys: &[CacheKey]) -> Vec<Option<T>> {
        join_all(keys.iter().map(|key| self.get::<T>(key))).await
    }

    /// Sets several entries concurrently with one TTL.
    pub async fn set_many<T>(&self, entries: &[(CacheKey, T)], ttl: Duration)
    where
        T: Serialize + Sync,
    {
        join_all(entries.iter().map(|(key, value)| self.set(key, value, ttl))).await;
    }

    /// Removes several keys concurrently. Returns how many were removed.
    pub async fn remove_many(&self, keys: &[CacheKey]) -> u64 {
        join_all(keys.iter().map(|key| self.remove(key)))
            .await
            .into_iter()
            .filter(|removed| *removed)
            .count() as u64
    }

    /// Removes every key under this store's prefix that matches `pattern`.
    ///
    /// `pattern` is relative to the prefix: `user:*` removes `{prefix}:user:*`
    /// and never touches keys of another prefix.
    pub async fn remove_by_pattern(&self, pattern: &str) -> u64 {
        if !self.enabled {
            return 0;
        }

        let scoped = match self.codec.scoped_pattern(pattern) {
            Ok(scoped) => scoped,
            Err(e) => {
                warn!(pattern = %pattern, error = %e, "Rejected cache pattern");
                return 0;
            }
        };

        let keys: Vec<String> = match self.backend.scan_keys(&scoped).await {
            Ok(keys) => keys.into_iter().filter(|k| self.codec.owns(k)).collect(),
            Err(e) => {
                warn!(pattern = %scoped, error = %e, "Cache scan failed");
                self.stats.record_error("scan");
                return 0;
            }
        };

        if keys.is_empty() {
            return 0;
        }

        match self.backend.delete_many(&keys).await {
            Ok(removed) => {
                debug!(pattern = %scoped, removed, "Cache entries removed by pattern");
                self.stats.record_removal(removed);
                removed
            }
            Err(e) => {
                warn!(pattern = %scoped, error = %e, "Cache pattern delete failed");
                self.stats.record_error("remove_pattern");
                0
            }
        }
    }

    /// Gets and deletes a value in one step.
    pub async fn take<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        if !self.enabled {
            return None;
        }

        let raw = match self.backend.take_raw(key.as_str()).await {
            Ok(Some(raw)) => {
                self.stats.record_hit();
                self.stats.record_removal(1);
                raw
            }
            Ok(None) => {
                self.stats.record_miss();
                return None;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache take failed");
                self.stats.record_error("take");
                self.stats.record_miss();
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %key, error = %e, "Discarding unreadable cache entry");
                self.stats.record_error("deserialize");
                None
            }
        }
    }

    /// Returns true if the backend answers.
    pub async fn ping(&self) -> bool {
        match self.backend.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!(backend = self.backend.name(), error = %e, "Cache backend ping failed");
                false
            }
        }
    }
}
