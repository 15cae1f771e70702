//! Short-lived, externally keyed tokens.

use crate::keys::CacheKey;
use crate::store::CacheStore;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tessera_config::CacheConfig;
use tessera_core::TesseraResult;

/// Stores short-lived payloads keyed by an external correlation id, such as
/// a payment order code that ties a checkout to the provider's later
/// callback, under their own scope.
///
/// Tokens are not a projection of some other store, so this ignores the
/// cache kill switch: turning caching off must not strand every pending
/// callback.
#[derive(Clone)]
pub struct ShortLivedTokenStore {
    store: CacheStore,
    scope: String,
    fallback_ttl: Duration,
}

impl ShortLivedTokenStore {
    /// Creates a token store over `store` writing under `scope`.
    pub fn new(store: &CacheStore, scope: impl Into<String>, fallback_ttl: Duration) -> TesseraResult<Self> {
        let scope = scope.into();
        // Validate the scope once so later key errors can only come from tokens.
        store.codec().key(&scope, "check")?;
        Ok(Self {
            store: store.clone().with_enabled(true),
            scope,
            fallback_ttl,
        })
    }

    /// Creates a token store from cache configuration.
    pub fn from_config(store: &CacheStore, config: &CacheConfig) -> TesseraResult<Self> {
        Self::new(store, config.token_scope.clone(), config.token_fallback_ttl())
    }

    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// TTL used for a requested expiry; zero falls back to the configured default.
    #[must_use]
    pub fn effective_ttl(&self, ttl: Duration) -> Duration {
        if ttl.is_zero() {
            self.fallback_ttl
        } else {
            ttl
        }
    }

    fn key(&self, token: &str) -> TesseraResult<CacheKey> {
        self.store.codec().key(&self.scope, token)
    }

    /// Stores `value` under `token`. Fails only if `token` is empty.
    pub async fn set<T>(&self, token: &str, value: &T, ttl: Duration) -> TesseraResult<()>
    where
        T: Serialize + ?Sized + Sync,
    {
        let key = self.key(token)?;
        self.store.set(&key, value, self.effective_ttl(ttl)).await;
        Ok(())
    }

    /// Reads a token without consuming it.
    pub async fn get<T: DeserializeOwned>(&self, token: &str) -> Option<T> {
        let key = self.key(token).ok()?;
        self.store.get(&key).await
    }

    /// Reads and consumes a token.
    pub async fn take<T: DeserializeOwned>(&self, token: &str) -> Option<T> {
        let key = self.key(token).ok()?;
        self.store.take(&key).await
    }

    /// Deletes a token. Returns true if it existed.
    pub async fn remove(&self, token: &str) -> bool {
        match self.key(token) {
            Ok(key) => self.store.remove(&key).await,
            Err(_) => false,
        }
    }
}
