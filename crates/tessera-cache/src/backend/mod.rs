//! Storage backends behind [`CacheStore`](crate::CacheStore).

mod memory;
mod redis;

pub use self::memory::InMemoryCacheBackend;
pub use self::redis::RedisCacheBackend;

use async_trait::async_trait;
use shaku::Interface;
use std::time::Duration;
use tessera_core::TesseraResult;

/// Raw string key-value operations against a shared store.
///
/// Backends report failures; [`CacheStore`](crate::CacheStore) decides how
/// to degrade.
#[async_trait]
pub trait CacheBackend: Interface + Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Gets a raw value.
    async fn get_raw(&self, key: &str) -> TesseraResult<Option<String>>;

    /// Sets a raw value that expires after `ttl`.
    async fn set_raw(&self, key: &str, value: &str, ttl: Duration) -> TesseraResult<()>;

    /// Deletes a key. Returns true if it existed.
    async fn delete(&self, key: &str) -> TesseraResult<bool>;

    /// Checks if a key exists.
    async fn exists(&self, key: &str) -> TesseraResult<bool>;

    /// Gets and deletes a key in one step.
    async fn take_raw(&self, key: &str) -> TesseraResult<Option<String>>;

    /// Lists keys matching a glob pattern.
    async fn scan_keys(&self, pattern: &str) -> TesseraResult<Vec<String>>;

    /// Deletes the given keys. Returns how many existed.
    async fn delete_many(&self, keys: &[String]) -> TesseraResult<u64>;

    /// Checks connectivity.
    async fn ping(&self) -> TesseraResult<()>;
}
