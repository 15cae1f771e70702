//! # Tessera Cache
//!
//! Read-through cache over a shared key-value store.
//!
//! - [`KeyCodec`] builds `{prefix}:{scope}:{identifier}` keys and scopes
//!   pattern deletes to the configured prefix.
//! - [`CacheStore`] wraps a [`CacheBackend`] with typed, never-failing
//!   get/set/remove and batch operations.
//! - [`StampedeCoalescer`] implements get-or-fetch with one in-flight fetch
//!   per key, so a cold key under concurrent load hits the source once.
//! - [`TtlJitter`] spreads expirations so entries written together do not
//!   expire together.
//! - [`ShortLivedTokenStore`] keeps externally keyed, single-use tokens.
//!
//! # Consistency
//!
//! The cache is a disposable projection of the authoritative store; losing
//! every entry only costs extra fetches. Entries carry no version, so a fetch
//! that started before an invalidation can write its (now stale) result after
//! the eviction. That entry lives until its TTL expires or the next
//! invalidation arrives.

pub mod backend;
mod coalescer;
mod jitter;
mod keys;
mod lock_table;
pub mod metrics;
mod module;
mod pool;
mod stats;
mod store;
mod token_store;

pub use backend::{CacheBackend, InMemoryCacheBackend, RedisCacheBackend};
pub use coalescer::{GetOrFetchError, StampedeCoalescer};
pub use jitter::TtlJitter;
pub use keys::{glob_match, scopes, CacheKey, KeyCodec};
pub use lock_table::{Acquisition, ContendedLock, LockLease, LockTable};
pub use module::CacheModule;
pub use pool::create_pool;
pub use stats::{CacheStatistics, StatisticsSnapshot};
pub use store::CacheStore;
pub use token_store::ShortLivedTokenStore;
