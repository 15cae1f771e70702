//! Wiring of the cache components for one service.

use crate::backend::{CacheBackend, InMemoryCacheBackend, RedisCacheBackend};
use crate::coalescer::StampedeCoalescer;
use crate::pool::create_pool;
use crate::stats::CacheStatistics;
use crate::store::CacheStore;
use crate::token_store::ShortLivedTokenStore;
use deadpool_redis::Pool;
use std::sync::Arc;
use tessera_config::{AppConfig, CacheBackendKind, CacheConfig};
use tessera_core::TesseraResult;
use tracing::info;

/// The cache components a service needs, sharing one backend and one set of
/// statistics.
#[derive(Clone)]
pub struct CacheModule {
    pub store: CacheStore,
    pub coalescer: Arc<StampedeCoalescer>,
    pub tokens: ShortLivedTokenStore,
    pub statistics: Arc<CacheStatistics>,
}

impl CacheModule {
    /// Builds the module over an existing backend.
    pub fn with_backend(backend: Arc<dyn CacheBackend>, config: &CacheConfig) -> TesseraResult<Self> {
        let store = CacheStore::from_config(backend, config)?;
        let statistics = Arc::clone(store.statistics());
        let tokens = ShortLivedTokenStore::from_config(&store, config)?;
        let coalescer = Arc::new(StampedeCoalescer::new(store.clone(), config));

        info!(
            backend = store.backend_name(),
            prefix = store.codec().prefix(),
            enabled = store.is_enabled(),
            "Cache module initialized"
        );

        Ok(Self {
            store,
            coalescer,
            tokens,
            statistics,
        })
    }

    /// Builds the module for the configured backend.
    ///
    /// Returns the Redis pool as well when one was created, so other
    /// components can share it.
    pub async fn build(config: &AppConfig) -> TesseraResult<(Self, Option<Pool>)> {
        match config.cache.backend {
            CacheBackendKind::Redis => {
                let pool = create_pool(&config.redis).await?;
                let backend: Arc<dyn CacheBackend> = Arc::new(RedisCacheBackend::new(pool.clone()));
                Ok((Self::with_backend(backend, &config.cache)?, Some(pool)))
            }
            CacheBackendKind::Memory => {
                let backend: Arc<dyn CacheBackend> = Arc::new(InMemoryCacheBackend::new());
                Ok((Self::with_backend(backend, &config.cache)?, None))
            }
        }
    }
}
