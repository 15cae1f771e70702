//! Redis connection pool.

use deadpool_redis::{redis, Config, Pool, Runtime};
use tessera_config::RedisConfig;
use tessera_core::{TesseraError, TesseraResult};
use tracing::info;

/// Create a Redis connection pool and verify it with `PING`.
pub async fn create_pool(config: &RedisConfig) -> TesseraResult<Pool> {
    info!(pool_size = config.pool_size, "Creating Redis connection pool for cache...");

    let cfg = Config::from_url(&config.url);

    let pool = cfg
        .builder()
        .map_err(|e| TesseraError::Configuration(format!("Invalid Redis config: {}", e)))?
        .max_size(config.pool_size)
        .runtime(Runtime::Tokio1)
        .wait_timeout(Some(config.connect_timeout()))
        .create_timeout(Some(config.connect_timeout()))
        .build()
        .map_err(|e| TesseraError::Configuration(format!("Failed to create pool: {}", e)))?;

    // Test connection
    let mut conn = pool.get().await?;
    redis::cmd("PING").query_async::<String>(&mut *conn).await?;

    info!("Redis connection pool created successfully");

    Ok(pool)
}
