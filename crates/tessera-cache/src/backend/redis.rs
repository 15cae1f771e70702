//! Redis backend.

use super::CacheBackend;
use async_trait::async_trait;
use deadpool_redis::redis::{self, AsyncCommands};
use deadpool_redis::{Connection, Pool};
use std::time::Duration;
use tessera_core::{TesseraError, TesseraResult};
use tracing::debug;

/// Keys requested per SCAN round trip.
const SCAN_COUNT: usize = 500;

/// Redis-backed cache storage.
///
/// Uses `PSETEX` for millisecond TTLs, cursor-based `SCAN` for pattern
/// listing and `GETDEL` for atomic take.
#[derive(Clone)]
pub struct RedisCacheBackend {
    pool: Pool,
}

impl RedisCacheBackend {
    /// Creates a backend over an existing pool.
    #[must_use]
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Returns the underlying pool.
    #[must_use]
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    async fn get_conn(&self) -> TesseraResult<Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| TesseraError::Cache(format!("Failed to get Redis connection: {}", e)))
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl CacheBackend for RedisCacheBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get_raw(&self, key: &str) -> TesseraResult<Option<String>> {
        let mut conn = self.get_conn().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_raw(&self, key: &str, value: &str, ttl: Duration) -> TesseraResult<()> {
        let mut conn = self.get_conn().await?;
        redis::cmd("PSETEX")
            .arg(key)
            .arg(ttl_millis(ttl))
            .arg(value)
            .query_async::<()>(&mut *conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> TesseraResult<bool> {
        let mut conn = self.get_conn().await?;
        let removed: u64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> TesseraResult<bool> {
        let mut conn = self.get_conn().await?;
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    async fn take_raw(&self, key: &str) -> TesseraResult<Option<String>> {
        let mut conn = self.get_conn().await?;
        let value: Option<String> = redis::cmd("GETDEL")
            .arg(key)
            .query_async(&mut *conn)
            .await?;
        Ok(value)
    }

    async fn scan_keys(&self, pattern: &str) -> TesseraResult<Vec<String>> {
        let mut conn = self.get_conn().await?;
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut *conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once.
        keys.sort_unstable();
        keys.dedup();
        debug!(pattern = %pattern, count = keys.len(), "Scanned cache keys");
        Ok(keys)
    }

    async fn delete_many(&self, keys: &[String]) -> TesseraResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.get_conn().await?;
        let removed: u64 = conn.del(keys).await?;
        Ok(removed)
    }

    async fn ping(&self) -> TesseraResult<()> {
        let mut conn = self.get_conn().await?;
        redis::cmd("PING").query_async::<String>(&mut *conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_millis_has_floor() {
        assert_eq!(ttl_millis(Duration::ZERO), 1);
        assert_eq!(ttl_millis(Duration::from_micros(10)), 1);
        assert_eq!(ttl_millis(Duration::from_secs(2)), 2000);
    }
}
