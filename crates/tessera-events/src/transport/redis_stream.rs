//! Redis Streams transport.

use super::{DeliveryReceipt, InvalidationTransport};
use async_trait::async_trait;
use deadpool_redis::redis::streams::StreamMaxlen;
use deadpool_redis::redis::AsyncCommands;
use deadpool_redis::Pool;
use tessera_core::{TesseraError, TesseraResult};

const TRANSPORT: &str = "redis-stream";

/// Appends events to a Redis stream with `XADD … MAXLEN ~ N`.
///
/// Entry fields are `key` (routing key) and `payload` (event JSON). The
/// entry id Redis assigns is the delivery receipt.
#[derive(Clone)]
pub struct RedisStreamTransport {
    pool: Pool,
    max_len: usize,
}

impl RedisStreamTransport {
    #[must_use]
    pub fn new(pool: Pool, max_len: usize) -> Self {
        Self { pool, max_len }
    }
}

#[async_trait]
impl InvalidationTransport for RedisStreamTransport {
    fn name(&self) -> &'static str {
        TRANSPORT
    }

    async fn send(
        &self,
        topic: &str,
        routing_key: &str,
        payload: &str,
    ) -> TesseraResult<DeliveryReceipt> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| TesseraError::transport(TRANSPORT, e.to_string()))?;

        let id: String = conn
            .xadd_maxlen(
                topic,
                StreamMaxlen::Approx(self.max_len),
                "*",
                &[("key", routing_key), ("payload", payload)],
            )
            .await
            .map_err(|e| TesseraError::transport(TRANSPORT, e.to_string()))?;

        Ok(DeliveryReceipt { id })
    }
}
