//! Delivery channels for invalidation events.

mod memory;
mod redis_stream;

pub use memory::{InMemoryTransport, TransportMessage};
pub use redis_stream::RedisStreamTransport;

use async_trait::async_trait;
use shaku::Interface;
use tessera_core::TesseraResult;

/// Acknowledgement that a transport durably accepted a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// Transport-assigned message id (the stream entry id on Redis).
    pub id: String,
}

/// A durable, keyed message channel.
#[async_trait]
pub trait InvalidationTransport: Interface + Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Sends `payload` to `topic`, keyed by `routing_key`. Returns once the
    /// transport has acknowledged the message.
    async fn send(&self, topic: &str, routing_key: &str, payload: &str)
        -> TesseraResult<DeliveryReceipt>;
}
