//! In-process transport over a broadcast channel.

use super::{DeliveryReceipt, InvalidationTransport};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tessera_core::TesseraResult;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 1024;

/// A message as seen by in-memory subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportMessage {
    pub id: String,
    pub topic: String,
    pub routing_key: String,
    pub payload: String,
}

/// Broadcasts every sent message to all current subscribers.
///
/// For single-process deployments and tests. Sending with no subscribers
/// succeeds; there is simply nobody to notify.
#[derive(Clone)]
pub struct InMemoryTransport {
    sender: broadcast::Sender<TransportMessage>,
    sequence: Arc<AtomicU64>,
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl InMemoryTransport {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Subscribes to messages sent from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TransportMessage> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl InvalidationTransport for InMemoryTransport {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn send(
        &self,
        topic: &str,
        routing_key: &str,
        payload: &str,
    ) -> TesseraResult<DeliveryReceipt> {
        let id = format!("{}-0", self.sequence.fetch_add(1, Ordering::Relaxed) + 1);
        // Err only means there are no subscribers.
        let _ = self.sender.send(TransportMessage {
            id: id.clone(),
            topic: topic.to_string(),
            routing_key: routing_key.to_string(),
            payload: payload.to_string(),
        });
        Ok(DeliveryReceipt { id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_messages() {
        let transport = InMemoryTransport::default();
        let mut rx = transport.subscribe();

        let receipt = transport.send("topic", "key-1", "{}").await.unwrap();
        let message = rx.recv().await.unwrap();

        assert_eq!(message.id, receipt.id);
        assert_eq!(message.topic, "topic");
        assert_eq!(message.routing_key, "key-1");
        assert_eq!(message.payload, "{}");
    }

    #[test]
    fn test_send_without_subscribers_succeeds() {
        let transport = InMemoryTransport::new(4);
        let first = tokio_test::block_on(transport.send("t", "k", "a")).unwrap();
        let second = tokio_test::block_on(transport.send("t", "k", "b")).unwrap();
        assert_ne!(first.id, second.id);
    }
}
