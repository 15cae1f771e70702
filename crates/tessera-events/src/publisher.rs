//! Fire-and-forget invalidation publishing.

use crate::event::{InvalidationEvent, InvalidationType};
use crate::metrics::InvalidationMetrics;
use crate::retry::RetryPolicy;
use crate::transport::InvalidationTransport;
use parking_lot::Mutex;
use std::sync::Arc;
use tessera_config::InvalidationConfig;
use tessera_core::EntityId;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Publishes invalidation events without ever failing the caller.
///
/// `publish` enqueues on a bounded queue and returns immediately. A
/// background worker sends each event through the transport, retrying with
/// backoff, and logs any event it finally has to drop.
pub struct InvalidationPublisher {
    sender: Option<mpsc::Sender<InvalidationEvent>>,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct DeliveryWorker {
    transport: Arc<dyn InvalidationTransport>,
    topic: String,
    retry: RetryPolicy,
}

impl InvalidationPublisher {
    /// Starts a publisher and its delivery worker on the current runtime.
    #[must_use]
    pub fn spawn(transport: Arc<dyn InvalidationTransport>, config: &InvalidationConfig) -> Self {
        if !config.enabled {
            info!("Invalidation publishing disabled");
            return Self::disabled();
        }

        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let shutdown = CancellationToken::new();
        let worker = DeliveryWorker {
            transport,
            topic: config.topic.clone(),
            retry: RetryPolicy::from_config(config),
        };

        info!(
            topic = %config.topic,
            transport = worker.transport.name(),
            queue_capacity = config.queue_capacity,
            "Starting invalidation publisher"
        );
        let handle = tokio::spawn(worker.run(receiver, shutdown.clone()));

        Self {
            sender: Some(sender),
            shutdown,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// A publisher that drops every event.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            sender: None,
            shutdown: CancellationToken::new(),
            worker: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.sender.is_some()
    }

    /// Announces that `entity_id` changed.
    pub fn publish(&self, entity_id: EntityId, kind: InvalidationType, reason: Option<&str>) {
        let mut event = InvalidationEvent::new(entity_id, kind);
        if let Some(reason) = reason {
            event = event.with_reason(reason);
        }
        self.enqueue(event);
    }

    /// Announces the same change for several entities, one event each.
    pub fn publish_many<I>(&self, entity_ids: I, kind: InvalidationType, reason: Option<&str>)
    where
        I: IntoIterator<Item = EntityId>,
    {
        for entity_id in entity_ids {
            self.publish(entity_id, kind, reason);
        }
    }

    /// Enqueues a prepared event.
    pub fn enqueue(&self, event: InvalidationEvent) {
        let Some(sender) = &self.sender else {
            return;
        };

        match sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(entity_id = %event.entity_id, kind = %event.kind, "Invalidation queue full, dropping event");
                InvalidationMetrics::failed("queue_full");
            }
            Err(TrySendError::Closed(event)) => {
                warn!(entity_id = %event.entity_id, kind = %event.kind, "Invalidation publisher stopped, dropping event");
                InvalidationMetrics::failed("closed");
            }
        }
    }

    /// Stops accepting events and waits until queued ones are delivered or dropped.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Invalidation delivery worker panicked");
            }
            info!("Invalidation publisher stopped");
        }
    }
}

impl Drop for InvalidationPublisher {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl DeliveryWorker {
    async fn run(self, mut receiver: mpsc::Receiver<InvalidationEvent>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                next = receiver.recv() => match next {
                    Some(event) => self.deliver(event).await,
                    None => return,
                },
            }
        }

        // Drain what was queued before shutdown.
        receiver.close();
        let mut drained = 0usize;
        while let Some(event) = receiver.recv().await {
            self.deliver(event).await;
            drained += 1;
        }
        debug!(drained, "Invalidation queue drained");
    }

    async fn deliver(&self, event: InvalidationEvent) {
        let payload = match event.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                error!(entity_id = %event.entity_id, error = %e, "Failed to serialize invalidation event");
                InvalidationMetrics::failed("serialization");
                return;
            }
        };
        let routing_key = event.routing_key();

        let result = self
            .retry
            .execute(|| self.transport.send(&self.topic, &routing_key, &payload))
            .await;

        match result {
            Ok(receipt) => {
                debug!(
                    entity_id = %event.entity_id,
                    kind = %event.kind,
                    receipt = %receipt.id,
                    "Invalidation published"
                );
                InvalidationMetrics::published(event.kind.as_str());
            }
            Err(e) => {
                error!(
                    entity_id = %event.entity_id,
                    kind = %event.kind,
                    attempts = self.retry.max_attempts,
                    error = %e,
                    "Dropping invalidation after retries"
                );
                InvalidationMetrics::failed("retries_exhausted");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{DeliveryReceipt, InMemoryTransport};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tessera_core::{TesseraError, TesseraResult};

    fn config() -> InvalidationConfig {
        InvalidationConfig {
            retry_initial_delay_ms: 1,
            retry_max_delay_ms: 5,
            ..InvalidationConfig::default()
        }
    }

    /// Transport that fails the first `failures` sends.
    struct FlakyTransport {
        failures: usize,
        calls: AtomicUsize,
        inner: InMemoryTransport,
    }

    impl FlakyTransport {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                calls: AtomicUsize::new(0),
                inner: InMemoryTransport::default(),
            }
        }
    }

    #[async_trait]
    impl InvalidationTransport for FlakyTransport {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn send(&self, topic: &str, key: &str, payload: &str) -> TesseraResult<DeliveryReceipt> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(TesseraError::transport("flaky", "broker unavailable"));
            }
            self.inner.send(topic, key, payload).await
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let transport = InMemoryTransport::default();
        let mut rx = transport.subscribe();
        let publisher = InvalidationPublisher::spawn(Arc::new(transport), &config());

        let id = EntityId::new();
        publisher.publish(id, InvalidationType::ProfileUpdated, Some("name changed"));

        let message = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.topic, "tessera.cache.invalidation");
        assert_eq!(message.routing_key, id.to_string());

        let event = InvalidationEvent::from_json(&message.payload).unwrap();
        assert_eq!(event.entity_id, id);
        assert_eq!(event.reason.as_deref(), Some("name changed"));
        publisher.shutdown().await;
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let transport = Arc::new(FlakyTransport::new(2));
        let mut rx = transport.inner.subscribe();
        let publisher = InvalidationPublisher::spawn(transport.clone(), &config());

        publisher.publish(EntityId::new(), InvalidationType::StatusChanged, None);
        publisher.shutdown().await;

        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_permanent_failure_never_reaches_caller() {
        let transport = Arc::new(FlakyTransport::new(usize::MAX));
        let publisher = InvalidationPublisher::spawn(transport.clone(), &config());

        publisher.publish_many(
            [EntityId::new(), EntityId::new()],
            InvalidationType::Deleted,
            Some("bulk delete"),
        );
        publisher.shutdown().await;

        // Two events, four attempts each.
        assert_eq!(transport.calls.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue() {
        let transport = InMemoryTransport::default();
        let mut rx = transport.subscribe();
        let publisher = InvalidationPublisher::spawn(Arc::new(transport), &config());

        let ids: Vec<EntityId> = (0..20).map(|_| EntityId::new()).collect();
        publisher.publish_many(ids.clone(), InvalidationType::UserUpdated, None);
        publisher.shutdown().await;

        let mut received = Vec::new();
        while let Ok(message) = rx.try_recv() {
            received.push(message.routing_key);
        }
        let expected: Vec<String> = ids.iter().map(ToString::to_string).collect();
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn test_publish_after_shutdown_is_swallowed() {
        let publisher = InvalidationPublisher::spawn(Arc::new(InMemoryTransport::default()), &config());
        publisher.shutdown().await;
        publisher.publish(EntityId::new(), InvalidationType::RoleChanged, None);
        publisher.shutdown().await;
    }

    #[tokio::test]
    async fn test_disabled_publisher_is_noop() {
        let config = InvalidationConfig {
            enabled: false,
            ..config()
        };
        let transport = InMemoryTransport::default();
        let mut rx = transport.subscribe();
        let publisher = InvalidationPublisher::spawn(Arc::new(transport), &config);

        assert!(!publisher.is_enabled());
        publisher.publish(EntityId::new(), InvalidationType::Deleted, None);
        publisher.shutdown().await;
        assert!(rx.try_recv().is_err());
    }
}
