//! Consuming invalidation events.

use crate::event::InvalidationEvent;
use crate::metrics::InvalidationMetrics;
use crate::transport::TransportMessage;
use async_trait::async_trait;
use deadpool_redis::redis::streams::{StreamReadOptions, StreamReadReply};
use deadpool_redis::redis::{AsyncCommands, RedisError};
use deadpool_redis::Pool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tessera_cache::CacheStore;
use tessera_config::InvalidationConfig;
use tessera_core::{TesseraError, TesseraResult};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Initial delay before reconnecting after a stream error.
const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(1);
/// Maximum delay between reconnection attempts.
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);
/// Delay before pending entries whose handler failed are read again.
const REDELIVERY_DELAY: Duration = Duration::from_secs(1);

/// Reacts to an invalidation event. Must be idempotent.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InvalidationHandler: Send + Sync {
    async fn handle(&self, event: &InvalidationEvent) -> TesseraResult<()>;
}

/// Evicts the changed entity from this service's cache in every configured
/// scope.
pub struct CacheEvictionHandler {
    store: CacheStore,
    scopes: Vec<String>,
}

impl CacheEvictionHandler {
    #[must_use]
    pub fn new(store: CacheStore, scopes: Vec<String>) -> Self {
        Self { store, scopes }
    }

    #[must_use]
    pub fn from_config(store: CacheStore, config: &InvalidationConfig) -> Self {
        Self::new(store, config.evict_scopes.clone())
    }
}

#[async_trait]
impl InvalidationHandler for CacheEvictionHandler {
    async fn handle(&self, event: &InvalidationEvent) -> TesseraResult<()> {
        let mut evicted = 0;
        for scope in &self.scopes {
            let key = self.store.codec().entity(scope, event.entity_id)?;
            if self.store.remove(&key).await {
                evicted += 1;
            }
        }
        debug!(
            entity_id = %event.entity_id,
            kind = %event.kind,
            evicted,
            "Applied invalidation"
        );
        Ok(())
    }
}

/// What to do with a message after dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Handled, or never handleable; acknowledge it.
    Ack,
    /// The handler failed; leave it pending for redelivery.
    Retry,
}

/// Reads invalidation events and feeds them to a handler.
pub struct InvalidationConsumer {
    handler: Arc<dyn InvalidationHandler>,
    topic: String,
    group: String,
    consumer: String,
    block: Duration,
    batch_size: usize,
    max_attempts: u32,
}

impl InvalidationConsumer {
    #[must_use]
    pub fn new(handler: Arc<dyn InvalidationHandler>, config: &InvalidationConfig) -> Self {
        Self {
            handler,
            topic: config.topic.clone(),
            group: config.consumer_group.clone(),
            consumer: config.consumer_name.clone(),
            block: config.read_block(),
            batch_size: config.read_batch_size.max(1),
            max_attempts: config.max_delivery_attempts.max(1),
        }
    }

    /// Parses one payload and runs the handler on it.
    ///
    /// Malformed payloads are logged and acknowledged so they cannot block
    /// the consumer group.
    pub async fn dispatch(&self, payload: &str) -> Disposition {
        let event = match InvalidationEvent::from_json(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(topic = %self.topic, error = %e, "Discarding malformed invalidation payload");
                InvalidationMetrics::consumed("malformed");
                return Disposition::Ack;
            }
        };

        match self.handler.handle(&event).await {
            Ok(()) => {
                InvalidationMetrics::consumed("handled");
                Disposition::Ack
            }
            Err(e) => {
                warn!(entity_id = %event.entity_id, kind = %event.kind, error = %e, "Invalidation handler failed");
                InvalidationMetrics::consumed("failed");
                Disposition::Retry
            }
        }
    }

    /// Dispatches one stream entry and decides whether to acknowledge it.
    ///
    /// Entries without a payload are acknowledged. An entry whose handler has
    /// failed `max_delivery_attempts` times is logged, counted and
    /// acknowledged so it stops coming back.
    async fn process_entry(
        &self,
        entry_id: &str,
        payload: Option<&str>,
        attempts: &mut DeliveryAttempts,
    ) -> Disposition {
        let disposition = match payload {
            Some(payload) => self.dispatch(payload).await,
            None => {
                warn!(entry_id, "Stream entry without payload");
                InvalidationMetrics::consumed("malformed");
                Disposition::Ack
            }
        };

        match disposition {
            Disposition::Ack => {
                attempts.clear(entry_id);
                Disposition::Ack
            }
            Disposition::Retry if attempts.record_failure(entry_id) => {
                error!(
                    entry_id,
                    topic = %self.topic,
                    attempts = self.max_attempts,
                    "Dropping invalidation after repeated handler failures"
                );
                InvalidationMetrics::consumed("exhausted");
                attempts.clear(entry_id);
                Disposition::Ack
            }
            Disposition::Retry => Disposition::Retry,
        }
    }

    /// Consumes from a Redis stream consumer group until `cancel` fires.
    ///
    /// Connection and command failures are logged and retried with capped
    /// exponential backoff.
    pub async fn run(&self, pool: Pool, cancel: CancellationToken) {
        info!(
            topic = %self.topic,
            group = %self.group,
            consumer = %self.consumer,
            "Starting invalidation consumer"
        );

        let mut attempts = DeliveryAttempts::new(self.max_attempts);
        let mut delay = INITIAL_RECONNECT_DELAY;
        while !cancel.is_cancelled() {
            match self.consume(&pool, &cancel, &mut delay, &mut attempts).await {
                Ok(()) => break,
                Err(e) => {
                    error!(error = %e, retry_in_secs = delay.as_secs(), "Invalidation consumer error, reconnecting");
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = cancel.cancelled() => break,
                    }
                    delay = (delay * 2).min(MAX_RECONNECT_DELAY);
                }
            }
        }

        info!(topic = %self.topic, "Invalidation consumer stopped");
    }

    /// One connected session. Returns `Ok` only when cancelled.
    async fn consume(
        &self,
        pool: &Pool,
        cancel: &CancellationToken,
        delay: &mut Duration,
        attempts: &mut DeliveryAttempts,
    ) -> TesseraResult<()> {
        let mut conn = pool
            .get()
            .await
            .map_err(|e| TesseraError::transport("redis-stream", e.to_string()))?;

        let created: Result<(), RedisError> = conn
            .xgroup_create_mkstream(&self.topic, &self.group, "$")
            .await;
        match created {
            Ok(()) => info!(topic = %self.topic, group = %self.group, "Created consumer group"),
            Err(e) if e.code() == Some("BUSYGROUP") => {}
            Err(e) => return Err(stream_error(e)),
        }
        *delay = INITIAL_RECONNECT_DELAY;

        let options = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(self.batch_size)
            .block(usize::try_from(self.block.as_millis()).unwrap_or(usize::MAX));

        let mut cursor = ReadCursor::new(REDELIVERY_DELAY);

        loop {
            let keys = [self.topic.as_str()];
            let ids = [cursor.next_id()];
            let read = conn.xread_options(&keys, &ids, &options);
            let reply: StreamReadReply = tokio::select! {
                reply = read => reply.map_err(stream_error)?,
                () = cancel.cancelled() => return Ok(()),
            };

            let mut last_id = None;
            let mut retry_needed = false;
            for stream in reply.keys {
                for entry in stream.ids {
                    let payload: Option<String> = entry.get("payload");
                    match self.process_entry(&entry.id, payload.as_deref(), attempts).await {
                        Disposition::Ack => {
                            let _: u64 = conn
                                .xack(&self.topic, &self.group, &[&entry.id])
                                .await
                                .map_err(stream_error)?;
                        }
                        Disposition::Retry => retry_needed = true,
                    }
                    last_id = Some(entry.id);
                }
            }

            cursor.advance(last_id, retry_needed);
        }
    }

    /// Consumes from an in-memory transport subscription until `cancel`
    /// fires or the transport is dropped.
    pub async fn run_local(
        &self,
        mut receiver: broadcast::Receiver<TransportMessage>,
        cancel: CancellationToken,
    ) {
        loop {
            let message = tokio::select! {
                message = receiver.recv() => message,
                () = cancel.cancelled() => break,
            };

            match message {
                Ok(message) if message.topic == self.topic => {
                    if self.dispatch(&message.payload).await == Disposition::Retry {
                        warn!(entry_id = %message.id, "In-memory transport cannot redeliver, event dropped");
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Invalidation consumer lagged, events skipped");
                    InvalidationMetrics::failed("lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

/// Where the next consumer-group read starts.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ReadPosition {
    /// Our own pending entries after this id.
    Pending(String),
    /// Entries never delivered to the group.
    New,
}

/// Alternates between new entries and bounded passes over the pending list.
///
/// A pending pass pages forward by id until a read comes back empty, so each
/// pending entry is seen at most once per pass and new entries are read
/// between passes. A failed entry schedules the next pass after the
/// redelivery delay.
#[derive(Debug)]
struct ReadCursor {
    position: ReadPosition,
    redelivery_delay: Duration,
    redelivery_due: Option<Instant>,
}

impl ReadCursor {
    /// Starts with a pass over entries left pending by a previous session.
    fn new(redelivery_delay: Duration) -> Self {
        Self {
            position: ReadPosition::Pending("0".to_string()),
            redelivery_delay,
            redelivery_due: None,
        }
    }

    fn next_id(&self) -> &str {
        match &self.position {
            ReadPosition::Pending(id) => id,
            ReadPosition::New => ">",
        }
    }

    fn advance(&mut self, last_id: Option<String>, retry_needed: bool) {
        if retry_needed && self.redelivery_due.is_none() {
            self.redelivery_due = Some(Instant::now() + self.redelivery_delay);
        }

        self.position = match (&self.position, last_id) {
            (ReadPosition::Pending(_), Some(last_id)) => ReadPosition::Pending(last_id),
            _ => ReadPosition::New,
        };

        if self.position == ReadPosition::New
            && self.redelivery_due.is_some_and(|due| Instant::now() >= due)
        {
            debug!("Re-reading pending invalidations");
            self.redelivery_due = None;
            self.position = ReadPosition::Pending("0".to_string());
        }
    }
}

/// Handler failures per pending entry.
#[derive(Debug)]
struct DeliveryAttempts {
    failures: HashMap<String, u32>,
    max: u32,
}

impl DeliveryAttempts {
    fn new(max: u32) -> Self {
        Self {
            failures: HashMap::new(),
            max,
        }
    }

    /// Records a failed attempt. Returns true once the entry is out of attempts.
    fn record_failure(&mut self, entry_id: &str) -> bool {
        let failures = self.failures.entry(entry_id.to_string()).or_insert(0);
        *failures += 1;
        *failures >= self.max
    }

    fn clear(&mut self, entry_id: &str) {
        self.failures.remove(entry_id);
    }
}

fn stream_error(err: RedisError) -> TesseraError {
    TesseraError::transport("redis-stream", err.to_string())
}
