//! Runtime wiring of the cache and the invalidation pipeline.

use std::sync::Arc;
use std::time::Duration;
use tessera_cache::{CacheModule, CacheStatistics};
use tessera_config::AppConfig;
use tessera_core::TesseraResult;
use tessera_events::{
    CacheEvictionHandler, InMemoryTransport, InvalidationConsumer, InvalidationPublisher,
    InvalidationTransport, RedisStreamTransport,
};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// A running server: cache components plus the background tasks feeding them.
pub struct App {
    cache: CacheModule,
    publisher: Arc<InvalidationPublisher>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl App {
    /// Builds the cache and starts the consumer, publisher and statistics tasks.
    ///
    /// With the Redis backend invalidations travel over a Redis stream on the
    /// same pool. The memory backend gets an in-process transport.
    pub async fn start(config: &AppConfig) -> TesseraResult<Self> {
        let (cache, pool) = CacheModule::build(config).await?;
        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        let publisher = if config.invalidation.enabled {
            let handler = Arc::new(CacheEvictionHandler::from_config(
                cache.store.clone(),
                &config.invalidation,
            ));
            let consumer = InvalidationConsumer::new(handler, &config.invalidation);
            let token = cancel.clone();

            let transport: Arc<dyn InvalidationTransport> = match pool {
                Some(pool) => {
                    let consumer_pool = pool.clone();
                    tasks.push(tokio::spawn(async move { consumer.run(consumer_pool, token).await }));
                    Arc::new(RedisStreamTransport::new(pool, config.invalidation.stream_max_len))
                }
                None => {
                    let transport = InMemoryTransport::default();
                    let receiver = transport.subscribe();
                    tasks.push(tokio::spawn(async move { consumer.run_local(receiver, token).await }));
                    Arc::new(transport)
                }
            };

            InvalidationPublisher::spawn(transport, &config.invalidation)
        } else {
            info!("Cross-service invalidation disabled");
            InvalidationPublisher::disabled()
        };

        if let Some(period) = config.observability.statistics_interval() {
            tasks.push(tokio::spawn(report_statistics(
                Arc::clone(&cache.statistics),
                period,
                cancel.clone(),
            )));
        }

        info!(tasks = tasks.len(), "Tessera server started");

        Ok(Self {
            cache,
            publisher: Arc::new(publisher),
            cancel,
            tasks,
        })
    }

    pub fn cache(&self) -> &CacheModule {
        &self.cache
    }

    pub fn publisher(&self) -> &Arc<InvalidationPublisher> {
        &self.publisher
    }

    /// Drains pending invalidations, then stops the background tasks.
    pub async fn shutdown(self) {
        self.publisher.shutdown().await;
        self.cancel.cancel();

        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Background task panicked");
            }
        }

        let snapshot = self.cache.statistics.snapshot();
        info!(
            hits = snapshot.hits,
            misses = snapshot.misses,
            stampedes_prevented = snapshot.stampedes_prevented,
            "Final cache statistics"
        );
    }
}

async fn report_statistics(statistics: Arc<CacheStatistics>, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let snapshot = statistics.snapshot();
                info!(
                    hits = snapshot.hits,
                    misses = snapshot.misses,
                    errors = snapshot.errors,
                    sets = snapshot.sets,
                    removals = snapshot.removals,
                    fetches = snapshot.fetches,
                    fetch_failures = snapshot.fetch_failures,
                    stampedes_prevented = snapshot.stampedes_prevented,
                    hit_ratio = snapshot.hit_ratio(),
                    "Cache statistics"
                );
            }
        }
    }
}
