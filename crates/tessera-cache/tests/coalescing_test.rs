//! Concurrency tests for get-or-fetch coalescing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tessera_cache::{
    scopes, CacheKey, CacheStore, GetOrFetchError, InMemoryCacheBackend, StampedeCoalescer,
};
use tessera_config::CacheConfig;
use tessera_core::TesseraError;
use tokio::sync::Barrier;
use tokio_util::sync::CancellationToken;

const TTL: Duration = Duration::from_secs(60);

fn coalescer() -> Arc<StampedeCoalescer> {
    let config = CacheConfig::default();
    let store = CacheStore::from_config(Arc::new(InMemoryCacheBackend::new()), &config)
        .expect("valid config");
    Arc::new(StampedeCoalescer::new(store, &config))
}

fn user_key(cache: &StampedeCoalescer, id: &str) -> CacheKey {
    cache.store().codec().key(scopes::USER, id).expect("valid key")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_cold_reads_fetch_once() {
    const CALLERS: usize = 50;

    let cache = coalescer();
    let key = user_key(&cache, "cold");
    let calls = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(CALLERS));
    let started = Instant::now();

    let tasks: Vec<_> = (0..CALLERS)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let key = key.clone();
            let calls = Arc::clone(&calls);
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                cache
                    .get_or_fetch(&key, TTL, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok::<_, TesseraError>(Some("profile".to_string()))
                    })
                    .await
            })
        })
        .collect();

    for task in tasks {
        let value = task.await.expect("task panicked").expect("fetch succeeded");
        assert_eq!(value.as_deref(), Some("profile"));
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(started.elapsed() < Duration::from_secs(1));

    let stats = cache.store().statistics().snapshot();
    assert_eq!(stats.fetches, 1);
    assert!(stats.stampedes_prevented >= 1);
    // One hit or miss per call, however long it waited.
    assert_eq!(stats.hits + stats.misses, CALLERS as u64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn distinct_keys_fetch_independently() {
    let cache = coalescer();
    let calls = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..10)
        .map(|i| {
            let cache = Arc::clone(&cache);
            let key = user_key(&cache, &i.to_string());
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                cache
                    .get_or_fetch(&key, TTL, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, TesseraError>(Some(i))
                    })
                    .await
            })
        })
        .collect();

    for (i, task) in tasks.into_iter().enumerate() {
        assert_eq!(task.await.unwrap().unwrap(), Some(i));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_fetch_hands_over_to_waiter() {
    let cache = coalescer();
    let key = user_key(&cache, "flaky");
    let calls = Arc::new(AtomicUsize::new(0));

    let first = {
        let cache = Arc::clone(&cache);
        let key = key.clone();
        let calls = Arc::clone(&calls);
        tokio::spawn(async move {
            cache
                .get_or_fetch::<String, _, _, _>(&key, TTL, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Err(TesseraError::internal("source unavailable"))
                })
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;

    let second = {
        let cache = Arc::clone(&cache);
        let key = key.clone();
        let calls = Arc::clone(&calls);
        tokio::spawn(async move {
            cache
                .get_or_fetch(&key, TTL, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, TesseraError>(Some("fresh".to_string()))
                })
                .await
        })
    };

    let first = first.await.unwrap();
    assert!(matches!(first, Err(GetOrFetchError::Fetch(_))));

    let second = second.await.unwrap().unwrap();
    assert_eq!(second.as_deref(), Some("fresh"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.store().get::<String>(&key).await.as_deref(), Some("fresh"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancelled_waiter_leaves_fetch_running() {
    let cache = coalescer();
    let key = user_key(&cache, "slow");

    let fetcher = {
        let cache = Arc::clone(&cache);
        let key = key.clone();
        tokio::spawn(async move {
            cache
                .get_or_fetch(&key, TTL, || async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok::<_, TesseraError>(Some(7u32))
                })
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;

    let token = CancellationToken::new();
    let waiter = {
        let cache = Arc::clone(&cache);
        let key = key.clone();
        let token = token.clone();
        tokio::spawn(async move {
            cache
                .get_or_fetch_with_cancellation(&key, TTL, &token, || async {
                    Ok::<_, TesseraError>(Some(0u32))
                })
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    token.cancel();

    let waited = waiter.await.unwrap();
    assert!(waited.unwrap_err().is_cancelled());

    assert_eq!(fetcher.await.unwrap().unwrap(), Some(7));
    assert_eq!(cache.store().get::<u32>(&key).await, Some(7));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancelled_fetcher_keeps_fetch_running_for_waiters() {
    const WAITERS: usize = 9;

    let cache = coalescer();
    let key = user_key(&cache, "abandoned");
    let calls = Arc::new(AtomicUsize::new(0));

    let call = |token: CancellationToken| {
        let cache = Arc::clone(&cache);
        let key = key.clone();
        let calls = Arc::clone(&calls);
        tokio::spawn(async move {
            cache
                .get_or_fetch_with_cancellation(&key, TTL, &token, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok::<_, TesseraError>(Some(1u32))
                })
                .await
        })
    };

    let fetcher_token = CancellationToken::new();
    let fetcher = call(fetcher_token.clone());
    tokio::time::sleep(Duration::from_millis(10)).await;

    let waiters: Vec<_> = (0..WAITERS).map(|_| call(CancellationToken::new())).collect();
    tokio::time::sleep(Duration::from_millis(20)).await;
    fetcher_token.cancel();

    assert!(fetcher.await.unwrap().unwrap_err().is_cancelled());
    for waiter in waiters {
        assert_eq!(waiter.await.unwrap().unwrap(), Some(1));
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.store().get::<u32>(&key).await, Some(1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stale_repopulation_after_concurrent_invalidation_is_bounded_by_ttl() {
    let cache = coalescer();
    let key = user_key(&cache, "racy");

    // The fetch reads the old value, then an invalidation lands before the
    // fetch writes it back.
    let fetcher = {
        let cache = Arc::clone(&cache);
        let key = key.clone();
        tokio::spawn(async move {
            cache
                .get_or_fetch(&key, Duration::from_millis(300), || async {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok::<_, TesseraError>(Some("old".to_string()))
                })
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!cache.store().remove(&key).await);

    fetcher.await.unwrap().unwrap();
    assert_eq!(cache.store().get::<String>(&key).await.as_deref(), Some("old"));

    // 300ms with 10% jitter is at most 330ms.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(cache.store().get::<String>(&key).await, None);
}

#[tokio::test(start_paused = true)]
async fn lock_entries_are_pruned_after_release() {
    let config = CacheConfig::default();
    let store = CacheStore::from_config(Arc::new(InMemoryCacheBackend::new()), &config).unwrap();
    let cache = StampedeCoalescer::new(store, &config);

    for i in 0..5 {
        let key = user_key(&cache, &i.to_string());
        cache
            .get_or_fetch(&key, TTL, move || async move { Ok::<_, TesseraError>(Some(i)) })
            .await
            .unwrap();
    }
    assert_eq!(cache.lock_table().len(), 5);

    tokio::time::sleep(config.lock_cleanup_delay() + Duration::from_secs(1)).await;
    assert!(cache.lock_table().is_empty());
}
