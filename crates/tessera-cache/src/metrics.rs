//! Prometheus metrics for cache monitoring.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Duration;

/// Metric names for the cache.
pub mod names {
    /// Total cache hits.
    pub const CACHE_HITS_TOTAL: &str = "tessera_cache_hits_total";
    /// Total cache misses.
    pub const CACHE_MISSES_TOTAL: &str = "tessera_cache_misses_total";
    /// Total backend or deserialization errors absorbed by the cache.
    pub const CACHE_ERRORS_TOTAL: &str = "tessera_cache_errors_total";
    /// Total callers that waited on another caller's fetch.
    pub const CACHE_STAMPEDES_PREVENTED_TOTAL: &str = "tessera_cache_stampedes_prevented_total";
    /// Total fetches run against the source of truth.
    pub const CACHE_FETCHES_TOTAL: &str = "tessera_cache_fetches_total";

    /// Fetch duration in seconds.
    pub const CACHE_FETCH_DURATION_SECONDS: &str = "tessera_cache_fetch_duration_seconds";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(names::CACHE_HITS_TOTAL, "Total number of cache hits");
    describe_counter!(names::CACHE_MISSES_TOTAL, "Total number of cache misses");
    describe_counter!(
        names::CACHE_ERRORS_TOTAL,
        "Total number of cache errors degraded to a miss"
    );
    describe_counter!(
        names::CACHE_STAMPEDES_PREVENTED_TOTAL,
        "Total number of callers that waited for an in-flight fetch"
    );
    describe_counter!(
        names::CACHE_FETCHES_TOTAL,
        "Total number of fetches against the source of truth"
    );

    describe_histogram!(
        names::CACHE_FETCH_DURATION_SECONDS,
        "Source fetch duration in seconds"
    );
}

/// Cache metrics recorder.
#[derive(Clone)]
pub struct CacheMetrics;

impl CacheMetrics {
    /// Record a cache hit.
    pub fn hit() {
        counter!(names::CACHE_HITS_TOTAL).increment(1);
    }

    /// Record a cache miss.
    pub fn miss() {
        counter!(names::CACHE_MISSES_TOTAL).increment(1);
    }

    /// Record an absorbed error.
    pub fn error(operation: &'static str) {
        counter!(names::CACHE_ERRORS_TOTAL, "operation" => operation).increment(1);
    }

    /// Record a caller that waited instead of fetching.
    pub fn stampede_prevented() {
        counter!(names::CACHE_STAMPEDES_PREVENTED_TOTAL).increment(1);
    }

    /// Record a completed fetch.
    pub fn fetch(outcome: &'static str, duration: Duration) {
        counter!(names::CACHE_FETCHES_TOTAL, "outcome" => outcome).increment(1);
        histogram!(names::CACHE_FETCH_DURATION_SECONDS, "outcome" => outcome)
            .record(duration.as_secs_f64());
    }
}
