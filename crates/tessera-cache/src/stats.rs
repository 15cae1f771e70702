//! In-process cache statistics.

use crate::metrics::CacheMetrics;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters for one cache instance.
///
/// Every `record_*` call also feeds the global metrics recorder. The local
/// counters are only updated when statistics are enabled.
#[derive(Debug)]
pub struct CacheStatistics {
    enabled: bool,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    sets: AtomicU64,
    removals: AtomicU64,
    fetches: AtomicU64,
    fetch_failures: AtomicU64,
    stampedes_prevented: AtomicU64,
}

/// Point-in-time copy of [`CacheStatistics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatisticsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub sets: u64,
    pub removals: u64,
    pub fetches: u64,
    pub fetch_failures: u64,
    pub stampedes_prevented: u64,
}

impl StatisticsSnapshot {
    /// Fraction of reads served from the cache, or 0 when nothing was read.
    #[must_use]
    pub fn hit_ratio(&self) -> f64 {
        let reads = self.hits + self.misses;
        if reads == 0 {
            return 0.0;
        }
        self.hits as f64 / reads as f64
    }
}

impl Default for CacheStatistics {
    fn default() -> Self {
        Self::new(true)
    }
}

impl CacheStatistics {
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            removals: AtomicU64::new(0),
            fetches: AtomicU64::new(0),
            fetch_failures: AtomicU64::new(0),
            stampedes_prevented: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn bump(&self, counter: &AtomicU64) {
        if self.enabled {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_hit(&self) {
        CacheMetrics::hit();
        self.bump(&self.hits);
    }

    pub fn record_miss(&self) {
        CacheMetrics::miss();
        self.bump(&self.misses);
    }

    pub fn record_error(&self, operation: &'static str) {
        CacheMetrics::error(operation);
        self.bump(&self.errors);
    }

    pub fn record_set(&self) {
        self.bump(&self.sets);
    }

    pub fn record_removal(&self, count: u64) {
        if self.enabled {
            self.removals.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub fn record_fetch(&self, duration: Duration) {
        CacheMetrics::fetch("success", duration);
        self.bump(&self.fetches);
    }

    pub fn record_fetch_failure(&self, duration: Duration) {
        CacheMetrics::fetch("failure", duration);
        self.bump(&self.fetches);
        self.bump(&self.fetch_failures);
    }

    pub fn record_stampede_prevented(&self) {
        CacheMetrics::stampede_prevented();
        self.bump(&self.stampedes_prevented);
    }

    /// Returns a copy of the current counters.
    #[must_use]
    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            stampedes_prevented: self.stampedes_prevented.load(Ordering::Relaxed),
        }
    }

    /// Zeroes every counter.
    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.errors,
            &self.sets,
            &self.removals,
            &self.fetches,
            &self.fetch_failures,
            &self.stampedes_prevented,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
