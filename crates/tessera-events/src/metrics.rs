//! Prometheus metrics for invalidation delivery.

use metrics::{counter, describe_counter};

/// Metric names for invalidation events.
pub mod names {
    /// Total events delivered to the transport.
    pub const INVALIDATIONS_PUBLISHED_TOTAL: &str = "tessera_invalidations_published_total";
    /// Total events dropped (queue full, serialization, retries exhausted).
    pub const INVALIDATIONS_FAILED_TOTAL: &str = "tessera_invalidations_failed_total";
    /// Total events read by a consumer.
    pub const INVALIDATIONS_CONSUMED_TOTAL: &str = "tessera_invalidations_consumed_total";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(
        names::INVALIDATIONS_PUBLISHED_TOTAL,
        "Total number of invalidation events delivered to the transport"
    );
    describe_counter!(
        names::INVALIDATIONS_FAILED_TOTAL,
        "Total number of invalidation events that could not be delivered"
    );
    describe_counter!(
        names::INVALIDATIONS_CONSUMED_TOTAL,
        "Total number of invalidation events read by this service"
    );
}

/// Invalidation metrics recorder.
#[derive(Clone)]
pub struct InvalidationMetrics;

impl InvalidationMetrics {
    /// Record an event accepted by the transport.
    pub fn published(kind: &'static str) {
        counter!(names::INVALIDATIONS_PUBLISHED_TOTAL, "type" => kind).increment(1);
    }

    /// Record an event that was dropped.
    pub fn failed(reason: &'static str) {
        counter!(names::INVALIDATIONS_FAILED_TOTAL, "reason" => reason).increment(1);
    }

    /// Record a consumed event.
    pub fn consumed(outcome: &'static str) {
        counter!(names::INVALIDATIONS_CONSUMED_TOTAL, "outcome" => outcome).increment(1);
    }
}
