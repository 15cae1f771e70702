//! # Tessera Events
//!
//! Propagates "this entity changed" notifications between services that
//! mirror the same entities in their caches.
//!
//! The writing side calls [`InvalidationPublisher::publish`], which enqueues
//! and returns; a background worker delivers through an
//! [`InvalidationTransport`] with retries. Each reading service runs an
//! [`InvalidationConsumer`] that hands events to an [`InvalidationHandler`],
//! typically a [`CacheEvictionHandler`].
//!
//! Delivery is at-least-once, so handlers must be idempotent.

mod consumer;
mod event;
pub mod metrics;
mod publisher;
pub mod retry;
pub mod transport;

pub use consumer::{CacheEvictionHandler, Disposition, InvalidationConsumer, InvalidationHandler};
pub use event::{InvalidationEvent, InvalidationType};
pub use publisher::InvalidationPublisher;
pub use retry::RetryPolicy;
pub use transport::{
    DeliveryReceipt, InMemoryTransport, InvalidationTransport, RedisStreamTransport,
    TransportMessage,
};
