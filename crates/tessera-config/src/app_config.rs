//! Application configuration structures.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tessera_core::telemetry::{LogFormat, TelemetryConfig};

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application name and metadata.
    #[serde(default)]
    pub app: AppMetadata,

    /// Redis configuration.
    #[serde(default)]
    pub redis: RedisConfig,

    /// Cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Invalidation event configuration.
    #[serde(default)]
    pub invalidation: InvalidationConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Application metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppMetadata {
    /// Application name.
    pub name: String,
    /// Application version.
    pub version: String,
    /// Environment (development, staging, production).
    pub environment: String,
}

impl Default for AppMetadata {
    fn default() -> Self {
        Self {
            name: "tessera".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
        }
    }
}

/// Redis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis URL.
    pub url: String,
    /// Connection pool size.
    pub pool_size: usize,
    /// Connection timeout in seconds.
    pub connect_timeout_secs: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 16,
            connect_timeout_secs: 5,
        }
    }
}

impl RedisConfig {
    /// Returns the connect timeout as a Duration.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Which key-value store backs the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    /// Shared Redis instance (multi-process deployments).
    #[default]
    Redis,
    /// Process-local map (single instance, tests).
    Memory,
}

/// Cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Global kill switch. When false every read misses and fetches always run.
    pub enabled: bool,
    /// Service prefix prepended to every key.
    pub key_prefix: String,
    /// Backing store.
    pub backend: CacheBackendKind,
    /// Default entry lifetime in minutes.
    pub default_expiration_minutes: u64,
    /// Lifetime of `user` scope entries in minutes.
    pub user_info_expiration_minutes: u64,
    /// Per-scope lifetime overrides in minutes.
    pub scope_expiration_minutes: HashMap<String, u64>,
    /// Randomization applied to every TTL, in percent (0-100).
    pub ttl_jitter_percent: u8,
    /// Idle time after which a coalescing lock is removed from the lock table.
    pub lock_cleanup_delay_minutes: u64,
    /// Count hits, misses and coalesced waits.
    pub enable_statistics: bool,
    /// Scope used by the short-lived token store.
    pub token_scope: String,
    /// Token lifetime used when the caller passes a zero TTL.
    pub token_fallback_expiration_minutes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            key_prefix: "tessera".to_string(),
            backend: CacheBackendKind::default(),
            default_expiration_minutes: 30,
            user_info_expiration_minutes: 15,
            scope_expiration_minutes: HashMap::new(),
            ttl_jitter_percent: 10,
            lock_cleanup_delay_minutes: 5,
            enable_statistics: true,
            token_scope: "token".to_string(),
            token_fallback_expiration_minutes: 15,
        }
    }
}

impl CacheConfig {
    /// Scope holding user profile entries.
    pub const USER_SCOPE: &'static str = "user";

    /// Returns the default TTL as a Duration.
    #[must_use]
    pub const fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_expiration_minutes * 60)
    }

    /// Returns the TTL for user profile entries.
    #[must_use]
    pub const fn user_info_ttl(&self) -> Duration {
        Duration::from_secs(self.user_info_expiration_minutes * 60)
    }

    /// Returns the TTL for a scope: explicit override, then the user TTL for
    /// the `user` scope, then the default.
    #[must_use]
    pub fn ttl_for_scope(&self, scope: &str) -> Duration {
        if let Some(minutes) = self.scope_expiration_minutes.get(scope) {
            return Duration::from_secs(minutes * 60);
        }
        if scope == Self::USER_SCOPE {
            return self.user_info_ttl();
        }
        self.default_ttl()
    }

    /// Returns the lock cleanup delay as a Duration.
    #[must_use]
    pub const fn lock_cleanup_delay(&self) -> Duration {
        Duration::from_secs(self.lock_cleanup_delay_minutes * 60)
    }

    /// Returns the token fallback TTL as a Duration.
    #[must_use]
    pub const fn token_fallback_ttl(&self) -> Duration {
        Duration::from_secs(self.token_fallback_expiration_minutes * 60)
    }
}

/// Invalidation event configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InvalidationConfig {
    /// Enable publishing and consuming invalidation events.
    pub enabled: bool,
    /// Stream / topic name shared by every service mirroring the entities.
    pub topic: String,
    /// Consumer group; one group per service so each service sees every event.
    pub consumer_group: String,
    /// Consumer name inside the group (unique per process).
    pub consumer_name: String,
    /// Scopes evicted for the entity id carried by an event.
    pub evict_scopes: Vec<String>,
    /// Capacity of the in-process publish queue.
    pub queue_capacity: usize,
    /// Delivery attempts after the first one.
    pub max_retries: u32,
    /// First retry delay in milliseconds.
    pub retry_initial_delay_ms: u64,
    /// Retry delay ceiling in milliseconds.
    pub retry_max_delay_ms: u64,
    /// How long a consumer read blocks waiting for events, in milliseconds.
    pub read_block_ms: u64,
    /// Maximum events fetched per read.
    pub read_batch_size: usize,
    /// Approximate stream length cap applied on publish.
    pub stream_max_len: usize,
    /// Handler attempts per stream entry before it is acknowledged and dropped.
    pub max_delivery_attempts: u32,
}

impl Default for InvalidationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            topic: "tessera.cache.invalidation".to_string(),
            consumer_group: "tessera".to_string(),
            consumer_name: "tessera-1".to_string(),
            evict_scopes: vec!["user".to_string(), "validation".to_string()],
            queue_capacity: 1024,
            max_retries: 3,
            retry_initial_delay_ms: 100,
            retry_max_delay_ms: 5_000,
            read_block_ms: 5_000,
            read_batch_size: 64,
            stream_max_len: 100_000,
            max_delivery_attempts: 5,
        }
    }
}

impl InvalidationConfig {
    /// Returns the initial retry delay as a Duration.
    #[must_use]
    pub const fn retry_initial_delay(&self) -> Duration {
        Duration::from_millis(self.retry_initial_delay_ms)
    }

    /// Returns the maximum retry delay as a Duration.
    #[must_use]
    pub const fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    /// Returns the consumer read block timeout as a Duration.
    #[must_use]
    pub const fn read_block(&self) -> Duration {
        Duration::from_millis(self.read_block_ms)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log filter directive (trace, debug, info, warn, error or a full `EnvFilter` string).
    pub log_level: String,
    /// Log format.
    pub log_format: LogFormat,
    /// Install the Prometheus exporter.
    pub metrics_enabled: bool,
    /// Prometheus exporter listen address.
    pub metrics_addr: String,
    /// Interval between cache statistics log lines; 0 disables them.
    pub statistics_interval_secs: u64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_addr: "0.0.0.0:9464".to_string(),
            statistics_interval_secs: 60,
        }
    }
}

impl ObservabilityConfig {
    /// Returns the telemetry settings for the tracing subscriber.
    #[must_use]
    pub fn telemetry(&self) -> TelemetryConfig {
        TelemetryConfig {
            log_level: self.log_level.clone(),
            format: self.log_format,
        }
    }

    /// Returns the statistics interval, or `None` when disabled.
    #[must_use]
    pub const fn statistics_interval(&self) -> Option<Duration> {
        if self.statistics_interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.statistics_interval_secs))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_defaults() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.key_prefix, "tessera");
        assert_eq!(config.default_ttl(), Duration::from_secs(30 * 60));
        assert_eq!(config.ttl_jitter_percent, 10);
        assert_eq!(config.token_fallback_ttl(), Duration::from_secs(15 * 60));
    }

    #[test]
    fn test_ttl_for_scope() {
        let mut config = CacheConfig::default();
        config
            .scope_expiration_minutes
            .insert("validation".to_string(), 2);

        assert_eq!(config.ttl_for_scope("validation"), Duration::from_secs(120));
        assert_eq!(config.ttl_for_scope("user"), config.user_info_ttl());
        assert_eq!(config.ttl_for_scope("course"), config.default_ttl());
    }

    #[test]
    fn test_scope_override_beats_user_ttl() {
        let mut config = CacheConfig::default();
        config.scope_expiration_minutes.insert("user".to_string(), 1);
        assert_eq!(config.ttl_for_scope("user"), Duration::from_secs(60));
    }

    #[test]
    fn test_statistics_interval_disabled_at_zero() {
        let config = ObservabilityConfig {
            statistics_interval_secs: 0,
            ..Default::default()
        };
        assert!(config.statistics_interval().is_none());
    }

    #[test]
    fn test_partial_section_uses_defaults() {
        let json = r#"{ "cache": { "key_prefix": "svc", "backend": "memory" } }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.cache.key_prefix, "svc");
        assert_eq!(config.cache.backend, CacheBackendKind::Memory);
        assert_eq!(config.cache.default_expiration_minutes, 30);
        assert_eq!(config.invalidation.topic, "tessera.cache.invalidation");
    }
}
