//! Configuration validation module.
//!
//! Validates every configuration value up front and reports all problems at
//! once, failing fast on invalid configuration rather than at runtime.

use crate::{AppConfig, CacheBackendKind};
use std::fmt;
use std::net::SocketAddr;

/// Characters that would let a key prefix act as a glob when scanning.
const GLOB_METACHARACTERS: &[char] = &['*', '?', '[', ']', '\\'];

/// Configuration validation error variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValidationError {
    /// URL format is invalid.
    InvalidUrl { url_type: String, message: String },
    /// A required string value is empty.
    EmptyValue { name: String },
    /// TTL jitter must be a percentage.
    InvalidJitterPercent { value: u8 },
    /// Key prefix contains characters that would escape pattern scoping.
    InvalidKeyPrefix { value: String },
    /// Duration or size value must be positive.
    NonPositiveValue { name: String },
    /// Pool size exceeds maximum allowed.
    PoolSizeTooLarge { value: usize, maximum: usize },
    /// Listen address is not a socket address.
    InvalidAddress { name: String, value: String },
}

impl fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidUrl { url_type, message } => {
                write!(f, "Invalid {} URL: {}", url_type, message)
            }
            Self::EmptyValue { name } => write!(f, "'{}' cannot be empty", name),
            Self::InvalidJitterPercent { value } => {
                write!(f, "Invalid TTL jitter: {}% (must be between 0 and 100)", value)
            }
            Self::InvalidKeyPrefix { value } => {
                write!(
                    f,
                    "Invalid key prefix '{}': must not contain ':' or glob characters (* ? [ ] \\)",
                    value
                )
            }
            Self::NonPositiveValue { name } => write!(f, "'{}' must be positive", name),
            Self::PoolSizeTooLarge { value, maximum } => {
                write!(f, "Pool size {} exceeds maximum allowed ({})", value, maximum)
            }
            Self::InvalidAddress { name, value } => {
                write!(f, "'{}' is not a valid socket address: '{}'", name, value)
            }
        }
    }
}

impl std::error::Error for ConfigValidationError {}

/// Result of configuration validation containing all errors found.
#[derive(Debug, Default)]
struct ValidationResult {
    errors: Vec<ConfigValidationError>,
}

impl ValidationResult {
    fn add_error(&mut self, error: ConfigValidationError) {
        self.errors.push(error);
    }

    fn require_non_empty(&mut self, name: &str, value: &str) {
        if value.trim().is_empty() {
            self.add_error(ConfigValidationError::EmptyValue {
                name: name.to_string(),
            });
        }
    }

    fn require_positive(&mut self, name: &str, value: u64) {
        if value == 0 {
            self.add_error(ConfigValidationError::NonPositiveValue {
                name: name.to_string(),
            });
        }
    }

    fn into_result(self) -> Result<(), Vec<ConfigValidationError>> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Maximum connection pool size.
    const MAX_POOL_SIZE: usize = 1000;

    /// Validates the entire application configuration.
    ///
    /// Returns Ok(()) if valid, or Err with all validation errors found.
    pub fn validate(config: &AppConfig) -> Result<(), Vec<ConfigValidationError>> {
        let mut result = ValidationResult::default();

        Self::validate_cache(config, &mut result);
        Self::validate_redis(config, &mut result);
        Self::validate_invalidation(config, &mut result);
        Self::validate_observability(config, &mut result);

        result.into_result()
    }

    fn validate_cache(config: &AppConfig, result: &mut ValidationResult) {
        let cache = &config.cache;

        result.require_non_empty("cache.key_prefix", &cache.key_prefix);
        if cache.key_prefix.contains(':') || cache.key_prefix.contains(GLOB_METACHARACTERS) {
            result.add_error(ConfigValidationError::InvalidKeyPrefix {
                value: cache.key_prefix.clone(),
            });
        }

        if cache.ttl_jitter_percent > 100 {
            result.add_error(ConfigValidationError::InvalidJitterPercent {
                value: cache.ttl_jitter_percent,
            });
        }

        result.require_positive("cache.default_expiration_minutes", cache.default_expiration_minutes);
        result.require_positive(
            "cache.user_info_expiration_minutes",
            cache.user_info_expiration_minutes,
        );
        for (scope, minutes) in &cache.scope_expiration_minutes {
            result.require_positive(&format!("cache.scope_expiration_minutes.{}", scope), *minutes);
        }
        result.require_positive(
            "cache.token_fallback_expiration_minutes",
            cache.token_fallback_expiration_minutes,
        );
        result.require_non_empty("cache.token_scope", &cache.token_scope);
    }

    fn validate_redis(config: &AppConfig, result: &mut ValidationResult) {
        // The memory backend pairs with the in-process transport.
        if config.cache.backend != CacheBackendKind::Redis {
            return;
        }

        let redis = &config.redis;
        if !redis.url.starts_with("redis://") && !redis.url.starts_with("rediss://") {
            result.add_error(ConfigValidationError::InvalidUrl {
                url_type: "redis".to_string(),
                message: "URL must start with redis:// or rediss://".to_string(),
            });
        }

        result.require_positive("redis.pool_size", redis.pool_size as u64);
        if redis.pool_size > Self::MAX_POOL_SIZE {
            result.add_error(ConfigValidationError::PoolSizeTooLarge {
                value: redis.pool_size,
                maximum: Self::MAX_POOL_SIZE,
            });
        }
        result.require_positive("redis.connect_timeout_secs", redis.connect_timeout_secs);
    }

    fn validate_invalidation(config: &AppConfig, result: &mut ValidationResult) {
        let invalidation = &config.invalidation;
        if !invalidation.enabled {
            return;
        }

        result.require_non_empty("invalidation.topic", &invalidation.topic);
        result.require_non_empty("invalidation.consumer_group", &invalidation.consumer_group);
        result.require_non_empty("invalidation.consumer_name", &invalidation.consumer_name);
        result.require_positive("invalidation.queue_capacity", invalidation.queue_capacity as u64);
        result.require_positive("invalidation.read_batch_size", invalidation.read_batch_size as u64);
        result.require_positive("invalidation.read_block_ms", invalidation.read_block_ms);
        result.require_positive(
            "invalidation.max_delivery_attempts",
            u64::from(invalidation.max_delivery_attempts),
        );
    }

    fn validate_observability(config: &AppConfig, result: &mut ValidationResult) {
        let observability = &config.observability;
        if observability.metrics_enabled
            && observability.metrics_addr.parse::<SocketAddr>().is_err()
        {
            result.add_error(ConfigValidationError::InvalidAddress {
                name: "observability.metrics_addr".to_string(),
                value: observability.metrics_addr.clone(),
            });
        }
    }
}
