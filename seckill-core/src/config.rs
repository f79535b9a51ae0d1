//! Configuration types
//!
//! Every setting has a default. `SeckillConfig::from_env()` overrides defaults
//! from `SECKILL_*` environment variables; unset or unparsable variables keep
//! the default.

use crate::{ConfigError, SeckillResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// 2022-01-01T00:00:00Z, the offset subtracted from order id timestamps.
pub const DEFAULT_ID_EPOCH_SECS: i64 = 1_640_995_200;

/// Cache strategy settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Physical TTL of a cached payload, before jitter.
    pub entity_ttl: Duration,
    /// TTL of the empty marker written for confirmed-absent ids.
    pub null_ttl: Duration,
    /// Upper bound (inclusive, whole seconds) of the random TTL jitter.
    pub ttl_jitter_max_secs: u64,
    /// Sleep between attempts when the mutex rebuild lock is contended.
    pub mutex_retry_delay: Duration,
    /// Attempts before the mutex strategy gives up with a transient error.
    pub mutex_max_attempts: u32,
    /// Lease of the per-id rebuild lock.
    pub rebuild_lock_lease: Duration,
    /// Logical lifetime written by the logical-expiry strategy.
    pub logical_expire: Duration,
    /// Maximum number of concurrent background rebuilds.
    pub rebuild_concurrency: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            entity_ttl: Duration::from_secs(30 * 60),
            null_ttl: Duration::from_secs(2 * 60),
            ttl_jitter_max_secs: 4,
            mutex_retry_delay: Duration::from_millis(50),
            mutex_max_attempts: 20,
            rebuild_lock_lease: Duration::from_secs(10),
            logical_expire: Duration::from_secs(20),
            rebuild_concurrency: 10,
        }
    }
}

impl CacheSettings {
    pub fn with_entity_ttl(mut self, ttl: Duration) -> Self {
        self.entity_ttl = ttl;
        self
    }

    pub fn with_null_ttl(mut self, ttl: Duration) -> Self {
        self.null_ttl = ttl;
        self
    }

    pub fn with_jitter(mut self, max_secs: u64) -> Self {
        self.ttl_jitter_max_secs = max_secs;
        self
    }

    pub fn with_mutex_retry(mut self, delay: Duration, max_attempts: u32) -> Self {
        self.mutex_retry_delay = delay;
        self.mutex_max_attempts = max_attempts;
        self
    }

    pub fn with_logical_expire(mut self, expire: Duration) -> Self {
        self.logical_expire = expire;
        self
    }
}

/// Distributed lock settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockSettings {
    /// Prefix of every lock key.
    pub key_prefix: String,
    /// Lease of the consumer's per-user order lock.
    pub order_lock_lease: Duration,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            key_prefix: "lock:".to_string(),
            order_lock_lease: Duration::from_secs(30),
        }
    }
}

/// Order id generator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdSettings {
    /// Seconds subtracted from the wall clock before shifting.
    pub epoch_secs: i64,
    /// Counter domain for order ids.
    pub order_domain: String,
}

impl Default for IdSettings {
    fn default() -> Self {
        Self {
            epoch_secs: DEFAULT_ID_EPOCH_SECS,
            order_domain: "order".to_string(),
        }
    }
}

/// Order consumer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerSettings {
    /// Consumer group shared by all workers.
    pub group: String,
    /// Stream key of the durable channel.
    pub stream_key: String,
    /// Number of parallel workers.
    pub workers: usize,
    /// How long one channel read blocks when the channel is empty.
    pub block_timeout: Duration,
    /// Back-off between pending-list recovery attempts.
    pub pending_retry_delay: Duration,
    /// Deliveries after which a message is dead-lettered.
    pub max_deliveries: u32,
    /// Bound of the in-memory channel.
    pub channel_capacity: usize,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            group: "g1".to_string(),
            stream_key: "stream.orders".to_string(),
            workers: 1,
            block_timeout: Duration::from_secs(2),
            pending_retry_delay: Duration::from_millis(20),
            max_deliveries: 5,
            channel_capacity: 1024 * 1024,
        }
    }
}

impl ConsumerSettings {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_block_timeout(mut self, timeout: Duration) -> Self {
        self.block_timeout = timeout;
        self
    }

    pub fn with_max_deliveries(mut self, max: u32) -> Self {
        self.max_deliveries = max;
        self
    }
}

/// Master configuration struct.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SeckillConfig {
    pub cache: CacheSettings,
    pub lock: LockSettings,
    pub ids: IdSettings,
    pub consumer: ConsumerSettings,
}

impl SeckillConfig {
    /// Create SeckillConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `SECKILL_CACHE_TTL_SECS`: Cached payload TTL (default: 1800)
    /// - `SECKILL_CACHE_NULL_TTL_SECS`: Empty marker TTL (default: 120)
    /// - `SECKILL_CACHE_JITTER_MAX_SECS`: Max TTL jitter (default: 4)
    /// - `SECKILL_CACHE_MUTEX_RETRY_MS`: Mutex retry sleep (default: 50)
    /// - `SECKILL_CACHE_MUTEX_MAX_ATTEMPTS`: Mutex retry cap (default: 20)
    /// - `SECKILL_CACHE_REBUILD_LEASE_SECS`: Rebuild lock lease (default: 10)
    /// - `SECKILL_CACHE_LOGICAL_EXPIRE_SECS`: Logical expiry (default: 20)
    /// - `SECKILL_CACHE_REBUILD_CONCURRENCY`: Background rebuild workers (default: 10)
    /// - `SECKILL_LOCK_PREFIX`: Lock key prefix (default: "lock:")
    /// - `SECKILL_ORDER_LOCK_LEASE_SECS`: Per-user order lock lease (default: 30)
    /// - `SECKILL_ID_EPOCH_SECS`: Id epoch offset (default: 1640995200)
    /// - `SECKILL_ID_ORDER_DOMAIN`: Order id counter domain (default: "order")
    /// - `SECKILL_CONSUMER_GROUP`: Consumer group (default: "g1")
    /// - `SECKILL_STREAM_KEY`: Order stream key (default: "stream.orders")
    /// - `SECKILL_CONSUMER_WORKERS`: Worker count (default: 1)
    /// - `SECKILL_CONSUMER_BLOCK_MS`: Channel read block (default: 2000)
    /// - `SECKILL_CONSUMER_PENDING_RETRY_MS`: Pending recovery back-off (default: 20)
    /// - `SECKILL_CONSUMER_MAX_DELIVERIES`: Dead-letter threshold (default: 5)
    /// - `SECKILL_CHANNEL_CAPACITY`: In-memory channel bound (default: 1048576)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let cache = CacheSettings {
            entity_ttl: env_secs("SECKILL_CACHE_TTL_SECS", defaults.cache.entity_ttl),
            null_ttl: env_secs("SECKILL_CACHE_NULL_TTL_SECS", defaults.cache.null_ttl),
            ttl_jitter_max_secs: env_or(
                "SECKILL_CACHE_JITTER_MAX_SECS",
                defaults.cache.ttl_jitter_max_secs,
            ),
            mutex_retry_delay: env_millis(
                "SECKILL_CACHE_MUTEX_RETRY_MS",
                defaults.cache.mutex_retry_delay,
            ),
            mutex_max_attempts: env_or(
                "SECKILL_CACHE_MUTEX_MAX_ATTEMPTS",
                defaults.cache.mutex_max_attempts,
            ),
            rebuild_lock_lease: env_secs(
                "SECKILL_CACHE_REBUILD_LEASE_SECS",
                defaults.cache.rebuild_lock_lease,
            ),
            logical_expire: env_secs(
                "SECKILL_CACHE_LOGICAL_EXPIRE_SECS",
                defaults.cache.logical_expire,
            ),
            rebuild_concurrency: env_or(
                "SECKILL_CACHE_REBUILD_CONCURRENCY",
                defaults.cache.rebuild_concurrency,
            ),
        };

        let lock = LockSettings {
            key_prefix: env_or("SECKILL_LOCK_PREFIX", defaults.lock.key_prefix),
            order_lock_lease: env_secs(
                "SECKILL_ORDER_LOCK_LEASE_SECS",
                defaults.lock.order_lock_lease,
            ),
        };

        let ids = IdSettings {
            epoch_secs: env_or("SECKILL_ID_EPOCH_SECS", defaults.ids.epoch_secs),
            order_domain: env_or("SECKILL_ID_ORDER_DOMAIN", defaults.ids.order_domain),
        };

        let consumer = ConsumerSettings {
            group: env_or("SECKILL_CONSUMER_GROUP", defaults.consumer.group),
            stream_key: env_or("SECKILL_STREAM_KEY", defaults.consumer.stream_key),
            workers: env_or("SECKILL_CONSUMER_WORKERS", defaults.consumer.workers),
            block_timeout: env_millis(
                "SECKILL_CONSUMER_BLOCK_MS",
                defaults.consumer.block_timeout,
            ),
            pending_retry_delay: env_millis(
                "SECKILL_CONSUMER_PENDING_RETRY_MS",
                defaults.consumer.pending_retry_delay,
            ),
            max_deliveries: env_or(
                "SECKILL_CONSUMER_MAX_DELIVERIES",
                defaults.consumer.max_deliveries,
            ),
            channel_capacity: env_or(
                "SECKILL_CHANNEL_CAPACITY",
                defaults.consumer.channel_capacity,
            ),
        };

        Self {
            cache,
            lock,
            ids,
            consumer,
        }
    }

    /// Validate the configuration.
    /// Returns Ok(()) if valid, Err(SeckillError::Config) if invalid.
    ///
    /// Validates:
    /// - all durations are positive
    /// - attempt, worker, delivery and capacity counts are positive
    /// - key prefix, id domain, group and stream key are non-empty
    pub fn validate(&self) -> SeckillResult<()> {
        let durations = [
            ("cache.entity_ttl", self.cache.entity_ttl),
            ("cache.null_ttl", self.cache.null_ttl),
            ("cache.mutex_retry_delay", self.cache.mutex_retry_delay),
            ("cache.rebuild_lock_lease", self.cache.rebuild_lock_lease),
            ("cache.logical_expire", self.cache.logical_expire),
            ("lock.order_lock_lease", self.lock.order_lock_lease),
            ("consumer.block_timeout", self.consumer.block_timeout),
            ("consumer.pending_retry_delay", self.consumer.pending_retry_delay),
        ];
        for (field, value) in durations {
            if value.is_zero() {
                return Err(invalid(field, "0s", "duration must be positive"));
            }
        }

        let counts = [
            ("cache.mutex_max_attempts", self.cache.mutex_max_attempts as usize),
            ("cache.rebuild_concurrency", self.cache.rebuild_concurrency),
            ("consumer.workers", self.consumer.workers),
            ("consumer.max_deliveries", self.consumer.max_deliveries as usize),
            ("consumer.channel_capacity", self.consumer.channel_capacity),
        ];
        for (field, value) in counts {
            if value == 0 {
                return Err(invalid(field, "0", "must be at least 1"));
            }
        }

        let names = [
            ("lock.key_prefix", &self.lock.key_prefix),
            ("ids.order_domain", &self.ids.order_domain),
            ("consumer.group", &self.consumer.group),
            ("consumer.stream_key", &self.consumer.stream_key),
        ];
        for (field, value) in names {
            if value.trim().is_empty() {
                return Err(invalid(field, value, "must not be empty"));
            }
        }

        if self.ids.epoch_secs < 0 {
            return Err(invalid(
                "ids.epoch_secs",
                &self.ids.epoch_secs.to_string(),
                "must not be negative",
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, value: &str, reason: &str) -> crate::SeckillError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_secs(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn env_millis(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SeckillError;

    #[test]
    fn test_defaults_are_valid() {
        let config = SeckillConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache.ttl_jitter_max_secs, 4);
        assert_eq!(config.cache.null_ttl, Duration::from_secs(120));
        assert_eq!(config.ids.epoch_secs, 1_640_995_200);
        assert_eq!(config.consumer.stream_key, "stream.orders");
    }

    #[test]
    fn test_validate_rejects_zero_duration() {
        let mut config = SeckillConfig::default();
        config.cache.null_ttl = Duration::ZERO;
        match config.validate() {
            Err(SeckillError::Config(ConfigError::InvalidValue { field, .. })) => {
                assert_eq!(field, "cache.null_ttl");
            }
            other => panic!("expected invalid null_ttl, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = SeckillConfig::default();
        config.consumer = config.consumer.with_workers(0);
        assert!(matches!(
            config.validate(),
            Err(SeckillError::Config(ConfigError::InvalidValue { ref field, .. })) if field == "consumer.workers"
        ));
    }

    #[test]
    fn test_validate_rejects_blank_prefix() {
        let mut config = SeckillConfig::default();
        config.lock.key_prefix = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cache_settings_builder() {
        let settings = CacheSettings::default()
            .with_entity_ttl(Duration::from_secs(60))
            .with_null_ttl(Duration::from_secs(5))
            .with_jitter(0)
            .with_mutex_retry(Duration::from_millis(10), 3)
            .with_logical_expire(Duration::from_secs(1));

        assert_eq!(settings.entity_ttl, Duration::from_secs(60));
        assert_eq!(settings.null_ttl, Duration::from_secs(5));
        assert_eq!(settings.ttl_jitter_max_secs, 0);
        assert_eq!(settings.mutex_max_attempts, 3);
        assert_eq!(settings.logical_expire, Duration::from_secs(1));
    }

    #[test]
    fn test_env_helpers_fall_back_on_garbage() {
        assert_eq!(env_or("SECKILL_TEST_UNSET_VARIABLE", 7u32), 7);
        assert_eq!(
            env_secs("SECKILL_TEST_UNSET_VARIABLE", Duration::from_secs(3)),
            Duration::from_secs(3)
        );
    }
}
