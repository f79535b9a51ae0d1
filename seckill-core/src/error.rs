//! Error types for seckill operations
//!
//! Business rejections (no stock, repeat buyer) and confirmed absence are
//! not errors: they travel as `ReservationOutcome` and `Option` values.

use crate::{OrderId, UserId, VoucherId};
use thiserror::Error;

/// Shared-store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Transient store failure during {operation}: {reason}")]
    Transient { operation: String, reason: String },

    #[error("Serialization failed for key {key}: {reason}")]
    Serialization { key: String, reason: String },

    #[error("Corrupt value under key {key}: {reason}")]
    CorruptValue { key: String, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    /// Shorthand for a retryable failure of `operation`.
    pub fn transient(operation: impl Into<String>, reason: impl ToString) -> Self {
        StoreError::Transient {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }
}

/// Distributed lock errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LockError {
    #[error("Lock busy: {resource}")]
    Busy { resource: String },
}

/// Cache strategy errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Gave up rebuilding {key} after {attempts} contended attempts")]
    RebuildContention { key: String, attempts: u32 },
}

/// Id generation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdError {
    #[error("Daily sequence exhausted for domain {domain} on {day}")]
    SequenceExhausted { domain: String, day: String },

    #[error("Clock reads {now_secs}s, before the id epoch {epoch_secs}s")]
    ClockBeforeEpoch { now_secs: i64, epoch_secs: i64 },
}

/// Durable record store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("Order already exists for user {user_id} and voucher {voucher_id}")]
    UniqueViolation { user_id: UserId, voucher_id: VoucherId },

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("Record store unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Asynchronous channel errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Channel full (capacity {capacity})")]
    Full { capacity: usize },

    #[error("Channel closed")]
    Closed,

    #[error("Unknown delivery tag: {tag}")]
    UnknownDelivery { tag: String },

    #[error("Transient channel failure: {reason}")]
    Transient { reason: String },
}

/// Order consumer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConsumerError {
    #[error("Durable write failed for order {order_id}: {reason}")]
    WriteFailure { order_id: OrderId, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all seckill errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SeckillError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Id error: {0}")]
    Id(#[from] IdError),

    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Consumer error: {0}")]
    Consumer(#[from] ConsumerError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl SeckillError {
    /// Whether the caller should retry with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SeckillError::Store(StoreError::Transient { .. })
                | SeckillError::Cache(CacheError::RebuildContention { .. })
                | SeckillError::Record(RecordError::Unavailable { .. })
                | SeckillError::Channel(ChannelError::Transient { .. })
                | SeckillError::Consumer(ConsumerError::WriteFailure { .. })
        )
    }

    pub fn is_lock_busy(&self) -> bool {
        matches!(self, SeckillError::Lock(LockError::Busy { .. }))
    }
}

/// Result type alias for seckill operations.
pub type SeckillResult<T> = Result<T, SeckillError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display_transient() {
        let err = StoreError::transient("GET cache:voucher:1", "connection reset");
        let msg = format!("{}", err);
        assert!(msg.contains("Transient"));
        assert!(msg.contains("cache:voucher:1"));
        assert!(msg.contains("connection reset"));
    }

    #[test]
    fn test_id_error_display_exhausted() {
        let err = IdError::SequenceExhausted {
            domain: "order".to_string(),
            day: "2026:10:17".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("order"));
        assert!(msg.contains("2026:10:17"));
    }

    #[test]
    fn test_record_error_display_unique_violation() {
        let err = RecordError::UniqueViolation {
            user_id: UserId::new(5),
            voucher_id: VoucherId::new(9),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("user 5"));
        assert!(msg.contains("voucher 9"));
    }

    #[test]
    fn test_seckill_error_from_variants() {
        let store = SeckillError::from(StoreError::LockPoisoned);
        assert!(matches!(store, SeckillError::Store(_)));

        let lock = SeckillError::from(LockError::Busy {
            resource: "order:1".to_string(),
        });
        assert!(lock.is_lock_busy());

        let channel = SeckillError::from(ChannelError::Closed);
        assert!(matches!(channel, SeckillError::Channel(_)));

        let config = SeckillError::from(ConfigError::InvalidValue {
            field: "workers".to_string(),
            value: "0".to_string(),
            reason: "must be positive".to_string(),
        });
        assert!(matches!(config, SeckillError::Config(_)));
    }

    #[test]
    fn test_transient_classification() {
        assert!(SeckillError::from(StoreError::transient("INCR", "timeout")).is_transient());
        assert!(SeckillError::from(CacheError::RebuildContention {
            key: "cache:voucher:1".to_string(),
            attempts: 20,
        })
        .is_transient());
        assert!(SeckillError::from(RecordError::Unavailable {
            reason: "db down".to_string(),
        })
        .is_transient());
        assert!(!SeckillError::from(StoreError::LockPoisoned).is_transient());
        assert!(!SeckillError::from(LockError::Busy {
            resource: "x".to_string(),
        })
        .is_transient());
    }
}
