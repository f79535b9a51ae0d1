//! Cache read results and the logical-expiry envelope.

use chrono::Utc;
use seckill_core::Timestamp;
use serde::{Deserialize, Serialize};

/// Where the value of a cache read came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOrigin {
    /// A live cached payload.
    Cache,
    /// The loader, on a miss. The payload has been written back.
    Loader,
    /// A logically expired payload, served while a rebuild runs elsewhere.
    Stale,
}

/// Result of a cache read, carrying where the value came from.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRead<T> {
    value: T,
    origin: ReadOrigin,
    /// Embedded expiry, for payloads written by the logical-expiry strategy.
    logical_expire_at: Option<Timestamp>,
}

impl<T> CacheRead<T> {
    pub fn from_cache(value: T, logical_expire_at: Option<Timestamp>) -> Self {
        Self {
            value,
            origin: ReadOrigin::Cache,
            logical_expire_at,
        }
    }

    pub fn from_loader(value: T) -> Self {
        Self {
            value,
            origin: ReadOrigin::Loader,
            logical_expire_at: None,
        }
    }

    pub fn stale(value: T, logical_expire_at: Timestamp) -> Self {
        Self {
            value,
            origin: ReadOrigin::Stale,
            logical_expire_at: Some(logical_expire_at),
        }
    }

    /// Consume the wrapper and return the underlying value.
    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn origin(&self) -> ReadOrigin {
        self.origin
    }

    pub fn logical_expire_at(&self) -> Option<Timestamp> {
        self.logical_expire_at
    }

    /// Check if this was a cache hit (live or stale).
    pub fn was_cache_hit(&self) -> bool {
        !matches!(self.origin, ReadOrigin::Loader)
    }

    pub fn is_stale(&self) -> bool {
        matches!(self.origin, ReadOrigin::Stale)
    }
}

/// Payload plus its logical expiry, stored without a physical TTL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogicalEntry<T> {
    pub data: T,
    pub expire_time: Timestamp,
}

impl<T> LogicalEntry<T> {
    pub fn new(data: T, expire_time: Timestamp) -> Self {
        Self { data, expire_time }
    }

    /// Check if the entry is past its logical expiry as of `now`.
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        now >= self.expire_time
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_origins() {
        let now = Utc::now();
        assert!(CacheRead::from_cache(1, None).was_cache_hit());
        assert!(!CacheRead::from_loader(1).was_cache_hit());
        let stale = CacheRead::stale(1, now);
        assert!(stale.was_cache_hit());
        assert!(stale.is_stale());
        assert_eq!(stale.logical_expire_at(), Some(now));
        assert_eq!(stale.into_value(), 1);
    }

    #[test]
    fn test_logical_entry_expiry() {
        let now = Utc::now();
        let entry = LogicalEntry::new("x", now + Duration::seconds(10));
        assert!(!entry.is_expired_at(now));
        assert!(entry.is_expired_at(now + Duration::seconds(10)));
    }

    #[test]
    fn test_logical_entry_json_shape() {
        let now = Utc::now();
        let json = serde_json::to_value(LogicalEntry::new(5, now)).unwrap();
        assert_eq!(json["data"], 5);
        assert!(json.get("expireTime").is_some());
    }
}
