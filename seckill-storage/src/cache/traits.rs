//! Cacheable entity marker, loader seam and cache statistics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use seckill_core::{RecordError, SeckillResult, SeckillVoucher, VoucherId};
use serde::{de::DeserializeOwned, Serialize};

use crate::records::RecordStore;

/// Marker trait for payloads the cache strategies can serve.
///
/// Payloads are stored as JSON text in the shared store, so they must be
/// serializable both ways and cheap to move across tasks.
pub trait CacheableEntity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Short entity name used in log fields.
    fn entity_name() -> &'static str;
}

impl CacheableEntity for SeckillVoucher {
    fn entity_name() -> &'static str {
        "voucher"
    }
}

/// Fallback source consulted on a cache miss.
///
/// `Ok(None)` means the id is confirmed absent in the source of truth.
#[async_trait]
pub trait CacheLoader<K, T>: Send + Sync
where
    K: Send + Sync,
    T: Send,
{
    async fn load(&self, id: &K) -> SeckillResult<Option<T>>;
}

/// Loads vouchers from the durable record store.
#[derive(Clone)]
pub struct VoucherLoader {
    records: Arc<dyn RecordStore>,
}

impl VoucherLoader {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl CacheLoader<VoucherId, SeckillVoucher> for VoucherLoader {
    async fn load(&self, id: &VoucherId) -> SeckillResult<Option<SeckillVoucher>> {
        match self.records.get_voucher(*id).await {
            Err(seckill_core::SeckillError::Record(RecordError::NotFound { .. })) => Ok(None),
            other => other,
        }
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads answered from a live payload.
    pub hits: u64,
    /// Reads answered from an empty marker, without touching the loader.
    pub empty_hits: u64,
    /// Reads answered from a logically expired payload.
    pub stale_hits: u64,
    /// Reads that found nothing under the key.
    pub misses: u64,
    /// Loader invocations, synchronous or background.
    pub loader_calls: u64,
    /// Background rebuilds handed to the worker pool.
    pub rebuilds_scheduled: u64,
    /// Background rebuilds that ended in an error.
    pub rebuild_failures: u64,
    /// Rebuild lock attempts that found the lock taken.
    pub lock_contention: u64,
    /// Stale reads that left the rebuild to a later read because every
    /// rebuild worker was busy.
    pub rebuilds_skipped: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0). Empty-marker and stale reads
    /// count as hits: neither reached the loader on the read path.
    pub fn hit_rate(&self) -> f64 {
        let served = self.hits + self.empty_hits + self.stale_hits;
        let total = served + self.misses;
        if total == 0 {
            0.0
        } else {
            served as f64 / total as f64
        }
    }
}

/// Live counters behind [`CacheStats`].
#[derive(Debug, Default)]
pub(crate) struct CacheMetrics {
    pub(crate) hits: AtomicU64,
    pub(crate) empty_hits: AtomicU64,
    pub(crate) stale_hits: AtomicU64,
    pub(crate) misses: AtomicU64,
    pub(crate) loader_calls: AtomicU64,
    pub(crate) rebuilds_scheduled: AtomicU64,
    pub(crate) rebuild_failures: AtomicU64,
    pub(crate) lock_contention: AtomicU64,
    pub(crate) rebuilds_skipped: AtomicU64,
}

impl CacheMetrics {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            empty_hits: self.empty_hits.load(Ordering::Relaxed),
            stale_hits: self.stale_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loader_calls: self.loader_calls.load(Ordering::Relaxed),
            rebuilds_scheduled: self.rebuilds_scheduled.load(Ordering::Relaxed),
            rebuild_failures: self.rebuild_failures.load(Ordering::Relaxed),
            lock_contention: self.lock_contention.load(Ordering::Relaxed),
            rebuilds_skipped: self.rebuilds_skipped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::InMemoryRecordStore;
    use chrono::Utc;

    #[test]
    fn test_hit_rate() {
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
        let stats = CacheStats {
            hits: 2,
            empty_hits: 1,
            misses: 1,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_voucher_loader_reads_records() {
        let records = Arc::new(InMemoryRecordStore::new());
        let now = Utc::now();
        let voucher = SeckillVoucher {
            voucher_id: VoucherId::new(3),
            stock: 10,
            begin_time: now,
            end_time: now,
        };
        records.save_voucher(&voucher).await.unwrap();

        let loader = VoucherLoader::new(records);
        assert_eq!(loader.load(&VoucherId::new(3)).await.unwrap(), Some(voucher));
        assert_eq!(loader.load(&VoucherId::new(4)).await.unwrap(), None);
    }
}
