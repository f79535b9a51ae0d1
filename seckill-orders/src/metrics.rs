//! Order consumer metrics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for order consumer activity.
///
/// Shared by every worker of one consumer group and returned from the
/// worker loop on shutdown.
#[derive(Debug, Default)]
pub struct ConsumerMetrics {
    /// Orders written to the durable store
    pub persisted: AtomicU64,

    /// Deliveries for orders that already existed (replays)
    pub duplicates: AtomicU64,

    /// Deliveries rejected by the durable stock check
    pub out_of_stock: AtomicU64,

    /// Deliveries left pending because the per-user lock was taken
    pub lock_busy: AtomicU64,

    /// Durable writes that failed and were left for redelivery
    pub write_failures: AtomicU64,

    /// Messages moved to the dead-letter list
    pub dead_lettered: AtomicU64,

    /// Deliveries read back from the pending list
    pub redeliveries: AtomicU64,
}

impl ConsumerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> ConsumerSnapshot {
        ConsumerSnapshot {
            persisted: self.persisted.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            out_of_stock: self.out_of_stock.load(Ordering::Relaxed),
            lock_busy: self.lock_busy.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            redeliveries: self.redeliveries.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of consumer metrics at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerSnapshot {
    pub persisted: u64,
    pub duplicates: u64,
    pub out_of_stock: u64,
    pub lock_busy: u64,
    pub write_failures: u64,
    pub dead_lettered: u64,
    pub redeliveries: u64,
}

impl ConsumerSnapshot {
    /// Deliveries that ended in an acknowledgement.
    pub fn acknowledged(&self) -> u64 {
        self.persisted + self.duplicates + self.out_of_stock + self.dead_lettered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = ConsumerMetrics::new();
        ConsumerMetrics::incr(&metrics.persisted);
        ConsumerMetrics::incr(&metrics.persisted);
        ConsumerMetrics::incr(&metrics.duplicates);
        ConsumerMetrics::incr(&metrics.lock_busy);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.persisted, 2);
        assert_eq!(snapshot.duplicates, 1);
        assert_eq!(snapshot.lock_busy, 1);
        assert_eq!(snapshot.acknowledged(), 3);
    }
}
