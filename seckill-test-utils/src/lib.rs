//! Seckill Test Utilities
//!
//! Shared test infrastructure for the seckill workspace:
//! - An in-memory harness wiring every component together
//! - Proptest generators for ids and messages
//! - Fixtures for vouchers and fast test configuration
//! - Assertions for the no-oversell and one-order-per-user invariants

use std::sync::{Arc, Once};

// Re-export core types for convenience
pub use seckill_core::{
    ConsumerSettings, Order, OrderId, OrderMessage, RejectReason, RequestContext,
    ReservationOutcome, SeckillConfig, SeckillError, SeckillResult, SeckillVoucher, UserId,
    VoucherId,
};
pub use seckill_orders::{
    HandleOutcome, InMemoryOrderChannel, OrderConsumer, OrderPipeline, RecordOrderWriter,
    SubmitOutcome,
};
pub use seckill_storage::{
    CacheClient, DistributedLock, IdGenerator, InMemoryRecordStore, InMemorySharedStore,
    RecordStore, StockGuard, VoucherLoader,
};

static TRACING: Once = Once::new();

/// Install an env-filtered fmt subscriber once per test binary.
///
/// Honours `RUST_LOG`; silent by default.
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("off"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// HARNESS
// ============================================================================

/// Every component wired over the in-memory store, record store and channel.
pub struct TestHarness {
    pub config: SeckillConfig,
    pub store: Arc<InMemorySharedStore>,
    pub records: Arc<InMemoryRecordStore>,
    pub cache: CacheClient,
    pub locks: DistributedLock,
    pub ids: IdGenerator,
    pub stock: StockGuard,
    pub channel: Arc<InMemoryOrderChannel>,
    pub pipeline: OrderPipeline,
    pub consumer: OrderConsumer,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(fixtures::fast_config())
    }

    pub fn with_config(config: SeckillConfig) -> Self {
        init_test_tracing();

        let store = Arc::new(InMemorySharedStore::new());
        let records = Arc::new(InMemoryRecordStore::new());
        let channel = Arc::new(InMemoryOrderChannel::new(config.consumer.channel_capacity));

        let cache = CacheClient::new(store.clone(), config.cache.clone());
        let locks = DistributedLock::new(store.clone(), config.lock.key_prefix.clone());
        let ids = IdGenerator::new(store.clone(), &config.ids);
        let stock = StockGuard::new(store.clone());

        let pipeline = OrderPipeline::new(stock.clone(), ids.clone(), channel.clone(), &config.ids);
        let consumer = OrderConsumer::new(
            "c1",
            channel.clone(),
            locks.clone(),
            stock.clone(),
            Arc::new(RecordOrderWriter::new(records.clone())),
            config.consumer.clone(),
            config.lock.order_lock_lease,
        );

        Self {
            config,
            store,
            records,
            cache,
            locks,
            ids,
            stock,
            channel,
            pipeline,
            consumer,
        }
    }

    /// Create a flash-sale voucher: persist it and publish its stock.
    pub async fn create_voucher(&self, id: u64, stock: i64) -> SeckillResult<SeckillVoucher> {
        let voucher = fixtures::voucher(id, stock);
        self.records.save_voucher(&voucher).await?;
        self.stock.load_stock(&voucher).await?;
        Ok(voucher)
    }

    pub async fn submit(&self, user: u64, voucher: u64) -> SeckillResult<SubmitOutcome> {
        self.pipeline
            .submit(&RequestContext::for_user(UserId::new(user)), VoucherId::new(voucher))
            .await
    }

    /// Handle new deliveries until the channel is empty.
    pub async fn drain(&self) -> SeckillResult<Vec<HandleOutcome>> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.consumer.process_next().await? {
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Remaining shared-store stock for a voucher.
    pub async fn remaining(&self, voucher: u64) -> SeckillResult<Option<i64>> {
        self.stock.remaining(VoucherId::new(voucher)).await
    }

    /// Durable stock for a voucher.
    pub async fn durable_stock(&self, voucher: u64) -> SeckillResult<Option<i64>> {
        Ok(self
            .records
            .get_voucher(VoucherId::new(voucher))
            .await?
            .map(|v| v.stock))
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::prelude::*;

    pub fn arb_user_id() -> impl Strategy<Value = UserId> {
        (1u64..1_000_000).prop_map(UserId::new)
    }

    pub fn arb_voucher_id() -> impl Strategy<Value = VoucherId> {
        (1u64..10_000).prop_map(VoucherId::new)
    }

    pub fn arb_order_id() -> impl Strategy<Value = OrderId> {
        (0u64..(1u64 << 31), 1u64..1_000_000).prop_map(|(ts, seq)| OrderId::compose(ts, seq))
    }

    pub fn arb_order_message() -> impl Strategy<Value = OrderMessage> {
        (arb_order_id(), arb_user_id(), arb_voucher_id())
            .prop_map(|(order, user, voucher)| OrderMessage::new(order, user, voucher))
    }

    /// Initial stock for a flash sale, sold-out included.
    pub fn arb_stock() -> impl Strategy<Value = i64> {
        0i64..40
    }

    /// A burst of purchase attempts; repeats model the same user retrying.
    pub fn arb_purchase_burst() -> impl Strategy<Value = Vec<u64>> {
        proptest::collection::vec(1u64..30, 1..80)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    use super::*;
    use chrono::{Duration, Utc};
    use std::time::Duration as StdDuration;

    /// Defaults with short consumer timings so worker loops finish quickly.
    pub fn fast_config() -> SeckillConfig {
        let mut config = SeckillConfig::default();
        config.consumer = ConsumerSettings {
            channel_capacity: 4096,
            pending_retry_delay: StdDuration::from_millis(5),
            ..config.consumer
        }
        .with_block_timeout(StdDuration::from_millis(20))
        .with_max_deliveries(3);
        config
    }

    /// A voucher on sale for the surrounding hour.
    pub fn voucher(id: u64, stock: i64) -> SeckillVoucher {
        let now = Utc::now();
        SeckillVoucher {
            voucher_id: VoucherId::new(id),
            stock,
            begin_time: now - Duration::hours(1),
            end_time: now + Duration::hours(1),
        }
    }

    pub fn message(order: u64, user: u64, voucher: u64) -> OrderMessage {
        OrderMessage::new(OrderId::new(order), UserId::new(user), VoucherId::new(voucher))
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    use super::*;
    use std::collections::HashSet;

    /// Durable orders never exceed the initial stock, and durable stock
    /// accounts for every one of them.
    pub async fn assert_no_oversell(harness: &TestHarness, voucher: u64, initial: i64) {
        let orders = harness
            .records
            .orders_for_voucher(VoucherId::new(voucher))
            .expect("read orders");
        assert!(
            orders.len() as i64 <= initial,
            "oversold: {} orders for stock {}",
            orders.len(),
            initial
        );
        let durable = harness
            .durable_stock(voucher)
            .await
            .expect("read voucher")
            .expect("voucher exists");
        assert_eq!(durable, initial - orders.len() as i64);
    }

    /// No user holds two orders for the same voucher.
    pub fn assert_one_order_per_user(harness: &TestHarness, voucher: u64) {
        let orders = harness
            .records
            .orders_for_voucher(VoucherId::new(voucher))
            .expect("read orders");
        let buyers: HashSet<UserId> = orders.iter().map(|o| o.user_id).collect();
        assert_eq!(buyers.len(), orders.len(), "duplicate buyer in {orders:?}");
    }

    pub fn assert_rejected(outcome: &SubmitOutcome, reason: RejectReason) {
        assert_eq!(*outcome, SubmitOutcome::Rejected(reason));
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_harness_round_trip() {
        let harness = TestHarness::new();
        harness.create_voucher(1, 2).await.unwrap();

        assert!(harness.submit(10, 1).await.unwrap().is_accepted());
        assert_eq!(harness.remaining(1).await.unwrap(), Some(1));

        let outcomes = harness.drain().await.unwrap();
        assert_eq!(outcomes, vec![HandleOutcome::Persisted]);
        assert_eq!(harness.durable_stock(1).await.unwrap(), Some(1));
        assertions::assert_no_oversell(&harness, 1, 2).await;
    }

    #[test]
    fn test_fast_config_is_valid() {
        assert!(fixtures::fast_config().validate().is_ok());
    }
}
