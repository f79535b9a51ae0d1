//! Durable order write.
//!
//! The writer is the explicit transactional boundary the consumer calls:
//! one `write` is one unit of work against the record store.

use std::sync::Arc;

use async_trait::async_trait;
use seckill_core::{Order, RecordError, SeckillError, SeckillResult};
use seckill_storage::{CreateOutcome, RecordStore};
use tracing::debug;

/// Persists one admitted order, idempotently.
#[async_trait]
pub trait OrderWriter: Send + Sync {
    /// Write `order` unless the user already holds one for the voucher.
    /// Retrying after a failure or a replay is a no-op returning `Duplicate`.
    async fn write(&self, order: &Order) -> SeckillResult<CreateOutcome>;
}

/// Writes orders through a [`RecordStore`].
#[derive(Clone)]
pub struct RecordOrderWriter {
    records: Arc<dyn RecordStore>,
}

impl RecordOrderWriter {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl OrderWriter for RecordOrderWriter {
    async fn write(&self, order: &Order) -> SeckillResult<CreateOutcome> {
        if self
            .records
            .exists_where(order.user_id, order.voucher_id)
            .await?
        {
            debug!(order_id = %order.id, user_id = %order.user_id, "order already persisted");
            return Ok(CreateOutcome::Duplicate);
        }

        match self.records.create_order(order).await {
            Err(SeckillError::Record(RecordError::UniqueViolation { .. })) => {
                Ok(CreateOutcome::Duplicate)
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use seckill_core::{OrderId, SeckillVoucher, UserId, VoucherId};
    use seckill_storage::InMemoryRecordStore;

    async fn writer_with_stock(stock: i64) -> (Arc<InMemoryRecordStore>, RecordOrderWriter) {
        let records = Arc::new(InMemoryRecordStore::new());
        let now = Utc::now();
        records
            .save_voucher(&SeckillVoucher {
                voucher_id: VoucherId::new(1),
                stock,
                begin_time: now - Duration::hours(1),
                end_time: now + Duration::hours(1),
            })
            .await
            .unwrap();
        let writer = RecordOrderWriter::new(records.clone());
        (records, writer)
    }

    #[tokio::test]
    async fn test_replay_is_a_noop() {
        let (records, writer) = writer_with_stock(5).await;
        let order = Order::new(OrderId::new(10), UserId::new(1), VoucherId::new(1));

        assert_eq!(writer.write(&order).await.unwrap(), CreateOutcome::Persisted);
        assert_eq!(writer.write(&order).await.unwrap(), CreateOutcome::Duplicate);
        assert_eq!(records.order_count().unwrap(), 1);

        let stored = records.get_voucher(VoucherId::new(1)).await.unwrap().unwrap();
        assert_eq!(stored.stock, 4);
    }

    #[tokio::test]
    async fn test_failure_surfaces_and_retry_succeeds() {
        let (records, writer) = writer_with_stock(1).await;
        let order = Order::new(OrderId::new(10), UserId::new(1), VoucherId::new(1));
        records.fail_next_writes(1);

        assert!(writer.write(&order).await.unwrap_err().is_transient());
        assert_eq!(writer.write(&order).await.unwrap(), CreateOutcome::Persisted);
    }
}
