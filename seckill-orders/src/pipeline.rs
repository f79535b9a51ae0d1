//! Order admission.
//!
//! `submit` decides synchronously, against the shared store only, whether a
//! user may buy a voucher. Granted orders get an id and are handed to the
//! channel; the durable write happens later in the consumer.

use std::sync::Arc;

use seckill_core::{
    IdSettings, OrderId, OrderMessage, RejectReason, RequestContext, ReservationOutcome,
    SeckillResult, VoucherId,
};
use seckill_storage::{IdGenerator, StockGuard};
use tracing::{debug, error, info};

use crate::channel::OrderChannel;

/// Result of one submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Admitted; the order will be persisted asynchronously under this id.
    Accepted(OrderId),
    /// Turned away. Final.
    Rejected(RejectReason),
}

impl SubmitOutcome {
    pub fn order_id(&self) -> Option<OrderId> {
        match self {
            SubmitOutcome::Accepted(id) => Some(*id),
            SubmitOutcome::Rejected(_) => None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, SubmitOutcome::Accepted(_))
    }
}

/// Front door of the flash sale.
#[derive(Clone)]
pub struct OrderPipeline {
    stock: StockGuard,
    ids: IdGenerator,
    channel: Arc<dyn OrderChannel>,
    id_domain: String,
}

impl OrderPipeline {
    pub fn new(
        stock: StockGuard,
        ids: IdGenerator,
        channel: Arc<dyn OrderChannel>,
        settings: &IdSettings,
    ) -> Self {
        Self {
            stock,
            ids,
            channel,
            id_domain: settings.order_domain.clone(),
        }
    }

    /// Reserve, mint an id and enqueue, in that order.
    ///
    /// If minting or publishing fails after a grant, the reservation is
    /// cancelled before the error is returned, so the unit goes back on sale
    /// and the user may try again.
    pub async fn submit(
        &self,
        ctx: &RequestContext,
        voucher_id: VoucherId,
    ) -> SeckillResult<SubmitOutcome> {
        let user_id = ctx.user_id;

        match self.stock.try_reserve(voucher_id, user_id).await? {
            ReservationOutcome::Granted => {}
            ReservationOutcome::InsufficientStock => {
                return Ok(SubmitOutcome::Rejected(RejectReason::InsufficientStock));
            }
            ReservationOutcome::AlreadyReserved => {
                return Ok(SubmitOutcome::Rejected(RejectReason::AlreadyReserved));
            }
        }

        match self.enqueue(voucher_id, ctx).await {
            Ok(order_id) => {
                info!(
                    request_id = %ctx.request_id,
                    %order_id,
                    %user_id,
                    %voucher_id,
                    "order admitted"
                );
                Ok(SubmitOutcome::Accepted(order_id))
            }
            Err(e) => {
                error!(
                    request_id = %ctx.request_id,
                    %user_id,
                    %voucher_id,
                    error = %e,
                    "admitted order could not be enqueued, cancelling reservation"
                );
                if let Err(cancel_err) = self.stock.cancel(voucher_id, user_id).await {
                    error!(
                        %user_id,
                        %voucher_id,
                        error = %cancel_err,
                        "failed to cancel reservation"
                    );
                }
                Err(e)
            }
        }
    }

    async fn enqueue(&self, voucher_id: VoucherId, ctx: &RequestContext) -> SeckillResult<OrderId> {
        let order_id = self.ids.next_id(&self.id_domain).await?;
        let message = OrderMessage::new(order_id, ctx.user_id, voucher_id);
        let tag = self.channel.publish(&message).await?;
        debug!(%order_id, %tag, "order message published");
        Ok(order_id)
    }
}

impl std::fmt::Debug for OrderPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderPipeline")
            .field("id_domain", &self.id_domain)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::InMemoryOrderChannel;
    use chrono::{Duration, Utc};
    use seckill_core::{ChannelError, SeckillError, SeckillVoucher, UserId};
    use seckill_storage::InMemorySharedStore;
    use std::time::Duration as StdDuration;

    async fn pipeline(stock: i64, capacity: usize) -> (OrderPipeline, StockGuard, Arc<InMemoryOrderChannel>) {
        let store = Arc::new(InMemorySharedStore::new());
        let guard = StockGuard::new(store.clone());
        let now = Utc::now();
        guard
            .load_stock(&SeckillVoucher {
                voucher_id: VoucherId::new(1),
                stock,
                begin_time: now,
                end_time: now + Duration::hours(1),
            })
            .await
            .unwrap();
        let settings = IdSettings::default();
        let ids = IdGenerator::new(store, &settings);
        let channel = Arc::new(InMemoryOrderChannel::new(capacity));
        let pipeline = OrderPipeline::new(guard.clone(), ids, channel.clone(), &settings);
        (pipeline, guard, channel)
    }

    #[tokio::test]
    async fn test_accepted_order_is_published() {
        let (pipeline, _guard, channel) = pipeline(1, 16).await;
        let ctx = RequestContext::for_user(UserId::new(5));

        let outcome = pipeline.submit(&ctx, VoucherId::new(1)).await.unwrap();
        let order_id = outcome.order_id().unwrap();

        let delivery = channel
            .consume("c1", StdDuration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivery.message.order_id, order_id);
        assert_eq!(delivery.message.user_id, UserId::new(5));
    }

    #[tokio::test]
    async fn test_rejections_do_not_publish() {
        let (pipeline, guard, channel) = pipeline(1, 16).await;
        let alice = RequestContext::for_user(UserId::new(1));
        let bob = RequestContext::for_user(UserId::new(2));

        assert!(pipeline.submit(&alice, VoucherId::new(1)).await.unwrap().is_accepted());
        assert_eq!(
            pipeline.submit(&alice, VoucherId::new(1)).await.unwrap(),
            SubmitOutcome::Rejected(RejectReason::AlreadyReserved)
        );
        assert_eq!(
            pipeline.submit(&bob, VoucherId::new(1)).await.unwrap(),
            SubmitOutcome::Rejected(RejectReason::InsufficientStock)
        );
        assert_eq!(channel.ready_len().unwrap(), 1);
        assert_eq!(guard.remaining(VoucherId::new(1)).await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_publish_failure_returns_the_unit() {
        let (pipeline, guard, channel) = pipeline(5, 16).await;
        channel.close().unwrap();
        let ctx = RequestContext::for_user(UserId::new(1));

        let err = pipeline.submit(&ctx, VoucherId::new(1)).await.unwrap_err();
        assert!(matches!(err, SeckillError::Channel(ChannelError::Closed)));
        assert_eq!(guard.remaining(VoucherId::new(1)).await.unwrap(), Some(5));
        // The cancelled user is not treated as a repeat buyer.
        assert!(guard
            .try_reserve(VoucherId::new(1), UserId::new(1))
            .await
            .unwrap()
            .is_granted());
    }
}
