//! Atomic stock reservation.

use std::sync::Arc;

use seckill_core::{
    ReservationOutcome, SeckillResult, SeckillVoucher, StoreError, UserId, VoucherId,
    VoucherStock,
};
use tracing::{debug, info};

use crate::keys::stock_key;
use crate::shared::SharedStore;

/// Admission control for flash-sale vouchers.
///
/// Every check runs inside one store-side atomic step, so concurrent
/// callers can neither oversell a voucher nor both be granted the same
/// `(user, voucher)` pair.
#[derive(Clone)]
pub struct StockGuard {
    store: Arc<dyn SharedStore>,
}

impl StockGuard {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    /// Publish a voucher's stock to the shared store, replacing any
    /// previous counter. Called when a flash-sale voucher is created.
    pub async fn load_stock(&self, voucher: &SeckillVoucher) -> SeckillResult<()> {
        let stock = voucher.stock.max(0);
        self.store
            .set(&stock_key(voucher.voucher_id), &stock.to_string(), None)
            .await?;
        info!(voucher_id = %voucher.voucher_id, stock, "voucher stock loaded");
        Ok(())
    }

    /// Take one unit for `user_id` if stock is left and the user holds none yet.
    pub async fn try_reserve(
        &self,
        voucher_id: VoucherId,
        user_id: UserId,
    ) -> SeckillResult<ReservationOutcome> {
        let outcome = self.store.reserve_stock(voucher_id, user_id).await?;
        if !outcome.is_granted() {
            debug!(%voucher_id, %user_id, %outcome, "reservation rejected");
        }
        Ok(outcome)
    }

    /// Give back a granted unit. Returns false if the user held none.
    pub async fn cancel(&self, voucher_id: VoucherId, user_id: UserId) -> SeckillResult<bool> {
        let released = self.store.release_reservation(voucher_id, user_id).await?;
        debug!(%voucher_id, %user_id, released, "reservation cancelled");
        Ok(released)
    }

    /// Shared-store stock of a voucher, or `None` if it was never loaded.
    pub async fn stock(&self, voucher_id: VoucherId) -> SeckillResult<Option<VoucherStock>> {
        let key = stock_key(voucher_id);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(None);
        };
        let remaining = raw.parse::<i64>().map_err(|e| StoreError::CorruptValue {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        if remaining < 0 {
            return Err(StoreError::CorruptValue {
                key,
                reason: format!("negative stock {remaining}"),
            }
            .into());
        }
        Ok(Some(VoucherStock {
            voucher_id,
            remaining,
        }))
    }

    /// Units left in the shared store, or `None` if stock was never loaded.
    pub async fn remaining(&self, voucher_id: VoucherId) -> SeckillResult<Option<i64>> {
        Ok(self.stock(voucher_id).await?.map(|stock| stock.remaining))
    }
}

impl std::fmt::Debug for StockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StockGuard").finish_non_exhaustive()
    }
}
