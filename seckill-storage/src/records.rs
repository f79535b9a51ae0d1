//! Durable record store contract and in-memory implementation.
//!
//! The durable store owns persisted orders and the voucher catalogue. The
//! core only needs a narrow contract from it: keyed reads and writes, a
//! conditional update, an existence check on `(user, voucher)` and one
//! transactional order creation.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use seckill_core::{
    Order, OrderId, RecordError, SeckillResult, SeckillVoucher, StoreError, UserId, VoucherFilter,
    VoucherId, VoucherMutation,
};

/// Result of a transactional order creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// Stock was decremented and the order inserted.
    Persisted,
    /// An order for the same user and voucher already exists. Nothing changed.
    Duplicate,
    /// The durable stock is exhausted. Nothing changed.
    OutOfStock,
}

/// Durable record store for orders and vouchers.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Get an order by id.
    async fn get_order(&self, id: OrderId) -> SeckillResult<Option<Order>>;

    /// Insert an order. Fails with `UniqueViolation` if the user already
    /// holds an order for the voucher.
    async fn save_order(&self, order: &Order) -> SeckillResult<()>;

    /// Whether any order exists for the user and voucher.
    async fn exists_where(&self, user_id: UserId, voucher_id: VoucherId) -> SeckillResult<bool>;

    /// Get a voucher by id.
    async fn get_voucher(&self, id: VoucherId) -> SeckillResult<Option<SeckillVoucher>>;

    /// Insert or replace a voucher.
    async fn save_voucher(&self, voucher: &SeckillVoucher) -> SeckillResult<()>;

    /// Apply `mutation` to the voucher only if it matches `filter`.
    /// Returns true if a row was changed.
    async fn conditional_update(
        &self,
        filter: VoucherFilter,
        mutation: VoucherMutation,
    ) -> SeckillResult<bool>;

    /// Uniqueness check, conditional stock decrement and insert as one unit.
    async fn create_order(&self, order: &Order) -> SeckillResult<CreateOutcome>;
}

#[derive(Debug, Default)]
struct Tables {
    orders: HashMap<OrderId, Order>,
    buyers: HashSet<(UserId, VoucherId)>,
    vouchers: HashMap<VoucherId, SeckillVoucher>,
}

/// In-memory record store.
///
/// All tables sit behind one lock, so `create_order` is trivially
/// transactional. Writes can be made to fail on demand to exercise the
/// consumer's recovery path.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRecordStore {
    tables: Arc<RwLock<Tables>>,
    failing_writes: Arc<AtomicUsize>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` writes fail with `RecordError::Unavailable`.
    pub fn fail_next_writes(&self, n: usize) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Get count of stored orders.
    pub fn order_count(&self) -> SeckillResult<usize> {
        Ok(self.read()?.orders.len())
    }

    /// All orders for a voucher, sorted by id.
    pub fn orders_for_voucher(&self, voucher_id: VoucherId) -> SeckillResult<Vec<Order>> {
        let tables = self.read()?;
        let mut orders: Vec<Order> = tables
            .orders
            .values()
            .filter(|o| o.voucher_id == voucher_id)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.id);
        Ok(orders)
    }

    fn read(&self) -> SeckillResult<std::sync::RwLockReadGuard<'_, Tables>> {
        self.tables.read().map_err(|_| StoreError::LockPoisoned.into())
    }

    fn write(&self) -> SeckillResult<std::sync::RwLockWriteGuard<'_, Tables>> {
        self.tables.write().map_err(|_| StoreError::LockPoisoned.into())
    }

    fn check_injected_failure(&self) -> SeckillResult<()> {
        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(RecordError::Unavailable {
                reason: "injected write failure".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

fn voucher_not_found(id: VoucherId) -> seckill_core::SeckillError {
    RecordError::NotFound {
        entity: "SeckillVoucher".to_string(),
        id: id.to_string(),
    }
    .into()
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get_order(&self, id: OrderId) -> SeckillResult<Option<Order>> {
        Ok(self.read()?.orders.get(&id).cloned())
    }

    async fn save_order(&self, order: &Order) -> SeckillResult<()> {
        self.check_injected_failure()?;
        let mut tables = self.write()?;
        if !tables.buyers.insert((order.user_id, order.voucher_id)) {
            return Err(RecordError::UniqueViolation {
                user_id: order.user_id,
                voucher_id: order.voucher_id,
            }
            .into());
        }
        tables.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn exists_where(&self, user_id: UserId, voucher_id: VoucherId) -> SeckillResult<bool> {
        Ok(self.read()?.buyers.contains(&(user_id, voucher_id)))
    }

    async fn get_voucher(&self, id: VoucherId) -> SeckillResult<Option<SeckillVoucher>> {
        Ok(self.read()?.vouchers.get(&id).cloned())
    }

    async fn save_voucher(&self, voucher: &SeckillVoucher) -> SeckillResult<()> {
        self.check_injected_failure()?;
        self.write()?
            .vouchers
            .insert(voucher.voucher_id, voucher.clone());
        Ok(())
    }

    async fn conditional_update(
        &self,
        filter: VoucherFilter,
        mutation: VoucherMutation,
    ) -> SeckillResult<bool> {
        self.check_injected_failure()?;
        let mut tables = self.write()?;
        match tables.vouchers.get_mut(&filter.voucher_id) {
            Some(voucher) if filter.matches(voucher) => {
                mutation.apply(voucher);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(voucher_not_found(filter.voucher_id)),
        }
    }

    async fn create_order(&self, order: &Order) -> SeckillResult<CreateOutcome> {
        self.check_injected_failure()?;
        let mut tables = self.write()?;

        if tables.buyers.contains(&(order.user_id, order.voucher_id)) {
            return Ok(CreateOutcome::Duplicate);
        }

        let filter = VoucherFilter::in_stock(order.voucher_id);
        match tables.vouchers.get_mut(&order.voucher_id) {
            Some(voucher) if filter.matches(voucher) => {
                VoucherMutation::DecrementStock(1).apply(voucher);
            }
            Some(_) => return Ok(CreateOutcome::OutOfStock),
            None => return Err(voucher_not_found(order.voucher_id)),
        }

        tables.buyers.insert((order.user_id, order.voucher_id));
        tables.orders.insert(order.id, order.clone());
        Ok(CreateOutcome::Persisted)
    }
}
