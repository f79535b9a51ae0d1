//! Filter and mutation expressions for conditional record updates.
//!
//! The durable record store applies a [`VoucherMutation`] only when the
//! current row matches the [`VoucherFilter`], in one step.

use crate::{SeckillVoucher, VoucherId};
use serde::{Deserialize, Serialize};

/// Row predicate for a conditional voucher update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoucherFilter {
    pub voucher_id: VoucherId,
    /// Require `stock > n` when set.
    pub stock_greater_than: Option<i64>,
}

impl VoucherFilter {
    /// Match the voucher unconditionally.
    pub fn by_id(voucher_id: VoucherId) -> Self {
        Self {
            voucher_id,
            stock_greater_than: None,
        }
    }

    /// Match the voucher only while it has stock left.
    pub fn in_stock(voucher_id: VoucherId) -> Self {
        Self {
            voucher_id,
            stock_greater_than: Some(0),
        }
    }

    pub fn matches(&self, voucher: &SeckillVoucher) -> bool {
        voucher.voucher_id == self.voucher_id
            && self
                .stock_greater_than
                .map_or(true, |floor| voucher.stock > floor)
    }
}

/// Change applied by a conditional voucher update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoucherMutation {
    /// `stock = stock - n`
    DecrementStock(i64),
    /// `stock = n`
    SetStock(i64),
}

impl VoucherMutation {
    pub fn apply(&self, voucher: &mut SeckillVoucher) {
        match *self {
            VoucherMutation::DecrementStock(n) => voucher.stock -= n,
            VoucherMutation::SetStock(n) => voucher.stock = n,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn voucher(stock: i64) -> SeckillVoucher {
        let now = Utc::now();
        SeckillVoucher {
            voucher_id: VoucherId::new(1),
            stock,
            begin_time: now,
            end_time: now,
        }
    }

    #[test]
    fn test_in_stock_filter() {
        let filter = VoucherFilter::in_stock(VoucherId::new(1));
        assert!(filter.matches(&voucher(1)));
        assert!(!filter.matches(&voucher(0)));
        assert!(!VoucherFilter::in_stock(VoucherId::new(2)).matches(&voucher(5)));
    }

    #[test]
    fn test_mutations() {
        let mut v = voucher(3);
        VoucherMutation::DecrementStock(1).apply(&mut v);
        assert_eq!(v.stock, 2);
        VoucherMutation::SetStock(10).apply(&mut v);
        assert_eq!(v.stock, 10);
    }
}
