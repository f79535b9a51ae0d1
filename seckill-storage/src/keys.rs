//! Shared-store key layout.

use seckill_core::{UserId, VoucherId};

/// Prefix of cached voucher payloads.
pub const CACHE_VOUCHER_PREFIX: &str = "cache:voucher:";

/// Prefix of voucher cache rebuild locks.
pub const LOCK_VOUCHER_PREFIX: &str = "lock:voucher:";

/// Prefix of remaining-stock counters.
pub const STOCK_PREFIX: &str = "seckill:stock:";

/// Prefix of the per-voucher set of users holding a reservation.
pub const ORDER_SET_PREFIX: &str = "seckill:order:";

/// Prefix of id generator counters.
pub const ID_COUNTER_PREFIX: &str = "icr:";

/// Empty-marker payload stored for confirmed-absent ids.
pub const EMPTY_MARKER: &str = "";

pub fn stock_key(voucher_id: VoucherId) -> String {
    format!("{STOCK_PREFIX}{voucher_id}")
}

pub fn order_set_key(voucher_id: VoucherId) -> String {
    format!("{ORDER_SET_PREFIX}{voucher_id}")
}

/// Daily counter key, `icr:{domain}:{yyyy:MM:dd}`.
pub fn id_counter_key(domain: &str, day: &str) -> String {
    format!("{ID_COUNTER_PREFIX}{domain}:{day}")
}

/// Resource name of the consumer's per-user lock, used under the lock prefix.
pub fn order_lock_resource(user_id: UserId) -> String {
    format!("order:{user_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(stock_key(VoucherId::new(10)), "seckill:stock:10");
        assert_eq!(order_set_key(VoucherId::new(10)), "seckill:order:10");
        assert_eq!(id_counter_key("order", "2026:10:17"), "icr:order:2026:10:17");
        assert_eq!(order_lock_resource(UserId::new(3)), "order:3");
    }
}
