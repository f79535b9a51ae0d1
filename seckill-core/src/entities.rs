//! Core entity structures

use crate::{OrderId, Timestamp, UserId, VoucherId};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A persisted voucher order.
///
/// The pair `(user_id, voucher_id)` is unique across all persisted orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub voucher_id: VoucherId,
    pub created_at: Timestamp,
}

impl Order {
    /// Create an order stamped with the current time.
    pub fn new(id: OrderId, user_id: UserId, voucher_id: VoucherId) -> Self {
        Self {
            id,
            user_id,
            voucher_id,
            created_at: Utc::now(),
        }
    }
}

/// A flash-sale voucher as kept by the durable record store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeckillVoucher {
    pub voucher_id: VoucherId,
    /// Units left in the durable store. Never negative.
    pub stock: i64,
    pub begin_time: Timestamp,
    pub end_time: Timestamp,
}

/// Remaining stock of a voucher as seen by the shared store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoucherStock {
    pub voucher_id: VoucherId,
    pub remaining: i64,
}

/// Request-scoped caller context, passed explicitly through the call chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub user_id: UserId,
    /// Correlates log lines of one request.
    pub request_id: Uuid,
}

impl RequestContext {
    /// Context for an authenticated user with a fresh request id.
    pub fn for_user(user_id: UserId) -> Self {
        Self {
            user_id,
            request_id: Uuid::now_v7(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_ids_are_distinct() {
        let a = RequestContext::for_user(UserId::new(1));
        let b = RequestContext::for_user(UserId::new(1));
        assert_eq!(a.user_id, b.user_id);
        assert_ne!(a.request_id, b.request_id);
    }
}
