//! Seckill Core - Data Types
//!
//! Pure data structures shared by every other crate: identifiers, entities,
//! reservation outcomes, queue messages, lock handles, configuration and
//! errors. No I/O lives here.

pub mod config;
pub mod entities;
pub mod error;
pub mod filter;
pub mod identity;
pub mod lock;
pub mod message;
pub mod reservation;

pub use config::{
    CacheSettings, ConsumerSettings, IdSettings, LockSettings, SeckillConfig,
    DEFAULT_ID_EPOCH_SECS,
};
pub use entities::{Order, RequestContext, SeckillVoucher, VoucherStock};
pub use error::{
    CacheError, ChannelError, ConfigError, ConsumerError, IdError, LockError, RecordError,
    SeckillError, SeckillResult, StoreError,
};
pub use filter::{VoucherFilter, VoucherMutation};
pub use identity::{OrderId, Timestamp, UserId, VoucherId, SEQUENCE_BITS, SEQUENCE_MASK};
pub use lock::LockHandle;
pub use message::{Delivery, DeliveryTag, OrderMessage};
pub use reservation::{RejectReason, ReservationOutcome};

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Composing an order id and splitting it again yields the same halves.
        #[test]
        fn prop_order_id_layout(ts in 0u64..(1u64 << 31), seq in 0u64..=SEQUENCE_MASK) {
            let id = OrderId::compose(ts, seq);
            prop_assert_eq!(id.timestamp_secs(), ts);
            prop_assert_eq!(id.sequence(), seq);
        }

        /// A later second always yields a larger id regardless of sequence.
        #[test]
        fn prop_order_id_monotonic_in_time(
            ts in 0u64..(1u64 << 30),
            seq_a in 0u64..=SEQUENCE_MASK,
            seq_b in 0u64..=SEQUENCE_MASK,
        ) {
            prop_assert!(OrderId::compose(ts, seq_a) < OrderId::compose(ts + 1, seq_b));
        }

        /// Every unknown script code is rejected; known codes decode back.
        #[test]
        fn prop_reservation_codes(code in -10i64..10) {
            match ReservationOutcome::from_code(code) {
                Some(outcome) => prop_assert_eq!(outcome.code(), code),
                None => prop_assert!(!(0..=2).contains(&code)),
            }
        }

        /// validate() accepts any worker count but rejects a zero-capacity channel.
        #[test]
        fn prop_config_rejects_zero_capacity(workers in 1usize..64) {
            let mut config = SeckillConfig::default();
            config.consumer.workers = workers;
            prop_assert!(config.validate().is_ok());
            config.consumer.channel_capacity = 0;
            prop_assert!(config.validate().is_err());
        }

        /// The in-stock filter matches exactly the rows with stock left.
        #[test]
        fn prop_in_stock_filter(stock in -5i64..50) {
            let now = chrono::Utc::now();
            let voucher = SeckillVoucher {
                voucher_id: VoucherId::new(1),
                stock,
                begin_time: now,
                end_time: now,
            };
            prop_assert_eq!(VoucherFilter::in_stock(VoucherId::new(1)).matches(&voucher), stock > 0);
        }
    }
}
