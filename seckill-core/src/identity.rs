//! Identity types for seckill entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Number of low bits of an [`OrderId`] reserved for the per-day sequence.
pub const SEQUENCE_BITS: u32 = 32;

/// Mask selecting the sequence half of an [`OrderId`].
pub const SEQUENCE_MASK: u64 = (1u64 << SEQUENCE_BITS) - 1;

/// Numeric identifier newtype with display, parsing and transparent serde.
macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Wrap a raw numeric id.
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            /// The raw numeric value.
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse::<u64>().map(Self)
            }
        }
    };
}

numeric_id!(
    /// Identifier of a buyer.
    UserId
);

numeric_id!(
    /// Identifier of a flash-sale voucher.
    VoucherId
);

numeric_id!(
    /// Generator-issued order identifier.
    ///
    /// Layout: `seconds_since_epoch_offset << 32 | daily_sequence`.
    OrderId
);

impl OrderId {
    /// Build an id from its timestamp and sequence halves.
    ///
    /// The sequence must already fit in [`SEQUENCE_BITS`]; callers check this.
    pub const fn compose(timestamp_secs: u64, sequence: u64) -> Self {
        Self((timestamp_secs << SEQUENCE_BITS) | (sequence & SEQUENCE_MASK))
    }

    /// Seconds since the generator's epoch offset.
    pub const fn timestamp_secs(self) -> u64 {
        self.0 >> SEQUENCE_BITS
    }

    /// Position within the day's sequence.
    pub const fn sequence(self) -> u64 {
        self.0 & SEQUENCE_MASK
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_id_halves() {
        let id = OrderId::compose(123_456, 42);
        assert_eq!(id.timestamp_secs(), 123_456);
        assert_eq!(id.sequence(), 42);
        assert_eq!(id.get(), (123_456u64 << 32) | 42);
    }

    #[test]
    fn test_ids_order_by_timestamp_first() {
        let earlier = OrderId::compose(10, u32::MAX as u64);
        let later = OrderId::compose(11, 1);
        assert!(earlier < later);
    }

    #[test]
    fn test_parse_and_display() {
        let user: UserId = " 1010 ".parse().unwrap();
        assert_eq!(user, UserId::new(1010));
        assert_eq!(user.to_string(), "1010");
        assert!("abc".parse::<VoucherId>().is_err());
    }

    #[test]
    fn test_serde_is_transparent() {
        let json = serde_json::to_string(&VoucherId::new(7)).unwrap();
        assert_eq!(json, "7");
        let back: VoucherId = serde_json::from_str(&json).unwrap();
        assert_eq!(back.get(), 7);
    }
}
