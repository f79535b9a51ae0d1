//! Reservation outcomes returned by the atomic stock check.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result of one atomic check-and-decrement against a voucher's stock.
///
/// The wire codes match the scripted store operation:
/// `0 = granted`, `1 = insufficient stock`, `2 = already reserved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationOutcome {
    /// One unit was taken for this user.
    Granted,
    /// No unit left.
    InsufficientStock,
    /// This user already holds a reservation for the voucher.
    AlreadyReserved,
}

impl ReservationOutcome {
    /// Script return code for this outcome.
    pub const fn code(self) -> i64 {
        match self {
            ReservationOutcome::Granted => 0,
            ReservationOutcome::InsufficientStock => 1,
            ReservationOutcome::AlreadyReserved => 2,
        }
    }

    /// Decode a script return code.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(ReservationOutcome::Granted),
            1 => Some(ReservationOutcome::InsufficientStock),
            2 => Some(ReservationOutcome::AlreadyReserved),
            _ => None,
        }
    }

    pub fn is_granted(self) -> bool {
        matches!(self, ReservationOutcome::Granted)
    }
}

impl fmt::Display for ReservationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReservationOutcome::Granted => "granted",
            ReservationOutcome::InsufficientStock => "insufficient stock",
            ReservationOutcome::AlreadyReserved => "already reserved",
        };
        f.write_str(s)
    }
}

/// Why a submit was turned away. Final and synchronous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectReason {
    InsufficientStock,
    AlreadyReserved,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::InsufficientStock => f.write_str("insufficient stock"),
            RejectReason::AlreadyReserved => f.write_str("already reserved"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_roundtrip() {
        for outcome in [
            ReservationOutcome::Granted,
            ReservationOutcome::InsufficientStock,
            ReservationOutcome::AlreadyReserved,
        ] {
            assert_eq!(ReservationOutcome::from_code(outcome.code()), Some(outcome));
        }
    }

    #[test]
    fn test_unknown_code() {
        assert_eq!(ReservationOutcome::from_code(3), None);
        assert_eq!(ReservationOutcome::from_code(-1), None);
    }
}
