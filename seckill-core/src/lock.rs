//! Lock handles for leases held in the shared store.
//!
//! A handle is proof of a successful `try_acquire`. Releasing consumes it, so
//! a released handle cannot be released twice.
//!
//! ```text
//! (free) ─── try_acquire() ──→ LockHandle ─── release(handle) ──→ (free)
//!                                  │
//!                           lease expires ──→ (free, handle now stale)
//! ```

use crate::Timestamp;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Proof of holding a named lock until the lease runs out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHandle {
    resource_name: String,
    key: String,
    holder_token: String,
    lease: Duration,
    acquired_at: Timestamp,
}

impl LockHandle {
    /// Create a handle for a lock that was just acquired.
    pub fn new(
        resource_name: impl Into<String>,
        key: impl Into<String>,
        holder_token: impl Into<String>,
        lease: Duration,
    ) -> Self {
        Self {
            resource_name: resource_name.into(),
            key: key.into(),
            holder_token: holder_token.into(),
            lease,
            acquired_at: Utc::now(),
        }
    }

    /// Mint a holder token unique to one acquisition.
    pub fn mint_token() -> String {
        Uuid::now_v7().simple().to_string()
    }

    /// The resource this lock protects, without the key prefix.
    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    /// Full store key of the lock.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Value stored under the key while this handle holds the lock.
    pub fn holder_token(&self) -> &str {
        &self.holder_token
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    pub fn acquired_at(&self) -> Timestamp {
        self.acquired_at
    }

    /// When the store will drop the key on its own.
    pub fn expires_at(&self) -> Timestamp {
        let lease = chrono::Duration::from_std(self.lease)
            .unwrap_or_else(|_| chrono::Duration::milliseconds(self.lease.as_millis() as i64));
        self.acquired_at + lease
    }

    /// Check if the lease has run out as of `now`.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at()
    }

    /// Remaining lease, or `None` once expired.
    pub fn remaining_duration(&self, now: Timestamp) -> Option<Duration> {
        let expires_at = self.expires_at();
        if now >= expires_at {
            None
        } else {
            (expires_at - now).to_std().ok()
        }
    }
}
