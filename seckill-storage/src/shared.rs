//! Shared-store contract and the in-memory implementation.
//!
//! The shared store is the one place where cross-process coordination
//! happens: cache entries, lock keys, id counters, stock counters and
//! reservation sets all live here. Every operation on the contract is a
//! single atomic step from the point of view of other callers.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use seckill_core::{ReservationOutcome, SeckillResult, StoreError, UserId, VoucherId};
use tokio::time::Instant;

use crate::keys::{order_set_key, stock_key};

/// Atomic operations the core needs from the shared key-value store.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Read a string value. A stored empty string is returned as `Some("")`.
    async fn get(&self, key: &str) -> SeckillResult<Option<String>>;

    /// Write a string value, replacing any previous value and TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> SeckillResult<()>;

    /// Write only if the key is absent. Returns true if the value was written.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> SeckillResult<bool>;

    /// Remove a key. Returns true if it existed.
    async fn delete(&self, key: &str) -> SeckillResult<bool>;

    /// Remove a key only while it still holds `expected`, as one step.
    async fn delete_if_equals(&self, key: &str, expected: &str) -> SeckillResult<bool>;

    /// Increment an integer counter, creating it at zero first if absent.
    async fn increment(&self, key: &str) -> SeckillResult<i64>;

    /// Check membership, check stock, decrement and record the user, as one step.
    async fn reserve_stock(
        &self,
        voucher_id: VoucherId,
        user_id: UserId,
    ) -> SeckillResult<ReservationOutcome>;

    /// Undo a granted reservation: drop the membership and give the unit
    /// back, as one step. Returns false if the user held no reservation.
    async fn release_reservation(&self, voucher_id: VoucherId, user_id: UserId)
        -> SeckillResult<bool>;
}

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// Single-process shared store.
///
/// One mutex guards the whole keyspace, which gives every operation the
/// same all-or-nothing behaviour a server-side script has. Expiry is
/// evaluated lazily against tokio's clock, so paused-time tests can move
/// TTLs forward with `tokio::time::advance`.
#[derive(Debug, Default)]
pub struct InMemorySharedStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemorySharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> SeckillResult<MutexGuard<'_, HashMap<String, Entry>>> {
        self.entries
            .lock()
            .map_err(|_| StoreError::LockPoisoned.into())
    }

    /// Remaining TTL of a live key; `None` for missing or persistent keys.
    pub fn time_to_live(&self, key: &str) -> SeckillResult<Option<Duration>> {
        let mut entries = self.lock()?;
        let now = Instant::now();
        Ok(live_entry(&mut entries, key, now)
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }

    /// Whether `member` is in the set stored under `key`.
    pub fn is_member(&self, key: &str, member: &str) -> SeckillResult<bool> {
        let mut entries = self.lock()?;
        match live_entry(&mut entries, key, Instant::now()).map(|e| &e.value) {
            Some(Value::Set(set)) => Ok(set.contains(member)),
            Some(Value::Str(_)) => Err(wrong_type(key, "set")),
            None => Ok(false),
        }
    }

    /// Number of live keys.
    pub fn len(&self) -> SeckillResult<usize> {
        let entries = self.lock()?;
        let now = Instant::now();
        Ok(entries.values().filter(|e| e.is_live(now)).count())
    }

    pub fn is_empty(&self) -> SeckillResult<bool> {
        Ok(self.len()? == 0)
    }
}

/// Drop the entry if it has expired, then return whatever is left.
fn live_entry<'a>(
    entries: &'a mut HashMap<String, Entry>,
    key: &str,
    now: Instant,
) -> Option<&'a mut Entry> {
    if entries.get(key).is_some_and(|e| !e.is_live(now)) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

fn wrong_type(key: &str, expected: &str) -> seckill_core::SeckillError {
    StoreError::CorruptValue {
        key: key.to_string(),
        reason: format!("value is not a {expected}"),
    }
    .into()
}

fn parse_counter(key: &str, raw: &str) -> SeckillResult<i64> {
    raw.parse::<i64>().map_err(|e| {
        StoreError::CorruptValue {
            key: key.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

fn read_counter(entries: &mut HashMap<String, Entry>, key: &str, now: Instant) -> SeckillResult<i64> {
    match live_entry(entries, key, now).map(|e| &e.value) {
        Some(Value::Str(raw)) => parse_counter(key, raw),
        Some(Value::Set(_)) => Err(wrong_type(key, "string")),
        None => Ok(0),
    }
}

/// Overwrite a counter in place, keeping its TTL.
fn write_counter(entries: &mut HashMap<String, Entry>, key: &str, value: i64) {
    match entries.get_mut(key) {
        Some(entry) => entry.value = Value::Str(value.to_string()),
        None => {
            entries.insert(key.to_string(), Entry::new(Value::Str(value.to_string()), None));
        }
    }
}

#[async_trait]
impl SharedStore for InMemorySharedStore {
    async fn get(&self, key: &str) -> SeckillResult<Option<String>> {
        let mut entries = self.lock()?;
        match live_entry(&mut entries, key, Instant::now()).map(|e| &e.value) {
            Some(Value::Str(s)) => Ok(Some(s.clone())),
            Some(Value::Set(_)) => Err(wrong_type(key, "string")),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> SeckillResult<()> {
        let mut entries = self.lock()?;
        entries.insert(key.to_string(), Entry::new(Value::Str(value.to_string()), ttl));
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> SeckillResult<bool> {
        let mut entries = self.lock()?;
        if live_entry(&mut entries, key, Instant::now()).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry::new(Value::Str(value.to_string()), Some(ttl)),
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> SeckillResult<bool> {
        let mut entries = self.lock()?;
        let existed = live_entry(&mut entries, key, Instant::now()).is_some();
        entries.remove(key);
        Ok(existed)
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> SeckillResult<bool> {
        let mut entries = self.lock()?;
        let matches = matches!(
            live_entry(&mut entries, key, Instant::now()).map(|e| &e.value),
            Some(Value::Str(current)) if current == expected
        );
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }

    async fn increment(&self, key: &str) -> SeckillResult<i64> {
        let mut entries = self.lock()?;
        let next = read_counter(&mut entries, key, Instant::now())?
            .checked_add(1)
            .ok_or_else(|| StoreError::CorruptValue {
                key: key.to_string(),
                reason: "increment would overflow".to_string(),
            })?;
        write_counter(&mut entries, key, next);
        Ok(next)
    }

    async fn reserve_stock(
        &self,
        voucher_id: VoucherId,
        user_id: UserId,
    ) -> SeckillResult<ReservationOutcome> {
        let stock_key = stock_key(voucher_id);
        let order_key = order_set_key(voucher_id);
        let member = user_id.to_string();
        let now = Instant::now();

        let mut entries = self.lock()?;

        match live_entry(&mut entries, &order_key, now).map(|e| &e.value) {
            Some(Value::Set(set)) if set.contains(&member) => {
                return Ok(ReservationOutcome::AlreadyReserved);
            }
            Some(Value::Str(_)) => return Err(wrong_type(&order_key, "set")),
            _ => {}
        }

        let remaining = read_counter(&mut entries, &stock_key, now)?;
        if remaining <= 0 {
            return Ok(ReservationOutcome::InsufficientStock);
        }

        write_counter(&mut entries, &stock_key, remaining - 1);
        match entries.get_mut(&order_key) {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => {
                set.insert(member);
            }
            _ => {
                entries.insert(
                    order_key,
                    Entry::new(Value::Set(HashSet::from([member])), None),
                );
            }
        }
        Ok(ReservationOutcome::Granted)
    }

    async fn release_reservation(
        &self,
        voucher_id: VoucherId,
        user_id: UserId,
    ) -> SeckillResult<bool> {
        let stock_key = stock_key(voucher_id);
        let order_key = order_set_key(voucher_id);
        let member = user_id.to_string();
        let now = Instant::now();

        let mut entries = self.lock()?;

        let removed = match live_entry(&mut entries, &order_key, now).map(|e| &mut e.value) {
            Some(Value::Set(set)) => set.remove(&member),
            Some(Value::Str(_)) => return Err(wrong_type(&order_key, "set")),
            None => false,
        };
        if !removed {
            return Ok(false);
        }

        let remaining = read_counter(&mut entries, &stock_key, now)?;
        write_counter(&mut entries, &stock_key, remaining + 1);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_get_distinguishes_empty_from_missing() {
        let store = InMemorySharedStore::new();
        store.set("a", "", None).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(String::new()));
        assert_eq!(store.get("b").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expires_keys() {
        let store = InMemorySharedStore::new();
        store
            .set("k", "v", Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(
            store.time_to_live("k").unwrap(),
            Some(Duration::from_secs(5))
        );

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.is_empty().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_if_absent_respects_live_keys() {
        let store = InMemorySharedStore::new();
        assert!(store
            .set_if_absent("lock", "a", Duration::from_secs(1))
            .await
            .unwrap());
        assert!(!store
            .set_if_absent("lock", "b", Duration::from_secs(1))
            .await
            .unwrap());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(store
            .set_if_absent("lock", "b", Duration::from_secs(1))
            .await
            .unwrap());
        assert_eq!(store.get("lock").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_delete_if_equals() {
        let store = InMemorySharedStore::new();
        store.set("lock", "token-a", None).await.unwrap();
        assert!(!store.delete_if_equals("lock", "token-b").await.unwrap());
        assert!(store.delete_if_equals("lock", "token-a").await.unwrap());
        assert!(!store.delete("lock").await.unwrap());
    }

    #[tokio::test]
    async fn test_increment_starts_at_zero() {
        let store = InMemorySharedStore::new();
        assert_eq!(store.increment("c").await.unwrap(), 1);
        assert_eq!(store.increment("c").await.unwrap(), 2);

        store.set("bad", "x", None).await.unwrap();
        assert!(matches!(
            store.increment("bad").await,
            Err(seckill_core::SeckillError::Store(StoreError::CorruptValue { .. }))
        ));
    }

    #[tokio::test]
    async fn test_reserve_checks_membership_before_stock() {
        let store = InMemorySharedStore::new();
        let voucher = VoucherId::new(1);
        store.set(&stock_key(voucher), "1", None).await.unwrap();

        let first = store.reserve_stock(voucher, UserId::new(7)).await.unwrap();
        assert_eq!(first, ReservationOutcome::Granted);

        // Sold out, but the repeat buyer still hears AlreadyReserved.
        let again = store.reserve_stock(voucher, UserId::new(7)).await.unwrap();
        assert_eq!(again, ReservationOutcome::AlreadyReserved);

        let other = store.reserve_stock(voucher, UserId::new(8)).await.unwrap();
        assert_eq!(other, ReservationOutcome::InsufficientStock);
        assert_eq!(store.get(&stock_key(voucher)).await.unwrap().as_deref(), Some("0"));
    }

    #[tokio::test]
    async fn test_reserve_without_stock_key_is_insufficient() {
        let store = InMemorySharedStore::new();
        let outcome = store
            .reserve_stock(VoucherId::new(404), UserId::new(1))
            .await
            .unwrap();
        assert_eq!(outcome, ReservationOutcome::InsufficientStock);
    }

    #[tokio::test]
    async fn test_release_returns_unit() {
        let store = InMemorySharedStore::new();
        let voucher = VoucherId::new(2);
        store.set(&stock_key(voucher), "1", None).await.unwrap();
        store.reserve_stock(voucher, UserId::new(1)).await.unwrap();

        assert!(store.release_reservation(voucher, UserId::new(1)).await.unwrap());
        assert!(!store.release_reservation(voucher, UserId::new(1)).await.unwrap());
        assert_eq!(store.get(&stock_key(voucher)).await.unwrap().as_deref(), Some("1"));
        assert!(!store.is_member(&order_set_key(voucher), "1").unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reservations_never_oversell() {
        let store = Arc::new(InMemorySharedStore::new());
        let voucher = VoucherId::new(3);
        store.set(&stock_key(voucher), "10", None).await.unwrap();

        let mut handles = Vec::new();
        for user in 0..100u64 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.reserve_stock(voucher, UserId::new(user)).await.unwrap()
            }));
        }

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap().is_granted() {
                granted += 1;
            }
        }
        assert_eq!(granted, 10);
        assert_eq!(store.get(&stock_key(voucher)).await.unwrap().as_deref(), Some("0"));
    }
}
