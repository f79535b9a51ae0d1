//! Distributed lock over the shared store.
//!
//! Acquire is a single `SET key token NX` with the lease as TTL. Release
//! deletes the key only while it still holds the handle's token, so a
//! holder whose lease already ran out can never remove a lock that
//! somebody else has taken since.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use seckill_core::{LockError, LockHandle, SeckillResult};
use tracing::{debug, warn};

use crate::shared::SharedStore;

/// Lease-based, non-blocking mutual exclusion across processes.
#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn SharedStore>,
    key_prefix: String,
}

impl DistributedLock {
    /// Create a lock service writing keys under `key_prefix`.
    pub fn new(store: Arc<dyn SharedStore>, key_prefix: impl Into<String>) -> Self {
        Self {
            store,
            key_prefix: key_prefix.into(),
        }
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// Full store key of the lock for `resource_name`.
    pub fn key_for(&self, resource_name: &str) -> String {
        format!("{}{}", self.key_prefix, resource_name)
    }

    /// Try once to take the lock. Returns `None` if someone else holds it.
    pub async fn try_acquire(
        &self,
        resource_name: &str,
        lease: Duration,
    ) -> SeckillResult<Option<LockHandle>> {
        let key = self.key_for(resource_name);
        let token = LockHandle::mint_token();

        if self.store.set_if_absent(&key, &token, lease).await? {
            Ok(Some(LockHandle::new(resource_name, key, token, lease)))
        } else {
            debug!(resource = %resource_name, "lock busy");
            Ok(None)
        }
    }

    /// Release a held lock. Returns false when the lease had already run
    /// out and the key is gone or owned by another holder.
    pub async fn release(&self, handle: LockHandle) -> SeckillResult<bool> {
        let released = self
            .store
            .delete_if_equals(handle.key(), handle.holder_token())
            .await?;
        if !released {
            debug!(
                resource = %handle.resource_name(),
                lease_ms = handle.lease().as_millis() as u64,
                "lock release was a no-op, lease already lost"
            );
        }
        Ok(released)
    }

    /// Run `body` while holding the lock, releasing it on every exit path.
    ///
    /// Fails with `LockError::Busy` without running `body` when the lock
    /// is held elsewhere.
    pub async fn with_lock<F, Fut, T>(
        &self,
        resource_name: &str,
        lease: Duration,
        body: F,
    ) -> SeckillResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SeckillResult<T>>,
    {
        let handle = self
            .try_acquire(resource_name, lease)
            .await?
            .ok_or_else(|| LockError::Busy {
                resource: resource_name.to_string(),
            })?;

        let result = body().await;

        match self.release(handle).await {
            Ok(_) => result,
            Err(e) => {
                warn!(resource = %resource_name, error = %e, "failed to release lock");
                // The body's own error wins; otherwise surface the release failure.
                result.and(Err(e))
            }
        }
    }
}

impl std::fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLock")
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::InMemorySharedStore;
    use seckill_core::{SeckillError, StoreError};

    fn lock() -> (Arc<InMemorySharedStore>, DistributedLock) {
        let store = Arc::new(InMemorySharedStore::new());
        let lock = DistributedLock::new(store.clone(), "lock:");
        (store, lock)
    }

    #[tokio::test]
    async fn test_acquire_is_exclusive() {
        let (store, lock) = lock();
        let handle = lock
            .try_acquire("order:1", Duration::from_secs(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(handle.key(), "lock:order:1");
        assert_eq!(
            store.get("lock:order:1").await.unwrap().as_deref(),
            Some(handle.holder_token())
        );

        assert!(lock
            .try_acquire("order:1", Duration::from_secs(10))
            .await
            .unwrap()
            .is_none());

        assert!(lock.release(handle).await.unwrap());
        assert!(lock
            .try_acquire("order:1", Duration::from_secs(10))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_release_keeps_new_holder() {
        let (store, lock) = lock();
        let stale = lock
            .try_acquire("order:2", Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;

        let fresh = lock
            .try_acquire("order:2", Duration::from_secs(10))
            .await
            .unwrap()
            .unwrap();

        assert!(!lock.release(stale).await.unwrap());
        assert_eq!(
            store.get("lock:order:2").await.unwrap().as_deref(),
            Some(fresh.holder_token())
        );
    }

    #[tokio::test]
    async fn test_with_lock_releases_after_error() {
        let (store, lock) = lock();
        let result: SeckillResult<()> = lock
            .with_lock("order:3", Duration::from_secs(10), || async {
                Err(StoreError::transient("write", "boom").into())
            })
            .await;
        assert!(result.unwrap_err().is_transient());
        assert_eq!(store.get("lock:order:3").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_with_lock_reports_busy() {
        let (_store, lock) = lock();
        let _held = lock
            .try_acquire("order:4", Duration::from_secs(10))
            .await
            .unwrap()
            .unwrap();

        let result = lock
            .with_lock("order:4", Duration::from_secs(10), || async { Ok(1) })
            .await;
        assert!(matches!(result, Err(SeckillError::Lock(LockError::Busy { .. }))));
    }

    #[tokio::test]
    async fn test_with_lock_returns_body_value() {
        let (store, lock) = lock();
        let value = lock
            .with_lock("order:5", Duration::from_secs(10), || async { Ok(42) })
            .await
            .unwrap();
        assert_eq!(value, 42);
        assert!(store.is_empty().unwrap());
    }
}
