//! Cache-aside client with three read strategies.
//!
//! - [`CacheClient::query_with_null_caching`] caches confirmed absence as an
//!   empty marker so repeated lookups of missing ids never reach the loader.
//! - [`CacheClient::query_with_mutex_rebuild`] lets one caller per id rebuild
//!   a missing entry while the rest sleep and re-read, up to a retry cap.
//! - [`CacheClient::query_with_logical_expiry`] never blocks: expired entries
//!   are served stale while a background worker rebuilds them.

use std::fmt::Display;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use seckill_core::{CacheError, CacheSettings, SeckillResult, StoreError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::freshness::{CacheRead, LogicalEntry};
use super::traits::{CacheLoader, CacheMetrics, CacheStats, CacheableEntity};
use crate::keys::{CACHE_VOUCHER_PREFIX, EMPTY_MARKER, LOCK_VOUCHER_PREFIX};
use crate::lock::DistributedLock;
use crate::shared::SharedStore;

/// Key prefixes of one cached entity family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheNamespace {
    /// Payload keys are `{entity_prefix}{id}`.
    pub entity_prefix: String,
    /// Rebuild lock keys are `{lock_prefix}{id}`.
    pub lock_prefix: String,
}

impl CacheNamespace {
    pub fn new(entity_prefix: impl Into<String>, lock_prefix: impl Into<String>) -> Self {
        Self {
            entity_prefix: entity_prefix.into(),
            lock_prefix: lock_prefix.into(),
        }
    }

    /// `cache:voucher:` / `lock:voucher:`
    pub fn voucher() -> Self {
        Self::new(CACHE_VOUCHER_PREFIX, LOCK_VOUCHER_PREFIX)
    }

    pub fn entity_key(&self, id: &impl Display) -> String {
        format!("{}{}", self.entity_prefix, id)
    }

    pub fn lock_key(&self, id: &impl Display) -> String {
        format!("{}{}", self.lock_prefix, id)
    }
}

/// What a physical-TTL key currently holds.
enum Cached<T> {
    Hit(T),
    Empty,
    Miss,
}

/// Cache-aside accessor over the shared store.
///
/// Cheap to clone; clones share the rebuild pool and statistics.
#[derive(Clone)]
pub struct CacheClient {
    store: Arc<dyn SharedStore>,
    /// Lock service with an empty prefix; namespaces supply full keys.
    locks: DistributedLock,
    settings: CacheSettings,
    rebuild_permits: Arc<Semaphore>,
    rebuilds: Arc<Mutex<JoinSet<()>>>,
    metrics: Arc<CacheMetrics>,
}

impl CacheClient {
    pub fn new(store: Arc<dyn SharedStore>, settings: CacheSettings) -> Self {
        let permits = settings.rebuild_concurrency.max(1);
        Self {
            locks: DistributedLock::new(Arc::clone(&store), ""),
            store,
            settings,
            rebuild_permits: Arc::new(Semaphore::new(permits)),
            rebuilds: Arc::new(Mutex::new(JoinSet::new())),
            metrics: Arc::new(CacheMetrics::default()),
        }
    }

    /// Create a client with default settings.
    pub fn with_defaults(store: Arc<dyn SharedStore>) -> Self {
        Self::new(store, CacheSettings::default())
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Snapshot of the usage counters.
    pub fn stats(&self) -> CacheStats {
        self.metrics.snapshot()
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Store `value` under `key` with `ttl` plus a random jitter.
    pub async fn set<T: CacheableEntity>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> SeckillResult<()> {
        let json = to_json(key, value)?;
        self.store
            .set(key, &json, Some(self.jittered(ttl)))
            .await
    }

    /// Store `value` under `key` with no physical TTL and an embedded
    /// logical expiry `expire` from now. Used to pre-warm hot keys.
    pub async fn set_with_logical_expire<T: CacheableEntity>(
        &self,
        key: &str,
        value: &T,
        expire: Duration,
    ) -> SeckillResult<()> {
        let expire = chrono::Duration::from_std(expire).map_err(|e| StoreError::Serialization {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        let entry = LogicalEntry::new(value, Utc::now() + expire);
        let json = to_json(key, &entry)?;
        self.store.set(key, &json, None).await
    }

    /// Drop a cached entry so the next read goes to the loader.
    pub async fn invalidate(&self, key: &str) -> SeckillResult<bool> {
        self.store.delete(key).await
    }

    fn jittered(&self, base: Duration) -> Duration {
        let max = self.settings.ttl_jitter_max_secs;
        if max == 0 {
            return base;
        }
        base + Duration::from_secs(rand::rng().random_range(0..=max))
    }

    // ------------------------------------------------------------------
    // Strategies
    // ------------------------------------------------------------------

    /// Read through, caching confirmed absence as an empty marker.
    pub async fn query_with_null_caching<K, T, L>(
        &self,
        ns: &CacheNamespace,
        id: &K,
        loader: &L,
    ) -> SeckillResult<Option<CacheRead<T>>>
    where
        K: Display + Send + Sync,
        T: CacheableEntity,
        L: CacheLoader<K, T> + ?Sized,
    {
        let key = ns.entity_key(id);
        match self.read_cached::<T>(&key).await? {
            Cached::Hit(value) => Ok(Some(CacheRead::from_cache(value, None))),
            Cached::Empty => Ok(None),
            Cached::Miss => self.load_and_store(&key, id, loader).await,
        }
    }

    /// Read through, letting only the holder of the per-id rebuild lock call
    /// the loader. Others sleep and re-read, and give up with
    /// `CacheError::RebuildContention` after `mutex_max_attempts`.
    pub async fn query_with_mutex_rebuild<K, T, L>(
        &self,
        ns: &CacheNamespace,
        id: &K,
        loader: &L,
    ) -> SeckillResult<Option<CacheRead<T>>>
    where
        K: Display + Send + Sync,
        T: CacheableEntity,
        L: CacheLoader<K, T> + ?Sized,
    {
        let key = ns.entity_key(id);
        let lock_key = ns.lock_key(id);
        let attempts = self.settings.mutex_max_attempts.max(1);

        for attempt in 1..=attempts {
            match self.read_cached::<T>(&key).await? {
                Cached::Hit(value) => return Ok(Some(CacheRead::from_cache(value, None))),
                Cached::Empty => return Ok(None),
                Cached::Miss => {}
            }

            if let Some(handle) = self
                .locks
                .try_acquire(&lock_key, self.settings.rebuild_lock_lease)
                .await?
            {
                // Another holder may have finished between our read and the acquire.
                let result = match self.peek_cached::<T>(&key).await {
                    Ok(Cached::Hit(value)) => Ok(Some(CacheRead::from_cache(value, None))),
                    Ok(Cached::Empty) => Ok(None),
                    Ok(Cached::Miss) => self.load_and_store(&key, id, loader).await,
                    Err(e) => Err(e),
                };
                let released = self.locks.release(handle).await;
                return match (result, released) {
                    (Ok(read), Ok(_)) => Ok(read),
                    (Err(e), _) | (Ok(_), Err(e)) => Err(e),
                };
            }

            CacheMetrics::bump(&self.metrics.lock_contention);
            debug!(key = %key, attempt, "rebuild lock busy, retrying");
            if attempt < attempts {
                tokio::time::sleep(self.settings.mutex_retry_delay).await;
            }
        }

        warn!(key = %key, attempts, "gave up waiting for cache rebuild");
        Err(CacheError::RebuildContention { key, attempts }.into())
    }

    /// Serve pre-warmed entries without ever blocking on the loader.
    ///
    /// A missing key is reported absent. An expired entry is returned as
    /// stale, and if a rebuild worker is free and this caller wins the
    /// rebuild lock, that worker reloads it. With every worker busy the
    /// rebuild is left to a later read.
    pub async fn query_with_logical_expiry<K, T, L>(
        &self,
        ns: &CacheNamespace,
        id: K,
        loader: Arc<L>,
    ) -> SeckillResult<Option<CacheRead<T>>>
    where
        K: Display + Clone + Send + Sync + 'static,
        T: CacheableEntity,
        L: CacheLoader<K, T> + ?Sized + 'static,
    {
        let key = ns.entity_key(&id);
        let raw = match self.store.get(&key).await? {
            Some(raw) if raw != EMPTY_MARKER => raw,
            _ => {
                CacheMetrics::bump(&self.metrics.misses);
                return Ok(None);
            }
        };

        let entry: LogicalEntry<T> = from_json(&key, &raw)?;
        if !entry.is_expired() {
            CacheMetrics::bump(&self.metrics.hits);
            return Ok(Some(CacheRead::from_cache(
                entry.data,
                Some(entry.expire_time),
            )));
        }

        CacheMetrics::bump(&self.metrics.stale_hits);

        // Worker slot first: a rebuild lease must not run down in a queue.
        let Ok(permit) = Arc::clone(&self.rebuild_permits).try_acquire_owned() else {
            CacheMetrics::bump(&self.metrics.rebuilds_skipped);
            debug!(key = %key, "rebuild pool saturated, serving stale");
            return Ok(Some(CacheRead::stale(entry.data, entry.expire_time)));
        };

        let lock_key = ns.lock_key(&id);
        match self
            .locks
            .try_acquire(&lock_key, self.settings.rebuild_lock_lease)
            .await?
        {
            Some(handle) => {
                self.spawn_rebuild::<K, T, L>(key, id, loader, handle, permit);
            }
            None => {
                CacheMetrics::bump(&self.metrics.lock_contention);
            }
        }

        Ok(Some(CacheRead::stale(entry.data, entry.expire_time)))
    }

    /// Wait for every background rebuild scheduled so far.
    pub async fn wait_for_rebuilds(&self) {
        let mut pending = match self.rebuilds.lock() {
            Ok(mut set) => std::mem::replace(&mut *set, JoinSet::new()),
            Err(_) => return,
        };
        while let Some(joined) = pending.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "cache rebuild task aborted");
            }
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn spawn_rebuild<K, T, L>(
        &self,
        key: String,
        id: K,
        loader: Arc<L>,
        handle: seckill_core::LockHandle,
        permit: OwnedSemaphorePermit,
    ) where
        K: Display + Clone + Send + Sync + 'static,
        T: CacheableEntity,
        L: CacheLoader<K, T> + ?Sized + 'static,
    {
        let client = self.clone();
        let task = async move {
            let _permit = permit;
            CacheMetrics::bump(&client.metrics.loader_calls);
            let outcome = match loader.load(&id).await {
                Ok(Some(value)) => {
                    client
                        .set_with_logical_expire(&key, &value, client.settings.logical_expire)
                        .await
                }
                Ok(None) => client.store.delete(&key).await.map(|_| ()),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(()) => debug!(key = %key, entity = T::entity_name(), "cache rebuilt"),
                Err(e) => {
                    CacheMetrics::bump(&client.metrics.rebuild_failures);
                    warn!(key = %key, error = %e, "cache rebuild failed");
                }
            }

            if let Err(e) = client.locks.release(handle).await {
                warn!(key = %key, error = %e, "failed to release rebuild lock");
            }
        };

        match self.rebuilds.lock() {
            Ok(mut set) => {
                while let Some(finished) = set.try_join_next() {
                    if let Err(e) = finished {
                        warn!(error = %e, "cache rebuild task aborted");
                    }
                }
                set.spawn(task);
                CacheMetrics::bump(&self.metrics.rebuilds_scheduled);
            }
            Err(_) => warn!("rebuild registry poisoned, rebuild skipped"),
        }
    }

    /// Read a physical-TTL key and count the result.
    async fn read_cached<T: CacheableEntity>(&self, key: &str) -> SeckillResult<Cached<T>> {
        let cached = self.peek_cached(key).await?;
        let counter = match cached {
            Cached::Hit(_) => &self.metrics.hits,
            Cached::Empty => &self.metrics.empty_hits,
            Cached::Miss => &self.metrics.misses,
        };
        CacheMetrics::bump(counter);
        Ok(cached)
    }

    async fn peek_cached<T: CacheableEntity>(&self, key: &str) -> SeckillResult<Cached<T>> {
        Ok(match self.store.get(key).await? {
            Some(raw) if raw == EMPTY_MARKER => Cached::Empty,
            Some(raw) => Cached::Hit(from_json(key, &raw)?),
            None => Cached::Miss,
        })
    }

    /// Call the loader and write back the payload or an empty marker.
    async fn load_and_store<K, T, L>(
        &self,
        key: &str,
        id: &K,
        loader: &L,
    ) -> SeckillResult<Option<CacheRead<T>>>
    where
        K: Display + Send + Sync,
        T: CacheableEntity,
        L: CacheLoader<K, T> + ?Sized,
    {
        CacheMetrics::bump(&self.metrics.loader_calls);
        match loader.load(id).await? {
            Some(value) => {
                self.set(key, &value, self.settings.entity_ttl).await?;
                Ok(Some(CacheRead::from_loader(value)))
            }
            None => {
                debug!(key = %key, entity = T::entity_name(), "confirmed absent, caching empty marker");
                self.store
                    .set(key, EMPTY_MARKER, Some(self.settings.null_ttl))
                    .await?;
                Ok(None)
            }
        }
    }
}

impl std::fmt::Debug for CacheClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheClient")
            .field("settings", &self.settings)
            .field("stats", &self.stats())
            .finish()
    }
}

fn to_json<V: serde::Serialize + ?Sized>(key: &str, value: &V) -> SeckillResult<String> {
    serde_json::to_string(value).map_err(|e| {
        StoreError::Serialization {
            key: key.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

fn from_json<V: serde::de::DeserializeOwned>(key: &str, raw: &str) -> SeckillResult<V> {
    serde_json::from_str(raw).map_err(|e| {
        StoreError::CorruptValue {
            key: key.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}
