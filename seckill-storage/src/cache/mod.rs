//! Cache-aside layer over the shared store.
//!
//! Payloads are JSON text under `{entity_prefix}{id}`. A stored empty string
//! is a confirmed-absent marker and is never confused with a miss. Reads
//! return [`CacheRead<T>`], which records whether the value came from the
//! cache, the loader, or a logically expired entry.
//!
//! # Example
//!
//! ```ignore
//! let cache = CacheClient::with_defaults(store.clone());
//! let loader = VoucherLoader::new(records.clone());
//!
//! // Missing ids are remembered for the null TTL
//! let read = cache
//!     .query_with_null_caching(&CacheNamespace::voucher(), &voucher_id, &loader)
//!     .await?;
//!
//! // Hot keys: pre-warm, then read without ever blocking
//! cache.set_with_logical_expire("cache:voucher:1", &voucher, ttl).await?;
//! let read = cache
//!     .query_with_logical_expiry(&CacheNamespace::voucher(), voucher_id, Arc::new(loader))
//!     .await?;
//! ```

pub mod client;
pub mod freshness;
pub mod traits;

pub use client::{CacheClient, CacheNamespace};
pub use freshness::{CacheRead, LogicalEntry, ReadOrigin};
pub use traits::{CacheLoader, CacheStats, CacheableEntity, VoucherLoader};
