//! Seckill Storage - Shared-Store Primitives
//!
//! Everything that coordinates through the shared key-value store lives here:
//! the store contract itself, the cache-aside client, the distributed lock,
//! the id generator and the atomic stock guard. The durable record store
//! contract sits alongside, since the cache loaders and the order writer
//! both read from it.
//!
//! In-memory implementations are always available. The Redis shared store
//! is behind the `redis` feature.

pub mod cache;
pub mod id_worker;
pub mod keys;
pub mod lock;
pub mod records;
#[cfg(feature = "redis")]
pub mod redis_backend;
pub mod shared;
pub mod stock;

pub use cache::{
    CacheClient, CacheLoader, CacheNamespace, CacheRead, CacheStats, CacheableEntity,
    LogicalEntry, ReadOrigin, VoucherLoader,
};
pub use id_worker::IdGenerator;
pub use lock::DistributedLock;
pub use records::{CreateOutcome, InMemoryRecordStore, RecordStore};
#[cfg(feature = "redis")]
pub use redis_backend::RedisSharedStore;
pub use shared::{InMemorySharedStore, SharedStore};
pub use stock::StockGuard;
