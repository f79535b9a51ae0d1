//! Seckill Orders - Admission and Persistence
//!
//! The write path of a flash sale, split in two:
//!
//! - [`OrderPipeline`] admits or rejects a purchase synchronously against
//!   the shared store and enqueues admitted orders.
//! - [`OrderConsumer`] workers drain the channel and write orders to the
//!   durable store, at least once and idempotently.
//!
//! The Redis stream channel is behind the `redis` feature.

pub mod channel;
pub mod consumer;
pub mod metrics;
pub mod pipeline;
#[cfg(feature = "redis")]
pub mod redis_channel;
pub mod writer;

pub use channel::{DeadLetter, InMemoryOrderChannel, OrderChannel};
pub use consumer::{HandleOutcome, OrderConsumer};
pub use metrics::{ConsumerMetrics, ConsumerSnapshot};
pub use pipeline::{OrderPipeline, SubmitOutcome};
#[cfg(feature = "redis")]
pub use redis_channel::RedisStreamChannel;
pub use writer::{OrderWriter, RecordOrderWriter};
