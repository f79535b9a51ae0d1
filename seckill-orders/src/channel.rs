//! Asynchronous order channel.
//!
//! The channel sits between admission and persistence. Delivery is
//! at-least-once: a message handed to a consumer stays on that consumer's
//! pending list until acknowledged, and can be read again from there after
//! a crash or a failed write.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use seckill_core::{
    ChannelError, Delivery, DeliveryTag, OrderMessage, SeckillResult, StoreError,
};
use tokio::sync::Notify;
use tokio::time::Instant;

/// Durable append queue with consumer-group semantics.
#[async_trait]
pub trait OrderChannel: Send + Sync {
    /// Append a message. Returns the tag it will be delivered under.
    async fn publish(&self, message: &OrderMessage) -> SeckillResult<DeliveryTag>;

    /// Take the next never-delivered message for `consumer`, waiting up to
    /// `timeout` if the channel is empty.
    async fn consume(&self, consumer: &str, timeout: Duration) -> SeckillResult<Option<Delivery>>;

    /// Read the oldest unacknowledged message already delivered to `consumer`.
    async fn consume_pending(&self, consumer: &str) -> SeckillResult<Option<Delivery>>;

    /// Mark a delivery as durably handled.
    async fn acknowledge(&self, tag: &DeliveryTag) -> SeckillResult<()>;

    /// Move a delivery to the dead-letter list and acknowledge it.
    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> SeckillResult<()>;
}

/// A message parked after too many failed deliveries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub tag: DeliveryTag,
    pub message: OrderMessage,
    pub deliveries: u32,
    pub reason: String,
}

#[derive(Debug)]
struct PendingEntry {
    message: OrderMessage,
    consumer: String,
    deliveries: u32,
}

#[derive(Debug, Default)]
struct ChannelState {
    next_seq: u64,
    ready: VecDeque<(u64, OrderMessage)>,
    pending: BTreeMap<u64, PendingEntry>,
    dead: Vec<DeadLetter>,
    closed: bool,
}

/// Bounded in-process channel.
///
/// Tags look like stream ids (`{seq}-0`). Capacity counts both undelivered
/// and pending messages, so an unacknowledged backlog applies back-pressure.
#[derive(Debug)]
pub struct InMemoryOrderChannel {
    state: Mutex<ChannelState>,
    notify: Notify,
    capacity: usize,
}

impl InMemoryOrderChannel {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(ChannelState {
                next_seq: 1,
                ..Default::default()
            }),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> SeckillResult<MutexGuard<'_, ChannelState>> {
        self.state.lock().map_err(|_| StoreError::LockPoisoned.into())
    }

    /// Refuse new messages and wake waiting consumers. Messages already
    /// queued can still be consumed.
    pub fn close(&self) -> SeckillResult<()> {
        self.lock()?.closed = true;
        self.notify.notify_waiters();
        Ok(())
    }

    /// Messages published but not yet delivered.
    pub fn ready_len(&self) -> SeckillResult<usize> {
        Ok(self.lock()?.ready.len())
    }

    /// Messages delivered but not yet acknowledged.
    pub fn pending_len(&self) -> SeckillResult<usize> {
        Ok(self.lock()?.pending.len())
    }

    pub fn dead_letters(&self) -> SeckillResult<Vec<DeadLetter>> {
        Ok(self.lock()?.dead.clone())
    }

    fn tag_for(seq: u64) -> DeliveryTag {
        DeliveryTag::new(format!("{seq}-0"))
    }

    fn seq_of(tag: &DeliveryTag) -> SeckillResult<u64> {
        tag.as_str()
            .split_once('-')
            .and_then(|(seq, _)| seq.parse().ok())
            .ok_or_else(|| {
                ChannelError::UnknownDelivery {
                    tag: tag.to_string(),
                }
                .into()
            })
    }

    fn try_take(&self, consumer: &str) -> SeckillResult<Option<Delivery>> {
        let mut state = self.lock()?;
        match state.ready.pop_front() {
            Some((seq, message)) => {
                state.pending.insert(
                    seq,
                    PendingEntry {
                        message: message.clone(),
                        consumer: consumer.to_string(),
                        deliveries: 1,
                    },
                );
                Ok(Some(Delivery::new(Self::tag_for(seq), message, 1)))
            }
            None if state.closed => Err(ChannelError::Closed.into()),
            None => Ok(None),
        }
    }
}

impl Default for InMemoryOrderChannel {
    fn default() -> Self {
        Self::new(seckill_core::ConsumerSettings::default().channel_capacity)
    }
}

#[async_trait]
impl OrderChannel for InMemoryOrderChannel {
    async fn publish(&self, message: &OrderMessage) -> SeckillResult<DeliveryTag> {
        let tag = {
            let mut state = self.lock()?;
            if state.closed {
                return Err(ChannelError::Closed.into());
            }
            if state.ready.len() + state.pending.len() >= self.capacity {
                return Err(ChannelError::Full {
                    capacity: self.capacity,
                }
                .into());
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            state.ready.push_back((seq, message.clone()));
            Self::tag_for(seq)
        };
        self.notify.notify_one();
        Ok(tag)
    }

    async fn consume(&self, consumer: &str, timeout: Duration) -> SeckillResult<Option<Delivery>> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            if let Some(delivery) = self.try_take(consumer)? {
                return Ok(Some(delivery));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn consume_pending(&self, consumer: &str) -> SeckillResult<Option<Delivery>> {
        let mut state = self.lock()?;
        let found = state
            .pending
            .iter_mut()
            .find(|(_, entry)| entry.consumer == consumer);
        Ok(found.map(|(seq, entry)| {
            entry.deliveries += 1;
            Delivery::new(Self::tag_for(*seq), entry.message.clone(), entry.deliveries)
        }))
    }

    async fn acknowledge(&self, tag: &DeliveryTag) -> SeckillResult<()> {
        let seq = Self::seq_of(tag)?;
        match self.lock()?.pending.remove(&seq) {
            Some(_) => Ok(()),
            None => Err(ChannelError::UnknownDelivery {
                tag: tag.to_string(),
            }
            .into()),
        }
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> SeckillResult<()> {
        let seq = Self::seq_of(&delivery.tag)?;
        let mut state = self.lock()?;
        let entry = state.pending.remove(&seq).ok_or_else(|| ChannelError::UnknownDelivery {
            tag: delivery.tag.to_string(),
        })?;
        state.dead.push(DeadLetter {
            tag: delivery.tag.clone(),
            message: entry.message,
            deliveries: entry.deliveries,
            reason: reason.to_string(),
        });
        Ok(())
    }
}
