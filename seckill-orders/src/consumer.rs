//! Order Consumer Background Task
//!
//! Workers drain the order channel and persist each admitted order:
//!
//! 1. Take a delivery (new messages first; the pending list on startup,
//!    after a failure, and whenever the channel is idle)
//! 2. Dead-letter it, and hand its reservation back, once it has failed
//!    too many times (deliveries skipped for a busy lock do not count)
//! 3. Take the per-user lock `lock:order:{userId}` without blocking
//! 4. Write the order through the [`OrderWriter`], which skips replays
//! 5. Release the lock, then acknowledge
//!
//! A delivery is acknowledged only after the write succeeded or was
//! deterministically rejected. Anything else stays pending and comes back.
//!
//! # Example
//!
//! ```ignore
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let consumer = OrderConsumer::new("worker", channel, locks, stock, writer, settings, lease);
//! let handles = consumer.spawn_workers(shutdown_rx);
//!
//! // Later, trigger shutdown
//! let _ = shutdown_tx.send(true);
//! for handle in handles {
//!     handle.await?;
//! }
//! println!("persisted {}", consumer.metrics().snapshot().persisted);
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use seckill_core::{
    ChannelError, ConsumerError, ConsumerSettings, Delivery, DeliveryTag, SeckillError,
    SeckillResult, StoreError,
};
use seckill_storage::keys::order_lock_resource;
use seckill_storage::{CreateOutcome, DistributedLock, StockGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::channel::OrderChannel;
use crate::metrics::ConsumerMetrics;
use crate::writer::OrderWriter;

/// What happened to one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Order written and delivery acknowledged.
    Persisted,
    /// Order already existed; delivery acknowledged.
    Duplicate,
    /// Durable stock exhausted; delivery acknowledged.
    OutOfStock,
    /// Per-user lock held elsewhere; delivery left pending.
    LockBusy,
    /// Failed too often; moved to the dead-letter list, reservation returned.
    DeadLettered,
}

/// One named member of the consumer group.
#[derive(Clone)]
pub struct OrderConsumer {
    name: String,
    channel: Arc<dyn OrderChannel>,
    locks: DistributedLock,
    stock: StockGuard,
    writer: Arc<dyn OrderWriter>,
    settings: ConsumerSettings,
    lock_lease: Duration,
    metrics: Arc<ConsumerMetrics>,
    /// Deliveries per tag that were skipped for a busy user lock.
    deferrals: Arc<Mutex<HashMap<DeliveryTag, u32>>>,
}

impl OrderConsumer {
    pub fn new(
        name: impl Into<String>,
        channel: Arc<dyn OrderChannel>,
        locks: DistributedLock,
        stock: StockGuard,
        writer: Arc<dyn OrderWriter>,
        settings: ConsumerSettings,
        lock_lease: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            channel,
            locks,
            stock,
            writer,
            settings,
            lock_lease,
            metrics: Arc::new(ConsumerMetrics::new()),
            deferrals: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Metrics shared by this consumer and every worker spawned from it.
    pub fn metrics(&self) -> Arc<ConsumerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// A copy under another consumer name, sharing collaborators and metrics.
    pub fn with_name(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    /// Start `settings.workers` named workers (`{name}-{i}`).
    pub fn spawn_workers(
        &self,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<Arc<ConsumerMetrics>>> {
        (0..self.settings.workers.max(1))
            .map(|i| {
                let worker = self.with_name(format!("{}-{}", self.name, i));
                let shutdown = shutdown.clone();
                tokio::spawn(async move { worker.run(shutdown).await })
            })
            .collect()
    }

    /// Run until the shutdown signal is received or the channel closes.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Arc<ConsumerMetrics> {
        info!(
            consumer = %self.name,
            group = %self.settings.group,
            block_timeout_ms = self.settings.block_timeout.as_millis() as u64,
            "order consumer started"
        );

        self.drain_pending(&shutdown).await;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let next = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                next = self.channel.consume(&self.name, self.settings.block_timeout) => next,
            };

            match next {
                Ok(Some(delivery)) => match self.handle_delivery(delivery).await {
                    Ok(_) => {}
                    Err(e) => {
                        error!(consumer = %self.name, error = %e, "order handling failed");
                        self.drain_pending(&shutdown).await;
                    }
                },
                // Idle: retry anything left pending by a busy lock.
                Ok(None) => self.drain_pending(&shutdown).await,
                Err(SeckillError::Channel(ChannelError::Closed)) => {
                    info!(consumer = %self.name, "order channel closed");
                    break;
                }
                Err(e) => {
                    error!(consumer = %self.name, error = %e, "order channel read failed");
                    tokio::time::sleep(self.settings.pending_retry_delay).await;
                }
            }
        }

        let snapshot = self.metrics.snapshot();
        info!(
            consumer = %self.name,
            persisted = snapshot.persisted,
            duplicates = snapshot.duplicates,
            out_of_stock = snapshot.out_of_stock,
            lock_busy = snapshot.lock_busy,
            write_failures = snapshot.write_failures,
            dead_lettered = snapshot.dead_lettered,
            "order consumer stopped"
        );

        self.metrics()
    }

    /// Handle the next new delivery, waiting up to the block timeout.
    /// Returns `None` if nothing arrived.
    pub async fn process_next(&self) -> SeckillResult<Option<HandleOutcome>> {
        match self
            .channel
            .consume(&self.name, self.settings.block_timeout)
            .await?
        {
            Some(delivery) => self.handle_delivery(delivery).await.map(Some),
            None => Ok(None),
        }
    }

    /// Work through this consumer's pending list until it is empty, a lock
    /// is busy, or shutdown is signalled.
    pub async fn drain_pending(&self, shutdown: &watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                return;
            }

            let delivery = match self.channel.consume_pending(&self.name).await {
                Ok(Some(delivery)) => delivery,
                Ok(None) => return,
                Err(e) => {
                    error!(consumer = %self.name, error = %e, "pending list read failed");
                    tokio::time::sleep(self.settings.pending_retry_delay).await;
                    continue;
                }
            };
            ConsumerMetrics::incr(&self.metrics.redeliveries);

            match self.handle_delivery(delivery).await {
                Ok(HandleOutcome::LockBusy) => return,
                Ok(_) => {}
                Err(e) => {
                    warn!(consumer = %self.name, error = %e, "pending order still failing");
                    tokio::time::sleep(self.settings.pending_retry_delay).await;
                }
            }
        }
    }

    /// Handle one delivery end to end.
    pub async fn handle_delivery(&self, delivery: Delivery) -> SeckillResult<HandleOutcome> {
        let message = &delivery.message;

        let attempts = delivery
            .delivery_count
            .saturating_sub(self.deferrals_of(&delivery.tag)?);
        if attempts > self.settings.max_deliveries {
            return self.dead_letter(&delivery, attempts).await;
        }

        let resource = order_lock_resource(message.user_id);
        let Some(handle) = self.locks.try_acquire(&resource, self.lock_lease).await? else {
            warn!(
                consumer = %self.name,
                user_id = %message.user_id,
                order_id = %message.order_id,
                "user order lock busy, leaving delivery pending"
            );
            self.defer(&delivery.tag)?;
            ConsumerMetrics::incr(&self.metrics.lock_busy);
            return Ok(HandleOutcome::LockBusy);
        };

        let order = message.to_order();
        let written = self.writer.write(&order).await;

        if let Err(e) = self.locks.release(handle).await {
            warn!(resource = %resource, error = %e, "failed to release user order lock");
        }

        let outcome = match written {
            Ok(CreateOutcome::Persisted) => {
                ConsumerMetrics::incr(&self.metrics.persisted);
                debug!(order_id = %order.id, "order persisted");
                HandleOutcome::Persisted
            }
            Ok(CreateOutcome::Duplicate) => {
                ConsumerMetrics::incr(&self.metrics.duplicates);
                debug!(order_id = %order.id, "duplicate delivery ignored");
                HandleOutcome::Duplicate
            }
            Ok(CreateOutcome::OutOfStock) => {
                ConsumerMetrics::incr(&self.metrics.out_of_stock);
                warn!(
                    order_id = %order.id,
                    voucher_id = %order.voucher_id,
                    "durable stock exhausted for admitted order"
                );
                HandleOutcome::OutOfStock
            }
            Err(e) => {
                ConsumerMetrics::incr(&self.metrics.write_failures);
                return Err(ConsumerError::WriteFailure {
                    order_id: order.id,
                    reason: e.to_string(),
                }
                .into());
            }
        };

        self.channel.acknowledge(&delivery.tag).await?;
        self.forget(&delivery.tag)?;
        Ok(outcome)
    }

    /// Park a delivery that keeps failing and return its reservation, so
    /// the unit goes back on sale and the user may buy again.
    async fn dead_letter(&self, delivery: &Delivery, attempts: u32) -> SeckillResult<HandleOutcome> {
        let message = &delivery.message;
        error!(
            consumer = %self.name,
            tag = %delivery.tag,
            order_id = %message.order_id,
            attempts,
            deliveries = delivery.delivery_count,
            "order failed too often, dead-lettering"
        );
        self.channel
            .dead_letter(delivery, "max deliveries exceeded")
            .await?;
        self.forget(&delivery.tag)?;
        ConsumerMetrics::incr(&self.metrics.dead_lettered);

        match self.stock.cancel(message.voucher_id, message.user_id).await {
            Ok(released) => info!(
                order_id = %message.order_id,
                user_id = %message.user_id,
                voucher_id = %message.voucher_id,
                released,
                "reservation returned for dead-lettered order"
            ),
            Err(e) => error!(
                order_id = %message.order_id,
                error = %e,
                "failed to return reservation for dead-lettered order"
            ),
        }
        Ok(HandleOutcome::DeadLettered)
    }

    fn deferrals(&self) -> SeckillResult<std::sync::MutexGuard<'_, HashMap<DeliveryTag, u32>>> {
        self.deferrals
            .lock()
            .map_err(|_| StoreError::LockPoisoned.into())
    }

    fn deferrals_of(&self, tag: &DeliveryTag) -> SeckillResult<u32> {
        Ok(self.deferrals()?.get(tag).copied().unwrap_or(0))
    }

    fn defer(&self, tag: &DeliveryTag) -> SeckillResult<()> {
        *self.deferrals()?.entry(tag.clone()).or_insert(0) += 1;
        Ok(())
    }

    fn forget(&self, tag: &DeliveryTag) -> SeckillResult<()> {
        self.deferrals()?.remove(tag);
        Ok(())
    }
}

impl std::fmt::Debug for OrderConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderConsumer")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .field("metrics", &self.metrics.snapshot())
            .finish()
    }
}
