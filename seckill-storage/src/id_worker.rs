//! Order id generator.
//!
//! Ids are `(now - epoch) << 32 | counter`, where the counter is a
//! per-domain, per-day atomic increment in the shared store. The counter key
//! carries the date, so it restarts at 1 every calendar day (UTC).

use std::sync::Arc;

use chrono::Utc;
use seckill_core::{IdError, IdSettings, OrderId, SeckillResult, Timestamp, SEQUENCE_MASK};

use crate::keys::id_counter_key;
use crate::shared::SharedStore;

/// Date format of the counter key suffix.
const DAY_FORMAT: &str = "%Y:%m:%d";

/// Globally unique, time-ordered id source.
#[derive(Clone)]
pub struct IdGenerator {
    store: Arc<dyn SharedStore>,
    epoch_secs: i64,
}

impl IdGenerator {
    pub fn new(store: Arc<dyn SharedStore>, settings: &IdSettings) -> Self {
        Self {
            store,
            epoch_secs: settings.epoch_secs,
        }
    }

    /// Next id for `domain` at the current time.
    pub async fn next_id(&self, domain: &str) -> SeckillResult<OrderId> {
        self.next_id_at(domain, Utc::now()).await
    }

    /// Next id for `domain`, stamped with `now`.
    pub async fn next_id_at(&self, domain: &str, now: Timestamp) -> SeckillResult<OrderId> {
        let now_secs = now.timestamp();
        let offset = now_secs - self.epoch_secs;
        if offset < 0 {
            return Err(IdError::ClockBeforeEpoch {
                now_secs,
                epoch_secs: self.epoch_secs,
            }
            .into());
        }

        let day = now.format(DAY_FORMAT).to_string();
        let counter = self.store.increment(&id_counter_key(domain, &day)).await?;

        // INCR starts at 1; anything outside (0, 2^32) would bleed into the timestamp bits.
        if counter <= 0 || counter as u64 > SEQUENCE_MASK {
            return Err(IdError::SequenceExhausted {
                domain: domain.to_string(),
                day,
            }
            .into());
        }

        Ok(OrderId::compose(offset as u64, counter as u64))
    }
}

impl std::fmt::Debug for IdGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdGenerator")
            .field("epoch_secs", &self.epoch_secs)
            .finish()
    }
}
