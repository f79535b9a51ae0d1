//! Redis stream order channel (cargo feature `redis`).
//!
//! Messages are stream entries with the fields `id`, `userId` and
//! `voucherId`. Consumers read through one consumer group: `>` for new
//! entries, `0` for their own pending list. Dead letters go to
//! `{stream}.dlq` before the original entry is acknowledged.
//!
//! XREADGROUP with BLOCK stalls the connection it runs on. Each consumer
//! name therefore gets its own reader connection for blocking reads, opened
//! on first use; publishing, pending reads and acknowledgements share one
//! multiplexed connection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamId, StreamPendingCountReply, StreamReadReply};
use redis::RedisError;
use seckill_core::{
    ChannelError, ConsumerSettings, Delivery, DeliveryTag, OrderMessage, SeckillError,
    SeckillResult,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::channel::OrderChannel;

/// Order channel on a Redis stream with a consumer group.
#[derive(Clone)]
pub struct RedisStreamChannel {
    client: redis::Client,
    conn: ConnectionManager,
    readers: Arc<Mutex<HashMap<String, ConnectionManager>>>,
    stream: String,
    group: String,
}

impl RedisStreamChannel {
    /// Connect and make sure the stream and group exist.
    pub async fn connect(url: &str, settings: &ConsumerSettings) -> SeckillResult<Self> {
        let client = redis::Client::open(url).map_err(transient)?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(transient)?;
        let channel = Self::from_connection(client, conn, settings);
        channel.ensure_group().await?;
        Ok(channel)
    }

    /// Build on an existing shared connection. `client` opens the
    /// per-consumer reader connections.
    pub fn from_connection(
        client: redis::Client,
        conn: ConnectionManager,
        settings: &ConsumerSettings,
    ) -> Self {
        Self {
            client,
            conn,
            readers: Arc::new(Mutex::new(HashMap::new())),
            stream: settings.stream_key.clone(),
            group: settings.group.clone(),
        }
    }

    /// The blocking-read connection of `consumer`.
    async fn reader(&self, consumer: &str) -> SeckillResult<ConnectionManager> {
        let mut readers = self.readers.lock().await;
        if let Some(conn) = readers.get(consumer) {
            return Ok(conn.clone());
        }
        let conn = ConnectionManager::new(self.client.clone())
            .await
            .map_err(transient)?;
        debug!(stream = %self.stream, consumer = %consumer, "opened reader connection");
        readers.insert(consumer.to_string(), conn.clone());
        Ok(conn)
    }

    /// Number of dedicated reader connections opened so far.
    pub async fn reader_count(&self) -> usize {
        self.readers.lock().await.len()
    }

    pub fn dead_letter_key(&self) -> String {
        format!("{}.dlq", self.stream)
    }

    /// `XGROUP CREATE ... MKSTREAM`, tolerating an existing group.
    pub async fn ensure_group(&self) -> SeckillResult<()> {
        let mut conn = self.conn.clone();
        let created: Result<(), RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream)
            .arg(&self.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match created {
            Ok(()) => {
                info!(stream = %self.stream, group = %self.group, "created consumer group");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(transient(e)),
        }
    }

    async fn read_group(
        &self,
        consumer: &str,
        start: &str,
        block: Option<Duration>,
    ) -> SeckillResult<Option<StreamId>> {
        let mut conn = match block {
            Some(_) => self.reader(consumer).await?,
            None => self.conn.clone(),
        };
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.group)
            .arg(consumer)
            .arg("COUNT")
            .arg(1);
        if let Some(block) = block {
            cmd.arg("BLOCK").arg((block.as_millis() as u64).max(1));
        }
        cmd.arg("STREAMS").arg(&self.stream).arg(start);

        let reply: Option<StreamReadReply> =
            cmd.query_async(&mut conn).await.map_err(transient)?;
        Ok(reply
            .and_then(|reply| reply.keys.into_iter().next())
            .and_then(|key| key.ids.into_iter().next()))
    }

    async fn times_delivered(&self, consumer: &str, id: &str) -> SeckillResult<u32> {
        let mut conn = self.conn.clone();
        let reply: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.stream)
            .arg(&self.group)
            .arg(id)
            .arg(id)
            .arg(1)
            .arg(consumer)
            .query_async(&mut conn)
            .await
            .map_err(transient)?;
        Ok(reply
            .ids
            .first()
            .map_or(1, |pending| pending.times_delivered as u32))
    }

    async fn to_delivery(&self, consumer: &str, entry: StreamId) -> SeckillResult<Delivery> {
        let fields: Vec<(&str, String)> = ["id", "userId", "voucherId"]
            .into_iter()
            .filter_map(|name| entry.get::<String>(name).map(|value| (name, value)))
            .collect();
        let message = OrderMessage::from_fields(
            fields.iter().map(|(name, value)| (*name, value.as_str())),
        );
        let tag = DeliveryTag::new(entry.id.clone());

        match message {
            Some(message) => {
                let count = self.times_delivered(consumer, &entry.id).await?;
                Ok(Delivery::new(tag, message, count))
            }
            None => {
                // Unparseable entries can never succeed; park them straight away.
                warn!(stream = %self.stream, id = %entry.id, "malformed order entry");
                self.park(&tag, &[("raw", format!("{:?}", entry.map))], "malformed entry")
                    .await?;
                Err(ChannelError::UnknownDelivery {
                    tag: tag.to_string(),
                }
                .into())
            }
        }
    }

    async fn park(
        &self,
        tag: &DeliveryTag,
        fields: &[(&str, String)],
        reason: &str,
    ) -> SeckillResult<()> {
        let mut conn = self.conn.clone();
        let mut add = redis::cmd("XADD");
        add.arg(self.dead_letter_key()).arg("*");
        for (name, value) in fields {
            add.arg(*name).arg(value);
        }
        add.arg("sourceId").arg(tag.as_str()).arg("reason").arg(reason);
        let _: String = add.query_async(&mut conn).await.map_err(transient)?;
        self.acknowledge(tag).await
    }
}

fn transient(e: RedisError) -> SeckillError {
    ChannelError::Transient {
        reason: e.to_string(),
    }
    .into()
}

#[async_trait]
impl OrderChannel for RedisStreamChannel {
    async fn publish(&self, message: &OrderMessage) -> SeckillResult<DeliveryTag> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("XADD");
        cmd.arg(&self.stream).arg("*");
        for (name, value) in message.to_fields() {
            cmd.arg(name).arg(value);
        }
        let id: String = cmd.query_async(&mut conn).await.map_err(transient)?;
        debug!(stream = %self.stream, id = %id, "order entry appended");
        Ok(DeliveryTag::new(id))
    }

    async fn consume(&self, consumer: &str, timeout: Duration) -> SeckillResult<Option<Delivery>> {
        match self.read_group(consumer, ">", Some(timeout)).await? {
            Some(entry) => self.to_delivery(consumer, entry).await.map(Some),
            None => Ok(None),
        }
    }

    async fn consume_pending(&self, consumer: &str) -> SeckillResult<Option<Delivery>> {
        match self.read_group(consumer, "0", None).await? {
            Some(entry) => self.to_delivery(consumer, entry).await.map(Some),
            None => Ok(None),
        }
    }

    async fn acknowledge(&self, tag: &DeliveryTag) -> SeckillResult<()> {
        let mut conn = self.conn.clone();
        let acked: i64 = redis::cmd("XACK")
            .arg(&self.stream)
            .arg(&self.group)
            .arg(tag.as_str())
            .query_async(&mut conn)
            .await
            .map_err(transient)?;
        if acked == 0 {
            return Err(ChannelError::UnknownDelivery {
                tag: tag.to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> SeckillResult<()> {
        let mut fields: Vec<(&str, String)> = delivery.message.to_fields().into();
        fields.push(("deliveries", delivery.delivery_count.to_string()));
        self.park(&delivery.tag, &fields, reason).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seckill_core::{OrderId, UserId, VoucherId};

    // Needs a live server: REDIS_URL=redis://127.0.0.1:6379 cargo test --features redis -- --ignored
    async fn channel(stream: &str) -> RedisStreamChannel {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let settings = ConsumerSettings {
            stream_key: stream.to_string(),
            ..ConsumerSettings::default()
        };
        let channel = RedisStreamChannel::connect(&url, &settings).await.unwrap();
        let mut conn = channel.conn.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(stream)
            .arg(channel.dead_letter_key())
            .query_async(&mut conn)
            .await
            .unwrap();
        channel.ensure_group().await.unwrap();
        channel
    }

    #[tokio::test]
    #[ignore]
    async fn test_stream_delivery_redelivery_and_ack() {
        let channel = channel("test.stream.orders").await;
        let message = OrderMessage::new(OrderId::new(1), UserId::new(2), VoucherId::new(3));
        channel.publish(&message).await.unwrap();

        let first = channel
            .consume("c1", Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.message, message);
        assert_eq!(first.delivery_count, 1);

        let again = channel.consume_pending("c1").await.unwrap().unwrap();
        assert_eq!(again.tag, first.tag);
        assert_eq!(again.delivery_count, 2);

        channel.acknowledge(&again.tag).await.unwrap();
        assert!(channel.consume_pending("c1").await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore]
    async fn test_blocking_read_does_not_stall_other_consumers() {
        let channel = channel("test.stream.readers").await;
        let waiting = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.consume("c1", Duration::from_secs(2)).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = std::time::Instant::now();
        let message = OrderMessage::new(OrderId::new(1), UserId::new(2), VoucherId::new(3));
        channel.publish(&message).await.unwrap();
        let got = channel
            .consume("c2", Duration::from_millis(500))
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));

        // One of the two readers takes the entry; the other times out.
        let first = waiting.await.unwrap().unwrap();
        assert_eq!(got.is_some() as u8 + first.is_some() as u8, 1);
        assert_eq!(channel.reader_count().await, 2);
    }

    #[tokio::test]
    #[ignore]
    async fn test_stream_dead_letter() {
        let channel = channel("test.stream.dlq").await;
        let message = OrderMessage::new(OrderId::new(1), UserId::new(2), VoucherId::new(3));
        channel.publish(&message).await.unwrap();
        let delivery = channel
            .consume("c1", Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();

        channel.dead_letter(&delivery, "poison").await.unwrap();
        assert!(channel.consume_pending("c1").await.unwrap().is_none());

        let mut conn = channel.conn.clone();
        let parked: i64 = redis::cmd("XLEN")
            .arg(channel.dead_letter_key())
            .query_async(&mut conn)
            .await
            .unwrap();
        assert_eq!(parked, 1);
    }
}
