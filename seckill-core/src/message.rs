//! Queue messages carrying admitted orders to the durable writer.

use crate::{Order, OrderId, UserId, VoucherId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An admitted order waiting to be persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderMessage {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub voucher_id: VoucherId,
}

impl OrderMessage {
    pub fn new(order_id: OrderId, user_id: UserId, voucher_id: VoucherId) -> Self {
        Self {
            order_id,
            user_id,
            voucher_id,
        }
    }

    /// The order this message will become once persisted.
    pub fn to_order(&self) -> Order {
        Order::new(self.order_id, self.user_id, self.voucher_id)
    }

    /// Flatten into the field/value pairs used by stream entries.
    pub fn to_fields(&self) -> [(&'static str, String); 3] {
        [
            ("id", self.order_id.to_string()),
            ("userId", self.user_id.to_string()),
            ("voucherId", self.voucher_id.to_string()),
        ]
    }

    /// Rebuild from stream entry fields. Returns `None` if a field is missing
    /// or not numeric.
    pub fn from_fields<'a, I>(fields: I) -> Option<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut order_id = None;
        let mut user_id = None;
        let mut voucher_id = None;
        for (name, value) in fields {
            match name {
                "id" => order_id = value.parse().ok(),
                "userId" => user_id = value.parse().ok(),
                "voucherId" => voucher_id = value.parse().ok(),
                _ => {}
            }
        }
        Some(Self::new(order_id?, user_id?, voucher_id?))
    }
}

/// Channel-assigned identity of one queued message.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeliveryTag(String);

impl DeliveryTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One delivery of a message to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub message: OrderMessage,
    /// How many times this message has been handed out, this one included.
    pub delivery_count: u32,
}

impl Delivery {
    pub fn new(tag: DeliveryTag, message: OrderMessage, delivery_count: u32) -> Self {
        Self {
            tag,
            message,
            delivery_count,
        }
    }

    /// True if the message was handed out before.
    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_roundtrip() {
        let msg = OrderMessage::new(OrderId::new(99), UserId::new(3), VoucherId::new(4));
        let fields = msg.to_fields();
        let parsed =
            OrderMessage::from_fields(fields.iter().map(|(k, v)| (*k, v.as_str()))).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_from_fields_requires_every_field() {
        let parsed = OrderMessage::from_fields([("id", "1"), ("userId", "2")]);
        assert!(parsed.is_none());
        let garbage = OrderMessage::from_fields([("id", "x"), ("userId", "2"), ("voucherId", "3")]);
        assert!(garbage.is_none());
    }

    #[test]
    fn test_redelivery_flag() {
        let msg = OrderMessage::new(OrderId::new(1), UserId::new(1), VoucherId::new(1));
        let first = Delivery::new(DeliveryTag::new("1-0"), msg.clone(), 1);
        let second = Delivery::new(DeliveryTag::new("1-0"), msg, 2);
        assert!(!first.is_redelivery());
        assert!(second.is_redelivery());
    }
}
