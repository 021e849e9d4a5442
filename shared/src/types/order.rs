// shared/src/types/order.rs
// Order payloads relayed by the hub. The order itself lives in the external
// document store; only what the events carry is modelled here.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Shipped,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "shipped" => Ok(OrderStatus::Shipped),
            "completed" => Ok(OrderStatus::Completed),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(format!("unknown order status '{}'", other)),
        }
    }
}

/// Payload of `ORDER_CREATED`: ids plus whatever summary the order handler
/// attaches (totals, farmer, item count...). Summary keys are flattened.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreated {
    #[serde(deserialize_with = "id_string")]
    pub order_id: String,
    #[serde(deserialize_with = "id_string")]
    pub user_id: String,
    #[serde(flatten)]
    pub summary: Map<String, Value>,
}

/// Payload of `ORDER_STATUS_CHANGED`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusUpdate {
    #[serde(deserialize_with = "id_string")]
    pub order_id: String,
    #[serde(deserialize_with = "id_string")]
    pub user_id: String,
    pub status: OrderStatus,
}

// Document-store ids come through as either strings or integers
fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) if !s.is_empty() => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a non-empty string or integer id, got {}",
            other
        ))),
    }
}

/// Serialise a payload into the `data` object of an envelope.
pub fn to_data<T: Serialize>(payload: &T) -> serde_json::Result<Map<String, Value>> {
    match serde_json::to_value(payload)? {
        Value::Object(map) => Ok(map),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            Ok(map)
        }
    }
}
