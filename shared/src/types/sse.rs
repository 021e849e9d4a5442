// shared/src/types/sse.rs
// Event envelope carried over the order-event stream

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Closed set of event kinds that travel in an [`EventEnvelope`].
///
/// Only the `ORDER_*` kinds are published by the hub. `HEARTBEAT` is written
/// by the stream endpoint to keep idle connections alive and is swallowed by
/// consumers. The `CONNECTION_*` kinds never cross the wire: consumers raise
/// them locally to report their own lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    OrderStatusChanged,
    OrderCreated,
    OrderDeleted,
    ConnectionOpen,
    ConnectionClosed,
    ConnectionError,
    Heartbeat,
}

impl EventType {
    pub const ALL: [EventType; 7] = [
        EventType::OrderStatusChanged,
        EventType::OrderCreated,
        EventType::OrderDeleted,
        EventType::ConnectionOpen,
        EventType::ConnectionClosed,
        EventType::ConnectionError,
        EventType::Heartbeat,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::OrderStatusChanged => "ORDER_STATUS_CHANGED",
            EventType::OrderCreated => "ORDER_CREATED",
            EventType::OrderDeleted => "ORDER_DELETED",
            EventType::ConnectionOpen => "CONNECTION_OPEN",
            EventType::ConnectionClosed => "CONNECTION_CLOSED",
            EventType::ConnectionError => "CONNECTION_ERROR",
            EventType::Heartbeat => "HEARTBEAT",
        }
    }

    /// Consumer-local lifecycle signals.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            EventType::ConnectionOpen | EventType::ConnectionClosed | EventType::ConnectionError
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = SseError;

    // Case-sensitive, same as the wire form
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| SseError::UnknownEventType(s.to_string()))
    }
}

/// `{ "type": ..., "data": {...}, "timestamp": <ms> }`
///
/// Fields are private so an envelope cannot change after it has been built;
/// the hub serialises it once and hands the same bytes to every sink.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    event_type: EventType,
    #[serde(default)]
    data: Map<String, Value>,
    timestamp: i64,
}

impl EventEnvelope {
    /// Stamp a new envelope with the current wall-clock time in milliseconds.
    pub fn new(event_type: EventType, data: Map<String, Value>) -> Self {
        Self::at(event_type, data, chrono::Utc::now().timestamp_millis())
    }

    pub fn at(event_type: EventType, data: Map<String, Value>, timestamp: i64) -> Self {
        Self {
            event_type,
            data,
            timestamp,
        }
    }

    pub fn heartbeat() -> Self {
        Self::new(EventType::Heartbeat, Map::new())
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Serialise into a single SSE frame: `data: {json}\n\n`
    pub fn to_frame(&self) -> SseResult<String> {
        let json = serde_json::to_string(self)?;
        Ok(format!("data: {}\n\n", json))
    }

    /// Parse the payload of one `data:` field.
    pub fn parse(payload: &str) -> SseResult<Self> {
        serde_json::from_str(payload).map_err(|e| SseError::MalformedEnvelope(e.to_string()))
    }
}

#[derive(Error, Debug)]
pub enum SseError {
    #[error("Failed to serialise event: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Malformed event envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Unknown event type: {0}")]
    UnknownEventType(String),
}

pub type SseResult<T> = Result<T, SseError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_type_wire_names_match_display() {
        for t in EventType::ALL {
            let json = serde_json::to_value(t).unwrap();
            assert_eq!(json, Value::String(t.to_string()));
            assert_eq!(t.as_str().parse::<EventType>().unwrap(), t);
        }
    }

    #[test]
    fn event_type_parse_is_case_sensitive() {
        assert!("order_created".parse::<EventType>().is_err());
        assert!("ORDER_CREATED".parse::<EventType>().is_ok());
    }

    #[test]
    fn new_envelope_gets_non_zero_timestamp() {
        let env = EventEnvelope::new(EventType::OrderCreated, Map::new());
        assert!(env.timestamp() > 0);
    }

    #[test]
    fn frame_has_exact_wire_shape() {
        let mut data = Map::new();
        data.insert("orderId".into(), json!("X"));
        let env = EventEnvelope::at(EventType::OrderStatusChanged, data, 1234);

        assert_eq!(
            env.to_frame().unwrap(),
            "data: {\"type\":\"ORDER_STATUS_CHANGED\",\"data\":{\"orderId\":\"X\"},\"timestamp\":1234}\n\n"
        );
    }

    #[test]
    fn parse_rejects_unknown_type() {
        let err = EventEnvelope::parse(r#"{"type":"NOPE","data":{},"timestamp":1}"#).unwrap_err();
        assert!(matches!(err, SseError::MalformedEnvelope(_)));
    }

    #[test]
    fn parse_tolerates_missing_data() {
        let env = EventEnvelope::parse(r#"{"type":"HEARTBEAT","timestamp":5}"#).unwrap();
        assert_eq!(env.event_type(), EventType::Heartbeat);
        assert!(env.data().is_empty());
    }
}
