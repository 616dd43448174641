//! Inbound wire events.

use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::notification::NotificationPriority;
use crate::{Error, Result};

/// Event types that carry connection control information rather than
/// something to notify about.
const CONTROL_EVENT_TYPES: &[&str] = &["heartbeat", "ping", "connected"];

/// One event received over the push connection:
/// `{ "type": ..., ...payload, "timestamp": ... }`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl WireEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: None,
            payload: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Parse a single message body.
    ///
    /// The timestamp may be an RFC 3339 string or milliseconds since the
    /// Unix epoch.
    pub fn parse(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| Error::protocol(format!("invalid JSON payload: {e}")))?;
        let Value::Object(mut payload) = value else {
            return Err(Error::protocol("event payload is not a JSON object"));
        };

        let event_type = match payload.remove("type") {
            Some(Value::String(t)) if !t.trim().is_empty() => t.trim().to_string(),
            Some(_) => return Err(Error::protocol("event 'type' must be a non-empty string")),
            None => return Err(Error::protocol("event is missing 'type'")),
        };

        let timestamp = match payload.remove("timestamp") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(
                DateTime::parse_from_rfc3339(&s)
                    .map_err(|e| Error::protocol(format!("invalid timestamp '{s}': {e}")))?
                    .with_timezone(&Utc),
            ),
            Some(Value::Number(n)) => {
                let millis = n
                    .as_i64()
                    .ok_or_else(|| Error::protocol(format!("invalid timestamp {n}")))?;
                Some(
                    Utc.timestamp_millis_opt(millis)
                        .single()
                        .ok_or_else(|| Error::protocol(format!("timestamp out of range: {n}")))?,
                )
            }
            Some(other) => {
                return Err(Error::protocol(format!("invalid timestamp {other}")));
            }
        };

        Ok(Self {
            event_type,
            timestamp,
            payload,
        })
    }

    pub fn is_control(&self) -> bool {
        CONTROL_EVENT_TYPES.contains(&self.event_type.as_str())
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.payload
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn bool_field(&self, key: &str) -> Option<bool> {
        self.payload.get(key).and_then(Value::as_bool)
    }

    pub fn u64_field(&self, key: &str) -> Option<u64> {
        self.payload.get(key).and_then(Value::as_u64)
    }

    /// Priority carried by the payload, if any and recognised.
    pub fn priority(&self) -> Option<NotificationPriority> {
        self.str_field("priority")
            .and_then(|p| NotificationPriority::from_str(p).ok())
    }

    /// Whether the sender flagged the event as critical.
    pub fn flagged_critical(&self) -> bool {
        self.bool_field("critical").unwrap_or(false)
    }
}
