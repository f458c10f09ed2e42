//! The logical record schema of the measurement log.
//!
//! A record is one JSON object per line; keys and their spellings are the
//! external interface consumed by the log analyzer. Nested info maps are
//! flat string→string objects.

use chrono::{SecondsFormat, TimeZone, Utc};
use serde_json::{Map, Value};

use convmon_netlink::Attrs;

pub const MONITORING_STARTED: &str = "monitoring_started";
pub const SESSION_STARTED: &str = "session_started";
pub const ROUTE_EVENT: &str = "route_event";
pub const NETEM_DETECTED: &str = "netem_detected";
pub const SESSION_COMPLETED: &str = "session_completed";
pub const MONITORING_COMPLETED: &str = "monitoring_completed";

/// One entry of the append-only measurement log.
#[derive(Debug, Clone)]
pub struct Record {
    fields: Map<String, Value>,
}

impl Record {
    pub fn new(event_type: &str) -> Self {
        let mut fields = Map::new();
        fields.insert("event_type".to_owned(), Value::from(event_type));
        Self { fields }
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.fields.insert(key.to_owned(), value.into());
    }

    /// Attach a nested info map as a flat string→string object.
    pub fn set_attrs(&mut self, key: &str, attrs: &Attrs) {
        let object: Map<String, Value> = attrs
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
            .collect();
        self.fields.insert(key.to_owned(), Value::Object(object));
    }

    pub fn event_type(&self) -> &str {
        self.fields
            .get("event_type")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Serialize to a single JSON line (without the trailing newline).
    pub fn to_json_line(&self) -> String {
        // A string-keyed map of JSON values cannot fail to serialize.
        serde_json::to_string(&self.fields).unwrap_or_default()
    }
}

/// Format a UNIX-milliseconds timestamp as ISO-8601 UTC with millisecond
/// precision, e.g. `2026-08-02T10:15:30.123Z`.
pub fn iso8601_millis(timestamp_ms: i64) -> String {
    Utc.timestamp_millis_opt(timestamp_ms)
        .single()
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| timestamp_ms.to_string())
}
