pub mod local;

use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Immutable, semi-structured event record as delivered by the homeserver.
///
/// The record is shared behind an `Arc`, so cloning an event is cheap and
/// the classification, store and transport layers can all hold on to it.
#[derive(Clone, PartialEq)]
pub struct Event {
    raw: Arc<Map<String, Value>>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    #[error("event record must be a JSON object, got {0}")]
    NotAnObject(&'static str),
}

impl Event {
    /// Wraps a JSON value as an event.
    ///
    /// State events delivered through sync carry their previous content under
    /// `unsigned.prev_content`; it is hoisted to the top level so rule shapes
    /// only ever have to look in one place.
    pub fn from_value(value: Value) -> Result<Self, EventError> {
        match value {
            Value::Object(mut map) => {
                if !map.contains_key("prev_content") {
                    let hoisted = map
                        .get("unsigned")
                        .and_then(|unsigned| unsigned.get("prev_content"))
                        .cloned();
                    if let Some(prev) = hoisted {
                        map.insert("prev_content".to_string(), prev);
                    }
                }
                Ok(Self { raw: Arc::new(map) })
            }
            other => Err(EventError::NotAnObject(value_kind_name(&other))),
        }
    }

    pub fn raw(&self) -> &Map<String, Value> {
        &self.raw
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.raw.get(key)
    }

    /// Looks up a dotted path such as `content.body`.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        let mut current = self.raw.get(first)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    pub fn str_at(&self, path: &str) -> Option<&str> {
        self.lookup(path).and_then(Value::as_str)
    }

    pub fn event_id(&self) -> Option<&str> {
        self.str_at("event_id")
    }

    pub fn kind(&self) -> Option<&str> {
        self.str_at("type")
    }

    pub fn sender(&self) -> Option<&str> {
        self.str_at("sender")
    }

    pub fn state_key(&self) -> Option<&str> {
        self.str_at("state_key")
    }

    pub fn origin_ts(&self) -> Option<i64> {
        self.get("origin_server_ts").and_then(Value::as_i64)
    }

    /// Timestamp used for ordering; records without one sort as the oldest.
    pub fn sort_key(&self) -> i64 {
        self.origin_ts().unwrap_or(0)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&*self.raw).unwrap_or_else(|_| "{}".to_string())
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("event_id", &self.event_id())
            .field("type", &self.kind())
            .field("origin_server_ts", &self.origin_ts())
            .finish()
    }
}

pub(crate) fn value_kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
