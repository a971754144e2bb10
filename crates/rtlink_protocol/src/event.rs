//! Application events and their entity identity.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Delivery path an event arrived through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Via {
    /// Broadcast over the push transport.
    Socket,
    /// Returned by the HTTP pull endpoint.
    Polling,
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Via::Socket => f.write_str("socket"),
            Via::Polling => f.write_str("polling"),
        }
    }
}

/// Identity of the domain object an event touches: `"{class_name}:{id}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey(String);

impl EntityKey {
    /// Builds a key from a class name and an object id.
    pub fn new(class_name: &str, id: &str) -> Self {
        Self(format!("{class_name}:{id}"))
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single application event.
///
/// Only `hash`, `time` and the `class_name`/`id`/`hash` members of `data`
/// carry meaning for delivery; every other field is preserved untouched in
/// `extra` so the application sees the record exactly as the server sent it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Unique event identifier.
    pub hash: String,
    /// Server timestamp in epoch milliseconds.
    #[serde(
        default,
        deserialize_with = "lenient_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub time: Option<i64>,
    /// Event payload, usually the serialized entity.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    /// Delivery path, stamped by the client on admission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub via: Option<Via>,
    /// Remaining fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EventRecord {
    /// Creates a bare event with only a hash.
    pub fn new(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            time: None,
            data: Value::Null,
            via: None,
            extra: Map::new(),
        }
    }

    /// Sets the event time.
    pub fn with_time(mut self, time: i64) -> Self {
        self.time = Some(time);
        self
    }

    /// Sets `data.class_name` and `data.id`.
    pub fn with_entity(mut self, class_name: &str, id: &str) -> Self {
        let mut data = match self.data {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        data.insert("class_name".into(), Value::String(class_name.into()));
        data.insert("id".into(), Value::String(id.into()));
        self.data = Value::Object(data);
        self
    }

    /// Stamps the delivery path.
    pub fn with_via(mut self, via: Via) -> Self {
        self.via = Some(via);
        self
    }

    /// Decodes a broadcast payload (a JSON text).
    pub fn from_json(text: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Decodes an event from an already parsed JSON value.
    pub fn from_value(value: Value) -> ProtocolResult<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// Returns the entity this event refers to.
    ///
    /// Requires both `data.class_name` and one of `data.id` / `data.hash`.
    /// Events without a complete key are never version checked.
    pub fn entity_key(&self) -> Option<EntityKey> {
        let data = self.data.as_object()?;
        let class_name = data
            .get("class_name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())?;
        let id = data
            .get("id")
            .and_then(identifier)
            .or_else(|| data.get("hash").and_then(identifier))?;
        Some(EntityKey::new(class_name, &id))
    }

    /// Returns the event name when the server sent one.
    pub fn event_name(&self) -> Option<&str> {
        self.extra.get("eventName").and_then(Value::as_str)
    }

    /// Serializes the record back into JSON.
    pub fn to_value(&self) -> ProtocolResult<Value> {
        serde_json::to_value(self).map_err(|e| ProtocolError::Json(e.to_string()))
    }
}

fn identifier(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// Servers send millisecond timestamps as integers, floats or numeric strings.
fn lenient_millis<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let millis = match value {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok().map(|f| f as i64),
        _ => None,
    };
    // zero means "no timestamp"
    Ok(millis.filter(|t| *t != 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_broadcast_payload() {
        let record = EventRecord::from_json(
            r#"{"hash":"h1","time":1500,"eventName":"quote:update","data":{"class_name":"Quote","id":42}}"#,
        )
        .unwrap();

        assert_eq!(record.hash, "h1");
        assert_eq!(record.time, Some(1500));
        assert_eq!(record.event_name(), Some("quote:update"));
        assert_eq!(record.entity_key().unwrap().as_str(), "Quote:42");
        assert!(record.via.is_none());
    }

    #[test]
    fn entity_key_falls_back_to_hash() {
        let record = EventRecord::from_value(json!({
            "hash": "e1",
            "data": {"class_name": "Vote", "hash": "abc"}
        }))
        .unwrap();
        assert_eq!(record.entity_key().unwrap().as_str(), "Vote:abc");
    }

    #[test]
    fn entity_key_requires_class_name_and_id() {
        let no_class = EventRecord::from_value(json!({"hash": "e1", "data": {"id": "1"}})).unwrap();
        assert!(no_class.entity_key().is_none());

        let no_id =
            EventRecord::from_value(json!({"hash": "e2", "data": {"class_name": "Quote"}})).unwrap();
        assert!(no_id.entity_key().is_none());

        let scalar = EventRecord::from_value(json!({"hash": "e3", "data": 7})).unwrap();
        assert!(scalar.entity_key().is_none());
    }

    #[test]
    fn lenient_time_decoding() {
        let float = EventRecord::from_value(json!({"hash": "a", "time": 12.9})).unwrap();
        assert_eq!(float.time, Some(12));

        let text = EventRecord::from_value(json!({"hash": "b", "time": "300"})).unwrap();
        assert_eq!(text.time, Some(300));

        let null = EventRecord::from_value(json!({"hash": "c", "time": null})).unwrap();
        assert_eq!(null.time, None);

        let zero = EventRecord::from_value(json!({"hash": "d", "time": 0})).unwrap();
        assert_eq!(zero.time, None);
    }

    #[test]
    fn missing_hash_is_rejected() {
        let err = EventRecord::from_json(r#"{"time": 1}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Json(_)));
    }

    #[test]
    fn via_round_trips_and_extra_fields_survive() {
        let record = EventRecord::new("h9")
            .with_time(10)
            .with_entity("Quote", "7")
            .with_via(Via::Polling);
        let value = record.to_value().unwrap();
        assert_eq!(value["via"], json!("polling"));
        assert_eq!(value["data"]["class_name"], json!("Quote"));

        let mut with_extra = record.clone();
        with_extra.extra.insert("room".into(), json!("r1"));
        let back = EventRecord::from_value(with_extra.to_value().unwrap()).unwrap();
        assert_eq!(back.extra.get("room"), Some(&json!("r1")));
        assert_eq!(back.via, Some(Via::Polling));
    }
}
