//! Join, analytics, ping and pull messages.

use crate::date::parse_http_date;
use crate::error::{ProtocolError, ProtocolResult};
use crate::event::EventRecord;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Parameters of a room join request.
///
/// The server interprets the members; the client only merges them while
/// offline and forwards them verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JoinParams(Map<String, Value>);

impl JoinParams {
    /// Creates empty join parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates join parameters requesting the given rooms.
    pub fn with_rooms<I, S>(rooms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let rooms = rooms
            .into_iter()
            .map(|room| Value::String(room.into()))
            .collect();
        Self::new().insert("rooms", Value::Array(rooms))
    }

    /// Adds a member, replacing any previous value.
    pub fn insert(mut self, key: impl Into<String>, value: Value) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    /// Merges `other` on top of `self`; members of `other` win.
    pub fn merge(&mut self, other: JoinParams) {
        self.0.extend(other.0);
    }

    /// Returns the requested rooms, if any.
    pub fn rooms(&self) -> Vec<String> {
        self.0
            .get("rooms")
            .map(string_list)
            .unwrap_or_default()
    }

    /// Returns true if no member is set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the raw members.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Builds the push `join` payload: `{token, ...params}`.
    pub fn to_join_payload(&self, token: Option<&str>) -> Value {
        let mut payload = Map::new();
        payload.insert(
            "token".into(),
            token.map_or(Value::Null, |t| Value::String(t.into())),
        );
        payload.extend(self.0.clone());
        Value::Object(payload)
    }
}

/// Strips the `{success: ...}` and `{data: {...}}` wrappers the API may add.
///
/// A `data` member is only unwrapped when it is an object, so pull bodies of
/// the form `{data: [...], since}` are left intact.
pub fn unwrap_envelope(value: Value) -> Value {
    let value = match value {
        Value::Object(mut map) if map.get("success").is_some_and(Value::is_object) => {
            map.remove("success").unwrap_or(Value::Null)
        }
        other => other,
    };
    match value {
        Value::Object(mut map) if map.get("data").is_some_and(Value::is_object) => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Rooms returned by the credentials endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomsResponse {
    /// Rooms the credentials grant access to.
    pub rooms: Vec<String>,
}

impl RoomsResponse {
    /// Decodes an HTTP response body.
    pub fn decode(body: &str) -> ProtocolResult<Self> {
        let value = unwrap_envelope(serde_json::from_str(body)?);
        let rooms = value
            .get("rooms")
            .ok_or_else(|| ProtocolError::Malformed("rooms response without `rooms`".into()))?;
        Ok(Self {
            rooms: string_list(rooms),
        })
    }
}

/// Events returned by the pull endpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PullResponse {
    /// Events in server order.
    pub events: Vec<EventRecord>,
    /// New watermark proposed by the server.
    pub since: Option<i64>,
    /// Entries that could not be decoded as events.
    pub skipped: usize,
}

impl PullResponse {
    /// Decodes an HTTP response body.
    pub fn decode(body: &str) -> ProtocolResult<Self> {
        let value = unwrap_envelope(serde_json::from_str(body)?);
        let mut response = PullResponse {
            since: value.get("since").and_then(millis),
            ..Default::default()
        };
        if let Some(entries) = value.get("data").and_then(Value::as_array) {
            for entry in entries {
                match EventRecord::from_value(entry.clone()) {
                    Ok(event) => response.events.push(event),
                    Err(_) => response.skipped += 1,
                }
            }
        }
        Ok(response)
    }
}

/// Acknowledgement of a push `join`: `[error, rooms, headers]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinAck {
    /// Server error, if the join was refused.
    pub error: Option<Value>,
    /// Rooms joined.
    pub rooms: Vec<String>,
    /// Server clock from the `date` header, in epoch milliseconds.
    pub server_time: Option<i64>,
}

impl JoinAck {
    /// Decodes acknowledgement arguments.
    pub fn from_args(args: &[Value]) -> ProtocolResult<Self> {
        let error = args.first().and_then(ack_error);
        let rooms = args.get(1).map(string_list).unwrap_or_default();
        let server_time = args
            .get(2)
            .and_then(Value::as_object)
            .and_then(|headers| {
                headers
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case("date"))
                    .and_then(|(_, value)| value.as_str())
            })
            .and_then(parse_http_date);
        Ok(Self {
            error,
            rooms,
            server_time,
        })
    }
}

/// Acknowledgement of `analytics:subscribe`: `[error, namespaces]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalyticsAck {
    /// Server error, if the subscription was refused.
    pub error: Option<Value>,
    /// Namespaces confirmed by the server.
    pub namespaces: Vec<String>,
}

impl AnalyticsAck {
    /// Decodes acknowledgement arguments.
    pub fn from_args(args: &[Value]) -> ProtocolResult<Self> {
        Ok(Self {
            error: args.first().and_then(ack_error),
            namespaces: args.get(1).map(string_list).unwrap_or_default(),
        })
    }
}

/// Acknowledgement of `_ping`: `[name, data]`.
#[derive(Debug, Clone, PartialEq)]
pub struct PongAck {
    /// Reply name; `_pong` on success.
    pub name: String,
    /// Reply payload.
    pub data: Value,
}

impl PongAck {
    /// Expected reply name.
    pub const PONG: &'static str = "_pong";

    /// Decodes acknowledgement arguments.
    pub fn from_args(args: &[Value]) -> ProtocolResult<Self> {
        let name = args
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::Malformed("ping ack without reply name".into()))?;
        Ok(Self {
            name: name.to_string(),
            data: args.get(1).cloned().unwrap_or(Value::Null),
        })
    }

    /// Returns true if the server answered with a pong.
    pub fn is_pong(&self) -> bool {
        self.name == Self::PONG
    }
}

fn ack_error(value: &Value) -> Option<Value> {
    match value {
        Value::Null | Value::Bool(false) => None,
        other => Some(other.clone()),
    }
}

fn millis(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Value::String(s) => vec![s.clone()],
        _ => Vec::new(),
    }
}
