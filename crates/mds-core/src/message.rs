//! Domain envelopes for inbound and outbound event-log messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConnectorError;

/// A single string header of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Header name.
    pub key: String,
    /// Header value.
    pub value: String,
}

impl MessageHeader {
    /// Creates a new header.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A message received from the event log, as stored in the inbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Inbox row identifier. Zero until the message has been persisted.
    pub id: i64,
    /// Topic the message was consumed from.
    pub topic: String,
    /// Broker-assigned partition.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
    /// High-water mark of the partition at fetch time, `-1` if unknown.
    pub high_water_mark: i64,
    /// Broker timestamp.
    pub ts: DateTime<Utc>,
    /// Message key. May be empty.
    pub key: String,
    /// Value of the `event-type` header, empty if absent.
    pub event_type: String,
    /// The JSON value exactly as received.
    pub raw_value: Vec<u8>,
    /// All headers as received, including `event-type`.
    pub headers: Vec<MessageHeader>,
}

impl InboundMessage {
    /// Deserializes the raw value into `T`.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::Serialization` if the value is not valid JSON
    /// for `T`.
    pub fn value<T: serde::de::DeserializeOwned>(&self) -> Result<T, ConnectorError> {
        serde_json::from_slice(&self.raw_value).map_err(|source| ConnectorError::Serialization {
            context: format!(
                "decode value of {} event on {} at offset {}: {}",
                self.event_type,
                self.topic,
                self.offset,
                String::from_utf8_lossy(&self.raw_value)
            ),
            source,
        })
    }
}

/// Value of an outbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundValue {
    /// A typed value that is encoded as compact JSON.
    Json(serde_json::Value),
    /// Already-encoded JSON bytes, written as-is.
    Raw(Vec<u8>),
}

impl Default for OutboundValue {
    fn default() -> Self {
        Self::Json(serde_json::Value::Null)
    }
}

impl OutboundValue {
    /// Returns the bytes written to the event log for this value.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::Serialization` if JSON encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ConnectorError> {
        match self {
            Self::Json(value) => {
                serde_json::to_vec(value).map_err(|source| ConnectorError::Serialization {
                    context: format!("encode outbound value {value}"),
                    source,
                })
            }
            Self::Raw(bytes) => Ok(bytes.clone()),
        }
    }
}

/// A message to be written to the event log through the outbox.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    /// Outbox row identifier. Zero until the message has been persisted.
    pub id: i64,
    /// Target topic.
    pub topic: String,
    /// Message key, used by the broker for partition affinity. May be empty.
    pub key: String,
    /// Event type, written to the `event-type` header.
    pub event_type: String,
    /// The message value.
    pub value: OutboundValue,
    /// Additional headers. The `event-type` header is added on send.
    pub headers: Vec<MessageHeader>,
}

impl OutboundMessage {
    /// Creates an outbound message with a typed value.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::Serialization` if `value` cannot be
    /// represented as JSON.
    pub fn new<T: Serialize + ?Sized>(
        topic: impl Into<String>,
        key: impl Into<String>,
        event_type: impl Into<String>,
        value: &T,
    ) -> Result<Self, ConnectorError> {
        let event_type = event_type.into();
        let value = serde_json::to_value(value).map_err(|source| ConnectorError::Serialization {
            context: format!("encode value of outbound {event_type} event"),
            source,
        })?;
        Ok(Self {
            id: 0,
            topic: topic.into(),
            key: key.into(),
            event_type,
            value: OutboundValue::Json(value),
            headers: Vec::new(),
        })
    }

    /// Creates an outbound message from already-encoded JSON bytes.
    pub fn raw(
        topic: impl Into<String>,
        key: impl Into<String>,
        event_type: impl Into<String>,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            id: 0,
            topic: topic.into(),
            key: key.into(),
            event_type: event_type.into(),
            value: OutboundValue::Raw(value.into()),
            headers: Vec::new(),
        }
    }

    /// Appends a header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(MessageHeader::new(key, value));
        self
    }
}

/// Splits headers into parallel key and value lists, the form they are
/// stored in.
#[must_use]
pub fn split_headers(headers: &[MessageHeader]) -> (Vec<String>, Vec<String>) {
    headers
        .iter()
        .map(|header| (header.key.clone(), header.value.clone()))
        .unzip()
}

/// Joins parallel key and value lists back into headers.
///
/// # Errors
///
/// Returns `ConnectorError::Internal` if the lists differ in length.
pub fn join_headers(
    keys: Vec<String>,
    values: Vec<String>,
) -> Result<Vec<MessageHeader>, ConnectorError> {
    if keys.len() != values.len() {
        return Err(ConnectorError::internal(format!(
            "list length mismatch for header keys and values: {keys:?} vs {values:?}"
        )));
    }
    Ok(keys
        .into_iter()
        .zip(values)
        .map(|(key, value)| MessageHeader { key, value })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_outbound_message_encodes_typed_value() {
        #[derive(Serialize)]
        struct UserCreated<'a> {
            id: &'a str,
        }

        let message =
            OutboundMessage::new("core.users.0", "u-1", "user-created", &UserCreated { id: "u-1" })
                .unwrap();

        assert_eq!(message.id, 0);
        assert_eq!(message.value, OutboundValue::Json(json!({"id": "u-1"})));
        assert_eq!(message.value.to_bytes().unwrap(), br#"{"id":"u-1"}"#.to_vec());
    }

    #[test]
    fn test_new_outbound_message_rejects_non_string_map_keys() {
        let mut value = std::collections::BTreeMap::new();
        value.insert(vec![1u8], "x");

        let err = OutboundMessage::new("intel", "", "intel-created", &value).unwrap_err();

        assert!(matches!(err, ConnectorError::Serialization { .. }));
    }

    #[test]
    fn test_raw_value_is_written_verbatim() {
        let message = OutboundMessage::raw(
            "intel",
            "k",
            "intel-created",
            b"{ \"a\" : 1 }".to_vec(),
        );

        assert_eq!(message.value.to_bytes().unwrap(), b"{ \"a\" : 1 }".to_vec());
    }

    #[test]
    fn test_join_headers_rejects_length_mismatch() {
        let err = join_headers(vec!["a".into(), "b".into()], vec!["1".into()]).unwrap_err();

        assert!(err.is_internal());
    }

    #[test]
    fn test_split_then_join_headers_keeps_order() {
        let headers = vec![MessageHeader::new("b", "2"), MessageHeader::new("a", "1")];

        let (keys, values) = split_headers(&headers);
        let joined = join_headers(keys, values).unwrap();

        assert_eq!(joined, headers);
    }

    #[test]
    fn test_inbound_value_reports_payload_on_failure() {
        let message = InboundMessage {
            id: 1,
            topic: "intel".into(),
            partition: 0,
            offset: 7,
            high_water_mark: 8,
            ts: DateTime::UNIX_EPOCH,
            key: String::new(),
            event_type: "intel-created".into(),
            raw_value: b"not json".to_vec(),
            headers: Vec::new(),
        };

        let err = message.value::<serde_json::Value>().unwrap_err();

        assert!(err.to_string().contains("not json"));
    }
}
