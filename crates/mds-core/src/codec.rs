//! Translation between broker records and message envelopes.

use chrono::{DateTime, Utc};

use crate::error::ConnectorError;
use crate::message::{InboundMessage, MessageHeader, OutboundMessage, OutboundValue};

/// Name of the header carrying the event type on the wire.
pub const EVENT_TYPE_HEADER: &str = "event-type";

/// Partition or offset not assigned yet. Records produced by [`encode`] carry
/// it until the broker acknowledges them.
pub const UNASSIGNED: i32 = -1;

/// A raw header as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerHeader {
    /// Header name.
    pub key: String,
    /// Raw header bytes.
    pub value: Vec<u8>,
}

impl BrokerHeader {
    /// Creates a header from a string value.
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A framed record as read from or written to the event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerRecord {
    pub topic: String,
    /// Assigned by the broker; [`UNASSIGNED`] on records being written.
    pub partition: i32,
    /// Assigned by the broker; [`UNASSIGNED`] on records being written.
    pub offset: i64,
    /// Offset the next produced record of the partition will get, `-1` if
    /// unknown.
    pub high_water_mark: i64,
    /// Broker timestamp, if the broker reported one.
    pub timestamp: Option<DateTime<Utc>>,
    /// Partitioning key. Empty for unkeyed records.
    pub key: Vec<u8>,
    /// JSON payload.
    pub value: Vec<u8>,
    /// Headers in wire order, `event-type` included.
    pub headers: Vec<BrokerHeader>,
}

impl BrokerRecord {
    /// Creates a record for writing. Partition and offset stay unassigned.
    pub fn outgoing(topic: impl Into<String>, key: impl Into<Vec<u8>>, value: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            partition: UNASSIGNED,
            offset: i64::from(UNASSIGNED),
            high_water_mark: i64::from(UNASSIGNED),
            timestamp: None,
            key: key.into(),
            value,
            headers: Vec::new(),
        }
    }

    /// Returns the value of the first header named `name`.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|header| header.key == name)
            .map(|header| header.value.as_slice())
    }
}

/// Converts a received broker record into an inbound envelope.
///
/// The first `event-type` header supplies the event type and stays in the
/// header list. A missing broker timestamp maps to the Unix epoch.
#[must_use]
pub fn decode(record: &BrokerRecord) -> InboundMessage {
    let headers: Vec<MessageHeader> = record
        .headers
        .iter()
        .map(|header| MessageHeader {
            key: header.key.clone(),
            value: String::from_utf8_lossy(&header.value).into_owned(),
        })
        .collect();
    let event_type = headers
        .iter()
        .find(|header| header.key == EVENT_TYPE_HEADER)
        .map(|header| header.value.clone())
        .unwrap_or_default();

    InboundMessage {
        id: 0,
        topic: record.topic.clone(),
        partition: record.partition,
        offset: record.offset,
        high_water_mark: record.high_water_mark,
        ts: record.timestamp.unwrap_or(DateTime::UNIX_EPOCH),
        key: String::from_utf8_lossy(&record.key).into_owned(),
        event_type,
        raw_value: record.value.clone(),
        headers,
    }
}

/// Converts an outbound envelope into a broker record ready for writing.
///
/// # Errors
///
/// Returns `ConnectorError::Serialization` if a typed value cannot be encoded.
pub fn encode(message: &OutboundMessage) -> Result<BrokerRecord, ConnectorError> {
    let value = message.value.to_bytes()?;
    let mut record = BrokerRecord::outgoing(&*message.topic, message.key.as_bytes(), value);
    record.headers = message
        .headers
        .iter()
        .map(|header| BrokerHeader::new(&*header.key, header.value.as_bytes()))
        .chain(std::iter::once(BrokerHeader::new(
            EVENT_TYPE_HEADER,
            message.event_type.as_bytes(),
        )))
        .collect();
    Ok(record)
}

impl From<&InboundMessage> for OutboundMessage {
    /// Re-publishes a received message unchanged. The first `event-type`
    /// header is dropped since [`encode`] synthesizes it again.
    fn from(message: &InboundMessage) -> Self {
        let mut headers = message.headers.clone();
        if let Some(pos) = headers.iter().position(|h| h.key == EVENT_TYPE_HEADER) {
            headers.remove(pos);
        }
        Self {
            id: 0,
            topic: message.topic.clone(),
            key: message.key.clone(),
            event_type: message.event_type.clone(),
            value: OutboundValue::Raw(message.raw_value.clone()),
            headers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn received_record() -> BrokerRecord {
        BrokerRecord {
            topic: "intel".into(),
            partition: 3,
            offset: 42,
            high_water_mark: 50,
            timestamp: Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()),
            key: b"0d7f0c5e-1111-4b6e-9d1e-2b7d0e3a9f10".to_vec(),
            value: br#"{"id":"i-1"}"#.to_vec(),
            headers: vec![
                BrokerHeader::new("trace", "abc"),
                BrokerHeader::new(EVENT_TYPE_HEADER, "intel-created"),
            ],
        }
    }

    #[test]
    fn test_decode_copies_position_and_keeps_event_type_header() {
        // Arrange
        let record = received_record();

        // Act
        let message = decode(&record);

        // Assert
        assert_eq!(message.topic, "intel");
        assert_eq!(message.partition, 3);
        assert_eq!(message.offset, 42);
        assert_eq!(message.high_water_mark, 50);
        assert_eq!(message.key, "0d7f0c5e-1111-4b6e-9d1e-2b7d0e3a9f10");
        assert_eq!(message.event_type, "intel-created");
        assert_eq!(message.raw_value, br#"{"id":"i-1"}"#.to_vec());
        assert_eq!(message.headers.len(), 2);
        assert_eq!(message.headers[1], MessageHeader::new(EVENT_TYPE_HEADER, "intel-created"));
    }

    #[test]
    fn test_decode_takes_first_event_type_header() {
        let mut record = received_record();
        record
            .headers
            .push(BrokerHeader::new(EVENT_TYPE_HEADER, "intel-deleted"));

        let message = decode(&record);

        assert_eq!(message.event_type, "intel-created");
        assert_eq!(message.headers.len(), 3);
    }

    #[test]
    fn test_decode_without_event_type_or_timestamp() {
        let mut record = received_record();
        record.headers.clear();
        record.timestamp = None;

        let message = decode(&record);

        assert_eq!(message.event_type, "");
        assert_eq!(message.ts, DateTime::UNIX_EPOCH);
    }

    #[test]
    fn test_encode_appends_event_type_header() {
        // Arrange
        let message = OutboundMessage::new(
            "intel-deliveries",
            "d-1",
            "delivery-created",
            &json!({"id": "d-1"}),
        )
        .unwrap()
        .with_header("trace", "abc");

        // Act
        let record = encode(&message).unwrap();

        // Assert
        assert_eq!(record.topic, "intel-deliveries");
        assert_eq!(record.key, b"d-1".to_vec());
        assert_eq!(record.value, br#"{"id":"d-1"}"#.to_vec());
        assert_eq!(record.partition, UNASSIGNED);
        assert_eq!(
            record.headers,
            vec![
                BrokerHeader::new("trace", "abc"),
                BrokerHeader::new(EVENT_TYPE_HEADER, "delivery-created"),
            ]
        );
        assert_eq!(record.header(EVENT_TYPE_HEADER), Some(&b"delivery-created"[..]));
    }

    #[test]
    fn test_encode_with_empty_key() {
        let message = OutboundMessage::raw("groups", "", "group-created", b"{}".to_vec());

        let record = encode(&message).unwrap();

        assert!(record.key.is_empty());
        assert_eq!(record.value, b"{}".to_vec());
    }

    #[test]
    fn test_republishing_received_message_preserves_wire_content() {
        // Arrange
        let original = received_record();

        // Act
        let inbound = decode(&original);
        let record = encode(&OutboundMessage::from(&inbound)).unwrap();

        // Assert
        assert_eq!(record.topic, original.topic);
        assert_eq!(record.key, original.key);
        assert_eq!(record.value, original.value);
        assert_eq!(record.headers, original.headers);
    }
}
