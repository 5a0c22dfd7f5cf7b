//! Broker wire format and the dead-letter envelope.

use chrono::{DateTime, Utc};
use common::CorrelationId;
use event_bus::{BusEvent, EventPayload};
use serde::{Deserialize, Serialize};

use crate::broker::{BrokerMessage, ReceivedMessage};
use crate::error::{BridgeError, Result};

/// Header names carried by every bridged message, readable without decoding the body.
pub mod headers {
    pub const EVENT_TYPE: &str = "event-type";
    pub const SOURCE: &str = "source";
    pub const CORRELATION_ID: &str = "correlation-id";
}

/// Publisher-side metadata attached to each message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMetadata {
    pub source: String,
    pub published_at: DateTime<Utc>,
    pub correlation_id: CorrelationId,
}

/// JSON body of every bridged message:
/// `{eventType, payload: {correlationId, timestamp, source, data}, metadata: {source, publishedAt, correlationId}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEnvelope {
    pub event_type: String,
    pub payload: EventPayload,
    pub metadata: WireMetadata,
}

impl WireEnvelope {
    /// Wraps a local event for publication by `service`.
    pub fn from_event(event: &BusEvent, service: &str) -> Self {
        Self {
            event_type: event.event_type.clone(),
            payload: event.payload.clone(),
            metadata: WireMetadata {
                source: service.to_string(),
                published_at: Utc::now(),
                correlation_id: event.payload.correlation_id.clone(),
            },
        }
    }

    /// Encodes the envelope keyed by correlation id, with filtering headers.
    pub fn to_message(&self) -> Result<BrokerMessage> {
        let correlation_id = self.payload.correlation_id.as_str();
        Ok(BrokerMessage::new(serde_json::to_vec(self)?)
            .with_key(correlation_id)
            .with_header(headers::EVENT_TYPE, self.event_type.as_str())
            .with_header(headers::SOURCE, self.payload.source.as_str())
            .with_header(headers::CORRELATION_ID, correlation_id))
    }

    /// Parses a message body. Anything that is not a complete envelope is an
    /// [`BridgeError::InvalidMessage`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| BridgeError::InvalidMessage(format!("failed to decode envelope: {e}")))
    }

    /// The event as the local bus sees it: the original payload, without the envelope.
    pub fn into_bus_event(self) -> BusEvent {
        BusEvent::new(self.event_type, self.payload)
    }
}

/// Record written to the dead-letter topic for a message that failed processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterEnvelope {
    pub original_topic: String,
    /// The raw message body, lossily decoded as UTF-8.
    pub original_message: String,
    pub error: String,
    pub failed_at: DateTime<Utc>,
    /// The service whose consumer failed.
    pub service: String,
}

impl DeadLetterEnvelope {
    pub fn new(message: &ReceivedMessage, error: impl Into<String>, service: &str) -> Self {
        Self {
            original_topic: message.topic.clone(),
            original_message: message.payload_text(),
            error: error.into(),
            failed_at: Utc::now(),
            service: service.to_string(),
        }
    }

    /// Encodes the record, keeping the original key and headers so it can be replayed.
    pub fn to_message(&self, original: &ReceivedMessage) -> Result<BrokerMessage> {
        let mut message = BrokerMessage::new(serde_json::to_vec(self)?);
        message.key = original.key.clone();
        message.headers = original.headers.clone();
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event() -> BusEvent {
        BusEvent::new(
            "sale.created",
            EventPayload::new(
                json!({ "saleId": "S-1" }),
                "sales",
                Some(CorrelationId::from("corr-1")),
            ),
        )
    }

    #[test]
    fn test_wire_shape() {
        let envelope = WireEnvelope::from_event(&event(), "sales");
        let json = serde_json::to_value(&envelope).unwrap();

        assert_eq!(json["eventType"], "sale.created");
        assert_eq!(json["payload"]["correlationId"], "corr-1");
        assert_eq!(json["payload"]["source"], "sales");
        assert_eq!(json["payload"]["data"]["saleId"], "S-1");
        assert!(json["payload"]["timestamp"].is_string());
        assert_eq!(json["metadata"]["source"], "sales");
        assert_eq!(json["metadata"]["correlationId"], "corr-1");
        assert!(json["metadata"]["publishedAt"].is_string());
    }

    #[test]
    fn test_message_key_and_headers() {
        let message = WireEnvelope::from_event(&event(), "sales")
            .to_message()
            .unwrap();

        assert_eq!(message.key.as_deref(), Some("corr-1"));
        assert_eq!(message.header(headers::EVENT_TYPE), Some("sale.created"));
        assert_eq!(message.header(headers::SOURCE), Some("sales"));
        assert_eq!(message.header(headers::CORRELATION_ID), Some("corr-1"));
    }

    #[test]
    fn test_decode_restores_bus_event() {
        let original = event();
        let message = WireEnvelope::from_event(&original, "sales")
            .to_message()
            .unwrap();

        let restored = WireEnvelope::decode(&message.payload)
            .unwrap()
            .into_bus_event();
        assert_eq!(restored, original);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            WireEnvelope::decode(b"not json"),
            Err(BridgeError::InvalidMessage(_))
        ));
        assert!(matches!(
            WireEnvelope::decode(br#"{"eventType":"x"}"#),
            Err(BridgeError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_dead_letter_shape() {
        let received = ReceivedMessage {
            topic: "order-events".to_string(),
            partition: 0,
            offset: 7,
            key: Some("corr-1".to_string()),
            payload: b"{broken".to_vec(),
            headers: vec![(headers::EVENT_TYPE.to_string(), "sale.created".to_string())],
        };

        let envelope = DeadLetterEnvelope::new(&received, "expected value", "inventory");
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["originalTopic"], "order-events");
        assert_eq!(json["originalMessage"], "{broken");
        assert_eq!(json["error"], "expected value");
        assert_eq!(json["service"], "inventory");
        assert!(json["failedAt"].is_string());

        let message = envelope.to_message(&received).unwrap();
        assert_eq!(message.key.as_deref(), Some("corr-1"));
        assert_eq!(message.header(headers::EVENT_TYPE), Some("sale.created"));
    }
}
