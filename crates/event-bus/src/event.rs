use chrono::{DateTime, Utc};
use common::CorrelationId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// The payload carried by every event, locally and across the broker.
///
/// `data` is opaque to the bus. The untyped form (`EventPayload<Value>`) is
/// what the bus stores and dispatches; handlers that know the event type
/// decode it with [`EventPayload::decode`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload<T = serde_json::Value> {
    /// Join key for all events of one logical operation. Never changed after emission.
    pub correlation_id: CorrelationId,

    /// When the event was emitted.
    pub timestamp: DateTime<Utc>,

    /// Identity of the emitting service.
    pub source: String,

    /// Event data.
    pub data: T,
}

impl<T> EventPayload<T> {
    /// Wraps `data`, generating a correlation id when none is supplied.
    pub fn new(data: T, source: impl Into<String>, correlation_id: Option<CorrelationId>) -> Self {
        Self {
            correlation_id: correlation_id.unwrap_or_default(),
            timestamp: Utc::now(),
            source: source.into(),
            data,
        }
    }

    /// Transforms the data while keeping correlation id, timestamp and source.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> EventPayload<U> {
        EventPayload {
            correlation_id: self.correlation_id,
            timestamp: self.timestamp,
            source: self.source,
            data: f(self.data),
        }
    }
}

impl<T: Serialize> EventPayload<T> {
    /// Converts typed data into the untyped JSON form.
    pub fn encode(&self) -> Result<EventPayload, serde_json::Error> {
        Ok(EventPayload {
            correlation_id: self.correlation_id.clone(),
            timestamp: self.timestamp,
            source: self.source.clone(),
            data: serde_json::to_value(&self.data)?,
        })
    }
}

impl EventPayload {
    /// Decodes the JSON data into a concrete type.
    pub fn decode<E: DeserializeOwned>(&self) -> Result<EventPayload<E>, serde_json::Error> {
        Ok(EventPayload {
            correlation_id: self.correlation_id.clone(),
            timestamp: self.timestamp,
            source: self.source.clone(),
            data: serde_json::from_value(self.data.clone())?,
        })
    }
}

/// An emitted event: its type plus payload.
///
/// This is what handlers receive and what the history buffer holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusEvent {
    /// The event type (e.g. `sale.created`).
    pub event_type: String,

    /// The event payload.
    pub payload: EventPayload,
}

impl BusEvent {
    /// Creates a new event.
    pub fn new(event_type: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }

    /// Returns the correlation id.
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.payload.correlation_id
    }

    /// Returns the emitting service.
    pub fn source(&self) -> &str {
        &self.payload.source
    }

    /// Returns the raw JSON data.
    pub fn data(&self) -> &serde_json::Value {
        &self.payload.data
    }
}

/// An event with a statically known type name.
///
/// Implemented by payload structs so that emitters and handlers work with
/// concrete data instead of raw JSON.
pub trait TypedEvent: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The event type string this payload is emitted under.
    const EVENT_TYPE: &'static str;
}
