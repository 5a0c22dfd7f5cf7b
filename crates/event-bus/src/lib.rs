//! In-process event bus, event payloads and topic routing.
//!
//! - [`LocalEventBus`]: synchronous publish/subscribe with a bounded history
//!   ring buffer and a wildcard channel
//! - [`EventPayload`] / [`BusEvent`]: the payload shape shared by local
//!   dispatch and the broker wire format
//! - [`TopicRouter`]: static event-type to broker-topic table

pub mod bus;
pub mod error;
pub mod event;
pub mod topics;

pub use bus::{
    BusConfig, DEFAULT_HISTORY_LIMIT, DispatchOutcome, HandlerError, HandlerResult,
    LocalEventBus, Subscription, WILDCARD, panic_message,
};
pub use common::CorrelationId;
pub use error::{EventBusError, Result};
pub use event::{BusEvent, EventPayload, TypedEvent};
pub use topics::{DEAD_LETTER_TOPIC, FALLBACK_TOPIC, TopicRouter, event_types};
