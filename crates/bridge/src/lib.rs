//! Broker bridge between the in-process event bus and a durable message broker.
//!
//! This crate contains:
//! - [`BrokerBridge`]: outbound mirroring of local events (with optional
//!   per-topic batching) and inbound re-emission of remote events, with loop
//!   prevention on both sides and dead-lettering of failed messages
//! - Broker ports ([`MessageProducer`], [`MessageConsumer`]) and the wire
//!   format ([`WireEnvelope`], [`DeadLetterEnvelope`])
//! - Topic administration ([`TopicAdmin`])
//! - Implementations: [`InMemoryBroker`], and Kafka behind the `kafka` feature

pub mod admin;
mod batch;
pub mod bridge;
pub mod broker;
pub mod config;
pub mod envelope;
pub mod error;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;
pub mod stats;

pub use admin::{
    DEAD_LETTER_RETENTION_MS, OffsetReset, PartitionMetadata, TopicAdmin, TopicConfig,
    TopicMetadata, default_topic_configs,
};
pub use bridge::BrokerBridge;
pub use broker::{BrokerMessage, MessageConsumer, MessageProducer, ReceivedMessage};
pub use config::BridgeConfig;
pub use envelope::{DeadLetterEnvelope, WireEnvelope, WireMetadata, headers};
pub use error::{BridgeError, Result};
#[cfg(feature = "kafka")]
pub use kafka::{KafkaConsumer, KafkaProducer, KafkaTopicAdmin};
pub use memory::InMemoryBroker;
pub use stats::BridgeStats;
