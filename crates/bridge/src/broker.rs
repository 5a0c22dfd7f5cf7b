//! Broker ports: the minimal producer/consumer contract the bridge needs.
//!
//! Implementations: [`InMemoryBroker`](crate::memory::InMemoryBroker) for
//! tests and local-only mode, and the Kafka adapters behind the `kafka`
//! feature.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

/// Capacity of the channel between a consumer and the bridge's consume loop.
pub const CONSUMER_CHANNEL_CAPACITY: usize = 1024;

/// A message to be written to a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    /// Partition key. The bridge uses the correlation id.
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

impl BrokerMessage {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            key: None,
            payload,
            headers: Vec::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// A message read from a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

impl ReceivedMessage {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// The payload as text, replacing invalid UTF-8.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

/// Writes messages to topics.
#[async_trait]
pub trait MessageProducer: Send + Sync {
    /// Establishes the connection. Fails if the broker is unreachable.
    async fn connect(&self) -> Result<()>;

    /// Writes `messages` to `topic` in order.
    async fn send(&self, topic: &str, messages: Vec<BrokerMessage>) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Closes the connection. Safe to call when never connected.
    async fn disconnect(&self) -> Result<()>;
}

/// Reads messages from topics.
#[async_trait]
pub trait MessageConsumer: Send + Sync {
    /// Establishes the connection. Fails if the broker is unreachable.
    async fn connect(&self) -> Result<()>;

    /// Subscribes to `topics` and returns the stream of received messages.
    ///
    /// The channel closes when the consumer disconnects.
    async fn subscribe(&self, topics: &[String]) -> Result<mpsc::Receiver<ReceivedMessage>>;

    /// Marks `message` as processed, so it is not redelivered to this
    /// consumer group. Messages received but never committed are
    /// redelivered after a restart.
    async fn commit(&self, message: &ReceivedMessage) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Stops consumption and closes the connection. Safe to call when never connected.
    async fn disconnect(&self) -> Result<()>;
}
