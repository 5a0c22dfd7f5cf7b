//! Kafka adapters for the broker ports and topic administration.
//!
//! Producer: `acks=all` with idempotence. Consumer: a `StreamConsumer`
//! pumped into the bridge's channel by a spawned task; offsets are committed
//! through [`MessageConsumer::commit`] once the bridge has processed a
//! message. Admin: `AdminClient` plus blocking metadata calls moved onto the
//! blocking pool.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::future::try_join_all;
use rdkafka::ClientConfig;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer, StreamConsumer};
use rdkafka::error::RDKafkaErrorCode;
use rdkafka::message::{Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::{Offset, TopicPartitionList};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::admin::{OffsetReset, PartitionMetadata, TopicAdmin, TopicConfig, TopicMetadata};
use crate::broker::{
    BrokerMessage, CONSUMER_CHANNEL_CAPACITY, MessageConsumer, MessageProducer, ReceivedMessage,
};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};

const SEND_TIMEOUT: Duration = Duration::from_secs(5);
const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

fn base_config(config: &BridgeConfig) -> ClientConfig {
    let mut client = ClientConfig::new();
    client.set("bootstrap.servers", config.bootstrap_servers());
    client.set("client.id", &config.client_id);

    if let Some(ref protocol) = config.security_protocol {
        client.set("security.protocol", protocol);
    }
    if let Some(ref mechanism) = config.sasl_mechanism {
        client.set("sasl.mechanism", mechanism);
    }
    if let Some(ref username) = config.sasl_username {
        client.set("sasl.username", username);
    }
    if let Some(ref password) = config.sasl_password {
        client.set("sasl.password", password);
    }
    client
}

fn producer_config(config: &BridgeConfig) -> ClientConfig {
    let mut client = base_config(config);
    client.set("message.timeout.ms", "5000");
    client.set("acks", "all");
    client.set("enable.idempotence", "true");
    client
}

fn consumer_config(config: &BridgeConfig, group_id: &str) -> ClientConfig {
    let mut client = base_config(config);
    client.set("group.id", group_id);
    client.set("enable.auto.commit", "false");
    client.set("auto.offset.reset", "earliest");
    client
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| BridgeError::Admin(format!("blocking task failed: {e}")))?
}

/// Kafka producer side of the bridge.
pub struct KafkaProducer {
    config: BridgeConfig,
    producer: Mutex<Option<FutureProducer>>,
}

impl KafkaProducer {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            producer: Mutex::new(None),
        }
    }

    fn current(&self) -> Option<FutureProducer> {
        lock(&self.producer).clone()
    }
}

#[async_trait]
impl MessageProducer for KafkaProducer {
    async fn connect(&self) -> Result<()> {
        let producer: FutureProducer = producer_config(&self.config)
            .create()
            .map_err(|e| BridgeError::Connection(format!("Failed to create Kafka producer: {e}")))?;

        // Client creation is lazy; a metadata round trip proves the brokers are reachable.
        let reachable = producer.clone();
        blocking(move || {
            reachable
                .client()
                .fetch_metadata(None, METADATA_TIMEOUT)
                .map(|_| ())
                .map_err(|e| BridgeError::Connection(format!("Kafka unreachable: {e}")))
        })
        .await?;

        tracing::info!(brokers = %self.config.bootstrap_servers(), "Kafka producer connected");
        *lock(&self.producer) = Some(producer);
        Ok(())
    }

    async fn send(&self, topic: &str, messages: Vec<BrokerMessage>) -> Result<()> {
        let producer = self.current().ok_or(BridgeError::NotConnected)?;

        let deliveries = messages.iter().map(|message| {
            let headers = message
                .headers
                .iter()
                .fold(OwnedHeaders::new(), |headers, (key, value)| {
                    headers.insert(Header {
                        key: key.as_str(),
                        value: Some(value.as_str()),
                    })
                });
            let mut record = FutureRecord::to(topic)
                .payload(&message.payload)
                .headers(headers);
            if let Some(ref key) = message.key {
                record = record.key(key);
            }
            producer.send(record, SEND_TIMEOUT)
        });

        try_join_all(deliveries)
            .await
            .map_err(|(e, _)| BridgeError::Publish(format!("Failed to publish to {topic}: {e}")))?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        lock(&self.producer).is_some()
    }

    async fn disconnect(&self) -> Result<()> {
        let producer = lock(&self.producer).take();
        if let Some(producer) = producer {
            blocking(move || {
                producer
                    .flush(SEND_TIMEOUT)
                    .map_err(|e| BridgeError::Publish(format!("Failed to flush producer: {e}")))
            })
            .await?;
        }
        Ok(())
    }
}

struct ConsumerState {
    consumer: Arc<StreamConsumer>,
    pump: Option<JoinHandle<()>>,
}

/// Kafka consumer side of the bridge, one consumer group member.
pub struct KafkaConsumer {
    config: BridgeConfig,
    state: Mutex<Option<ConsumerState>>,
}

impl KafkaConsumer {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            state: Mutex::new(None),
        }
    }
}

fn to_received(message: &rdkafka::message::BorrowedMessage<'_>) -> ReceivedMessage {
    let headers = message
        .headers()
        .map(|headers| {
            headers
                .iter()
                .map(|header| {
                    let value = header
                        .value
                        .map(|v| String::from_utf8_lossy(v).into_owned())
                        .unwrap_or_default();
                    (header.key.to_string(), value)
                })
                .collect()
        })
        .unwrap_or_default();

    ReceivedMessage {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message
            .key()
            .map(|k| String::from_utf8_lossy(k).into_owned()),
        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        headers,
    }
}

#[async_trait]
impl MessageConsumer for KafkaConsumer {
    async fn connect(&self) -> Result<()> {
        let consumer: StreamConsumer = consumer_config(&self.config, &self.config.group_id)
            .create()
            .map_err(|e| BridgeError::Connection(format!("Failed to create Kafka consumer: {e}")))?;
        let consumer = Arc::new(consumer);

        let reachable = Arc::clone(&consumer);
        blocking(move || {
            reachable
                .fetch_metadata(None, METADATA_TIMEOUT)
                .map(|_| ())
                .map_err(|e| BridgeError::Connection(format!("Kafka unreachable: {e}")))
        })
        .await?;

        tracing::info!(group_id = %self.config.group_id, "Kafka consumer connected");
        *lock(&self.state) = Some(ConsumerState {
            consumer,
            pump: None,
        });
        Ok(())
    }

    async fn subscribe(&self, topics: &[String]) -> Result<mpsc::Receiver<ReceivedMessage>> {
        let mut state = lock(&self.state);
        let state = state.as_mut().ok_or(BridgeError::NotConnected)?;

        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        state
            .consumer
            .subscribe(&topic_refs)
            .map_err(|e| BridgeError::Subscribe(format!("Failed to subscribe to topics: {e}")))?;

        let (tx, rx) = mpsc::channel(CONSUMER_CHANNEL_CAPACITY);
        let consumer = Arc::clone(&state.consumer);
        if let Some(previous) = state.pump.take() {
            previous.abort();
        }
        state.pump = Some(tokio::spawn(async move {
            let mut stream = consumer.stream();
            while let Some(result) = stream.next().await {
                match result {
                    Ok(message) => {
                        if tx.send(to_received(&message)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Kafka consumer error");
                    }
                }
            }
        }));
        Ok(rx)
    }

    async fn commit(&self, message: &ReceivedMessage) -> Result<()> {
        let consumer = lock(&self.state)
            .as_ref()
            .map(|state| Arc::clone(&state.consumer))
            .ok_or(BridgeError::NotConnected)?;

        // The committed offset is the next one to read.
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(
                &message.topic,
                message.partition,
                Offset::Offset(message.offset + 1),
            )
            .map_err(|e| BridgeError::Subscribe(format!("Invalid offset: {e}")))?;
        consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| BridgeError::Subscribe(format!("Failed to commit offset: {e}")))
    }

    fn is_connected(&self) -> bool {
        lock(&self.state).is_some()
    }

    async fn disconnect(&self) -> Result<()> {
        let state = lock(&self.state).take();
        if let Some(state) = state {
            if let Some(pump) = state.pump {
                pump.abort();
            }
            state.consumer.unsubscribe();
        }
        Ok(())
    }
}

/// Kafka topic administration.
pub struct KafkaTopicAdmin {
    config: BridgeConfig,
    admin: Arc<AdminClient<DefaultClientContext>>,
}

impl KafkaTopicAdmin {
    pub fn new(config: BridgeConfig) -> Result<Self> {
        let admin = base_config(&config)
            .create()
            .map_err(|e| BridgeError::Connection(format!("Failed to create Kafka admin client: {e}")))?;
        Ok(Self {
            config,
            admin: Arc::new(admin),
        })
    }
}

#[async_trait]
impl TopicAdmin for KafkaTopicAdmin {
    async fn ensure_topics(&self, configs: &[TopicConfig]) -> Result<Vec<String>> {
        let existing = self.list_topics().await?;
        let missing: Vec<&TopicConfig> = configs
            .iter()
            .filter(|config| !existing.contains(&config.name))
            .collect();
        if missing.is_empty() {
            return Ok(Vec::new());
        }

        let retention: Vec<Option<String>> = missing
            .iter()
            .map(|config| config.retention_ms.map(|ms| ms.to_string()))
            .collect();
        let new_topics: Vec<NewTopic<'_>> = missing
            .iter()
            .zip(&retention)
            .map(|(config, retention)| {
                let topic = NewTopic::new(
                    &config.name,
                    config.partitions,
                    TopicReplication::Fixed(config.replication_factor),
                );
                match retention {
                    Some(ms) => topic.set("retention.ms", ms),
                    None => topic,
                }
            })
            .collect();

        let results = self
            .admin
            .create_topics(&new_topics, &AdminOptions::new())
            .await
            .map_err(|e| BridgeError::Admin(format!("Failed to create topics: {e}")))?;

        let mut created = Vec::new();
        for result in results {
            match result {
                Ok(name) => created.push(name),
                Err((_, RDKafkaErrorCode::TopicAlreadyExists)) => {}
                Err((name, code)) => {
                    return Err(BridgeError::Admin(format!(
                        "Failed to create topic {name}: {code}"
                    )));
                }
            }
        }
        tracing::info!(?created, "ensured Kafka topics");
        Ok(created)
    }

    async fn list_topics(&self) -> Result<Vec<String>> {
        let admin = Arc::clone(&self.admin);
        blocking(move || {
            let metadata = admin
                .inner()
                .fetch_metadata(None, METADATA_TIMEOUT)
                .map_err(|e| BridgeError::Admin(format!("Failed to fetch metadata: {e}")))?;
            let mut names: Vec<String> = metadata
                .topics()
                .iter()
                .map(|topic| topic.name().to_string())
                .collect();
            names.sort();
            Ok(names)
        })
        .await
    }

    async fn delete_topics(&self, names: &[String]) -> Result<()> {
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let results = self
            .admin
            .delete_topics(&refs, &AdminOptions::new())
            .await
            .map_err(|e| BridgeError::Admin(format!("Failed to delete topics: {e}")))?;

        for result in results {
            match result {
                Ok(_) | Err((_, RDKafkaErrorCode::UnknownTopicOrPartition)) => {}
                Err((name, code)) => {
                    return Err(BridgeError::Admin(format!(
                        "Failed to delete topic {name}: {code}"
                    )));
                }
            }
        }
        Ok(())
    }

    async fn topic_metadata(&self, name: &str) -> Result<TopicMetadata> {
        let admin = Arc::clone(&self.admin);
        let name = name.to_string();
        blocking(move || {
            let client = admin.inner();
            let metadata = client
                .fetch_metadata(Some(&name), METADATA_TIMEOUT)
                .map_err(|e| BridgeError::Admin(format!("Failed to fetch metadata: {e}")))?;
            let topic = metadata
                .topics()
                .iter()
                .find(|t| t.name() == name && t.error().is_none())
                .ok_or_else(|| BridgeError::Admin(format!("unknown topic: {name}")))?;

            let partitions = topic
                .partitions()
                .iter()
                .map(|partition| {
                    let (low, high) = client
                        .fetch_watermarks(&name, partition.id(), METADATA_TIMEOUT)
                        .map_err(|e| {
                            BridgeError::Admin(format!("Failed to fetch watermarks: {e}"))
                        })?;
                    Ok(PartitionMetadata {
                        id: partition.id(),
                        leader: partition.leader(),
                        replicas: partition.replicas().to_vec(),
                        low_watermark: low,
                        high_watermark: high,
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            Ok(TopicMetadata {
                name: name.clone(),
                partitions,
            })
        })
        .await
    }

    async fn reset_offsets(&self, group: &str, topic: &str, reset: OffsetReset) -> Result<()> {
        let metadata = self.topic_metadata(topic).await?;
        let consumer: BaseConsumer = consumer_config(&self.config, group)
            .create()
            .map_err(|e| BridgeError::Admin(format!("Failed to create consumer: {e}")))?;

        let mut assignment = TopicPartitionList::new();
        for partition in &metadata.partitions {
            let offset = match reset {
                OffsetReset::Earliest => partition.low_watermark,
                OffsetReset::Latest => partition.high_watermark,
            };
            assignment
                .add_partition_offset(topic, partition.id, Offset::Offset(offset))
                .map_err(|e| BridgeError::Admin(format!("Invalid offset: {e}")))?;
        }

        let group = group.to_string();
        blocking(move || {
            consumer
                .commit(&assignment, CommitMode::Sync)
                .map_err(|e| BridgeError::Admin(format!("Failed to commit offsets for {group}: {e}")))
        })
        .await?;
        tracing::info!(topic, ?reset, "consumer group offsets reset");
        Ok(())
    }
}
