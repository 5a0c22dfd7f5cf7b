//! In-memory broker for tests and local-only mode.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::admin::{OffsetReset, PartitionMetadata, TopicAdmin, TopicConfig, TopicMetadata};
use crate::broker::{
    BrokerMessage, CONSUMER_CHANNEL_CAPACITY, MessageConsumer, MessageProducer, ReceivedMessage,
};
use crate::error::{BridgeError, Result};

struct Subscriber {
    client: u64,
    topics: HashSet<String>,
    tx: mpsc::Sender<ReceivedMessage>,
}

#[derive(Default)]
struct Cluster {
    topics: BTreeMap<String, Vec<Vec<ReceivedMessage>>>,
    subscribers: Vec<Subscriber>,
    group_offsets: HashMap<(String, String, i32), i64>,
    next_client: u64,
}

impl Cluster {
    fn allocate_client(&mut self) -> u64 {
        self.next_client += 1;
        self.next_client
    }

    fn create_topic(&mut self, name: &str, partitions: i32) -> bool {
        if self.topics.contains_key(name) {
            return false;
        }
        let partitions = partitions.max(1) as usize;
        self.topics.insert(name.to_string(), vec![Vec::new(); partitions]);
        true
    }

    /// Appends messages (auto-creating the topic) and returns what each subscriber must receive.
    fn append(
        &mut self,
        topic: &str,
        messages: Vec<BrokerMessage>,
    ) -> Vec<(mpsc::Sender<ReceivedMessage>, ReceivedMessage)> {
        self.create_topic(topic, 1);
        let mut stored = Vec::with_capacity(messages.len());
        if let Some(partitions) = self.topics.get_mut(topic) {
            for message in messages {
                let partition = partition_for(message.key.as_deref(), partitions.len());
                let log = &mut partitions[partition];
                let received = ReceivedMessage {
                    topic: topic.to_string(),
                    partition: partition as i32,
                    offset: log.len() as i64,
                    key: message.key,
                    payload: message.payload,
                    headers: message.headers,
                };
                log.push(received.clone());
                stored.push(received);
            }
        }

        self.subscribers
            .iter()
            .filter(|s| s.topics.contains(topic))
            .flat_map(|s| stored.iter().map(move |m| (s.tx.clone(), m.clone())))
            .collect()
    }
}

fn partition_for(key: Option<&str>, partitions: usize) -> usize {
    match key {
        Some(key) if partitions > 1 => {
            let mut hasher = DefaultHasher::new();
            key.hash(&mut hasher);
            (hasher.finish() % partitions as u64) as usize
        }
        _ => 0,
    }
}

#[derive(Debug, Default)]
struct ClientState {
    producer_connected: bool,
    consumer_connected: bool,
    fail_on_connect: bool,
    fail_on_send: bool,
    sent_batches: Vec<(String, usize)>,
    consumed: HashMap<(String, i32), i64>,
}

/// A broker kept entirely in process memory.
///
/// One `InMemoryBroker` is one client connection to a shared cluster. Use
/// [`client`](Self::client) to open another connection to the same cluster,
/// e.g. one per simulated service. Clones share the same connection.
///
/// Every subscribed client receives every message on its topics; consumer
/// groups only matter for [`reset_offsets`](TopicAdmin::reset_offsets).
#[derive(Clone)]
pub struct InMemoryBroker {
    cluster: Arc<Mutex<Cluster>>,
    client: Arc<Mutex<ClientState>>,
    client_id: u64,
}

impl InMemoryBroker {
    /// Creates a new, empty cluster and a connection to it.
    pub fn new() -> Self {
        let mut cluster = Cluster::default();
        let client_id = cluster.allocate_client();
        Self {
            cluster: Arc::new(Mutex::new(cluster)),
            client: Arc::new(Mutex::new(ClientState::default())),
            client_id,
        }
    }

    /// Opens another independent connection to the same cluster.
    pub fn client(&self) -> Self {
        let client_id = self.cluster().allocate_client();
        Self {
            cluster: Arc::clone(&self.cluster),
            client: Arc::new(Mutex::new(ClientState::default())),
            client_id,
        }
    }

    /// Makes the next `connect()` calls of this connection fail.
    pub fn set_fail_on_connect(&self, fail: bool) {
        self.state().fail_on_connect = fail;
    }

    /// Makes `send()` on this connection fail.
    pub fn set_fail_on_send(&self, fail: bool) {
        self.state().fail_on_send = fail;
    }

    /// `(topic, message count)` of every successful `send()` on this connection.
    pub fn sent_batches(&self) -> Vec<(String, usize)> {
        self.state().sent_batches.clone()
    }

    /// Every message stored on `topic`, partition by partition.
    pub fn messages(&self, topic: &str) -> Vec<ReceivedMessage> {
        self.cluster()
            .topics
            .get(topic)
            .map(|partitions| partitions.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Writes messages as an external producer would, bypassing this connection's state.
    pub async fn inject(&self, topic: &str, messages: Vec<BrokerMessage>) {
        let deliveries = self.cluster().append(topic, messages);
        deliver(deliveries).await;
    }

    /// Next offset this connection's consumer will resume from on one
    /// partition, as committed after processing.
    pub fn consumed_offset(&self, topic: &str, partition: i32) -> Option<i64> {
        self.state()
            .consumed
            .get(&(topic.to_string(), partition))
            .copied()
    }

    /// Committed offset of `group` on one partition, as set by `reset_offsets`.
    pub fn committed_offset(&self, group: &str, topic: &str, partition: i32) -> Option<i64> {
        self.cluster()
            .group_offsets
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
    }

    fn cluster(&self) -> MutexGuard<'_, Cluster> {
        self.cluster.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn state(&self) -> MutexGuard<'_, ClientState> {
        self.client.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_connect(&self) -> Result<()> {
        if self.state().fail_on_connect {
            return Err(BridgeError::Connection(
                "in-memory broker unreachable".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBroker")
            .field("client_id", &self.client_id)
            .field("state", &*self.state())
            .finish()
    }
}

async fn deliver(deliveries: Vec<(mpsc::Sender<ReceivedMessage>, ReceivedMessage)>) {
    for (tx, message) in deliveries {
        // A closed channel means the subscriber disconnected.
        let _ = tx.send(message).await;
    }
}

#[async_trait]
impl MessageProducer for InMemoryBroker {
    async fn connect(&self) -> Result<()> {
        self.check_connect()?;
        self.state().producer_connected = true;
        Ok(())
    }

    async fn send(&self, topic: &str, messages: Vec<BrokerMessage>) -> Result<()> {
        {
            let mut state = self.state();
            if !state.producer_connected {
                return Err(BridgeError::NotConnected);
            }
            if state.fail_on_send {
                return Err(BridgeError::Publish("simulated send failure".to_string()));
            }
            state.sent_batches.push((topic.to_string(), messages.len()));
        }

        let deliveries = self.cluster().append(topic, messages);
        deliver(deliveries).await;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state().producer_connected
    }

    async fn disconnect(&self) -> Result<()> {
        self.state().producer_connected = false;
        Ok(())
    }
}

#[async_trait]
impl MessageConsumer for InMemoryBroker {
    async fn connect(&self) -> Result<()> {
        self.check_connect()?;
        self.state().consumer_connected = true;
        Ok(())
    }

    async fn subscribe(&self, topics: &[String]) -> Result<mpsc::Receiver<ReceivedMessage>> {
        if !self.state().consumer_connected {
            return Err(BridgeError::NotConnected);
        }
        let (tx, rx) = mpsc::channel(CONSUMER_CHANNEL_CAPACITY);
        let mut cluster = self.cluster();
        cluster.subscribers.retain(|s| s.client != self.client_id);
        cluster.subscribers.push(Subscriber {
            client: self.client_id,
            topics: topics.iter().cloned().collect(),
            tx,
        });
        Ok(rx)
    }

    async fn commit(&self, message: &ReceivedMessage) -> Result<()> {
        let mut state = self.state();
        if !state.consumer_connected {
            return Err(BridgeError::NotConnected);
        }
        let next = message.offset + 1;
        let committed = state
            .consumed
            .entry((message.topic.clone(), message.partition))
            .or_insert(next);
        *committed = (*committed).max(next);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state().consumer_connected
    }

    async fn disconnect(&self) -> Result<()> {
        self.cluster()
            .subscribers
            .retain(|s| s.client != self.client_id);
        self.state().consumer_connected = false;
        Ok(())
    }
}

#[async_trait]
impl TopicAdmin for InMemoryBroker {
    async fn ensure_topics(&self, configs: &[TopicConfig]) -> Result<Vec<String>> {
        let mut cluster = self.cluster();
        Ok(configs
            .iter()
            .filter(|config| cluster.create_topic(&config.name, config.partitions))
            .map(|config| config.name.clone())
            .collect())
    }

    async fn list_topics(&self) -> Result<Vec<String>> {
        Ok(self.cluster().topics.keys().cloned().collect())
    }

    async fn delete_topics(&self, names: &[String]) -> Result<()> {
        let mut cluster = self.cluster();
        for name in names {
            cluster.topics.remove(name);
        }
        Ok(())
    }

    async fn topic_metadata(&self, name: &str) -> Result<TopicMetadata> {
        let cluster = self.cluster();
        let partitions = cluster
            .topics
            .get(name)
            .ok_or_else(|| BridgeError::Admin(format!("unknown topic: {name}")))?;
        Ok(TopicMetadata {
            name: name.to_string(),
            partitions: partitions
                .iter()
                .enumerate()
                .map(|(id, log)| PartitionMetadata {
                    id: id as i32,
                    leader: 0,
                    replicas: vec![0],
                    low_watermark: 0,
                    high_watermark: log.len() as i64,
                })
                .collect(),
        })
    }

    async fn reset_offsets(&self, group: &str, topic: &str, reset: OffsetReset) -> Result<()> {
        let mut cluster = self.cluster();
        let high_watermarks: Vec<i64> = cluster
            .topics
            .get(topic)
            .ok_or_else(|| BridgeError::Admin(format!("unknown topic: {topic}")))?
            .iter()
            .map(|log| log.len() as i64)
            .collect();

        for (partition, high) in high_watermarks.into_iter().enumerate() {
            let offset = match reset {
                OffsetReset::Earliest => 0,
                OffsetReset::Latest => high,
            };
            cluster.group_offsets.insert(
                (group.to_string(), topic.to_string(), partition as i32),
                offset,
            );
        }
        Ok(())
    }
}
