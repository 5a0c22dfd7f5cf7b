//! Topic administration: provisioning, inspection and consumer-group offset reset.
//!
//! Not on the event path. Operators and the host binary call it at start-up
//! to make sure every routed topic exists.

use async_trait::async_trait;
use event_bus::TopicRouter;

use crate::error::Result;

/// Retention applied to the dead-letter topic by [`default_topic_configs`] (7 days).
pub const DEAD_LETTER_RETENTION_MS: i64 = 7 * 24 * 60 * 60 * 1000;

/// Desired settings for one topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicConfig {
    /// Fully qualified (prefixed) topic name.
    pub name: String,
    pub partitions: i32,
    pub replication_factor: i32,
    pub retention_ms: Option<i64>,
}

impl TopicConfig {
    /// Three partitions, replication factor one, broker default retention.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partitions: 3,
            replication_factor: 1,
            retention_ms: None,
        }
    }

    pub fn with_partitions(mut self, partitions: i32) -> Self {
        self.partitions = partitions;
        self
    }

    pub fn with_replication_factor(mut self, replication_factor: i32) -> Self {
        self.replication_factor = replication_factor;
        self
    }

    pub fn with_retention_ms(mut self, retention_ms: i64) -> Self {
        self.retention_ms = Some(retention_ms);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionMetadata {
    pub id: i32,
    pub leader: i32,
    pub replicas: Vec<i32>,
    /// Offset of the oldest retained message.
    pub low_watermark: i64,
    /// Offset the next message will get.
    pub high_watermark: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMetadata {
    pub name: String,
    pub partitions: Vec<PartitionMetadata>,
}

impl TopicMetadata {
    /// Messages currently retained across all partitions.
    pub fn message_count(&self) -> i64 {
        self.partitions
            .iter()
            .map(|p| p.high_watermark - p.low_watermark)
            .sum()
    }
}

/// Where a consumer group restarts after [`TopicAdmin::reset_offsets`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetReset {
    /// Replay everything still retained.
    Earliest,
    /// Skip everything already written.
    Latest,
}

/// Broker-side topic management.
#[async_trait]
pub trait TopicAdmin: Send + Sync {
    /// Creates the topics that do not exist yet and returns their names.
    /// Existing topics are left untouched.
    async fn ensure_topics(&self, configs: &[TopicConfig]) -> Result<Vec<String>>;

    /// Names of all topics, sorted.
    async fn list_topics(&self) -> Result<Vec<String>>;

    /// Deletes the named topics. Unknown names are ignored.
    async fn delete_topics(&self, names: &[String]) -> Result<()>;

    /// Partition layout and watermarks of one topic.
    async fn topic_metadata(&self, name: &str) -> Result<TopicMetadata>;

    /// Moves a consumer group's committed offsets on every partition of `topic`.
    async fn reset_offsets(&self, group: &str, topic: &str, reset: OffsetReset) -> Result<()>;
}

/// One config per topic the router can resolve to, plus the dead-letter topic.
pub fn default_topic_configs(router: &TopicRouter, dead_letter_topic: &str) -> Vec<TopicConfig> {
    let mut configs: Vec<TopicConfig> = router
        .all_topics()
        .into_iter()
        .map(TopicConfig::new)
        .collect();
    configs.push(
        TopicConfig::new(router.dead_letter_topic(dead_letter_topic))
            .with_partitions(1)
            .with_retention_ms(DEAD_LETTER_RETENTION_MS),
    );
    configs
}
