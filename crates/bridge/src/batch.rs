//! Per-topic outbound buffers.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::broker::BrokerMessage;

/// Accumulates outbound messages per topic until a batch is full or flushed.
///
/// The lock is never held across an await; callers take whole batches out,
/// send them, and hand failed ones back with [`requeue`](Self::requeue).
#[derive(Debug)]
pub(crate) struct Batcher {
    batch_size: usize,
    buffers: Mutex<HashMap<String, Vec<BrokerMessage>>>,
}

impl Batcher {
    pub(crate) fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            buffers: Mutex::new(HashMap::new()),
        }
    }

    /// Buffers `message`; returns the topic's whole batch once it is full.
    pub(crate) fn push(&self, topic: &str, message: BrokerMessage) -> Option<Vec<BrokerMessage>> {
        let mut buffers = self.lock();
        let buffer = buffers.entry(topic.to_string()).or_default();
        buffer.push(message);
        if buffer.len() >= self.batch_size {
            buffers.remove(topic)
        } else {
            None
        }
    }

    /// Takes every non-empty buffer.
    pub(crate) fn drain(&self) -> Vec<(String, Vec<BrokerMessage>)> {
        self.lock()
            .drain()
            .filter(|(_, messages)| !messages.is_empty())
            .collect()
    }

    /// Puts a batch that failed to send back in front of anything buffered since.
    pub(crate) fn requeue(&self, topic: &str, mut messages: Vec<BrokerMessage>) {
        let mut buffers = self.lock();
        let buffer = buffers.entry(topic.to_string()).or_default();
        messages.append(buffer);
        *buffer = messages;
    }

    /// Number of messages waiting across all topics.
    pub(crate) fn pending(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<BrokerMessage>>> {
        self.buffers.lock().unwrap_or_else(|e| e.into_inner())
    }
}
