//! Bridge statistics: monotonic counters plus last-activity timestamps.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Point-in-time copy of the bridge counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStats {
    /// Messages successfully written to the broker.
    pub published: u64,
    /// Broker messages successfully re-emitted on the local bus.
    pub received: u64,
    /// Inbound decoding/handling failures and outbound send failures.
    pub errors: u64,
    /// Messages written to the dead-letter topic.
    pub dead_lettered: u64,
    /// Inbound messages dropped by loop prevention or the subscription filter.
    pub discarded: u64,
    pub last_published: Option<DateTime<Utc>>,
    pub last_received: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    published: AtomicU64,
    received: AtomicU64,
    errors: AtomicU64,
    dead_lettered: AtomicU64,
    discarded: AtomicU64,
    last_published: Mutex<Option<DateTime<Utc>>>,
    last_received: Mutex<Option<DateTime<Utc>>>,
}

impl StatsRecorder {
    pub(crate) fn published(&self, count: u64) {
        self.published.fetch_add(count, Ordering::Relaxed);
        set_now(&self.last_published);
        metrics::counter!("bridge_published_total").increment(count);
    }

    pub(crate) fn received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
        set_now(&self.last_received);
        metrics::counter!("bridge_received_total").increment(1);
    }

    pub(crate) fn error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("bridge_errors_total").increment(1);
    }

    pub(crate) fn dead_lettered(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("bridge_dead_lettered_total").increment(1);
    }

    pub(crate) fn discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> BridgeStats {
        BridgeStats {
            published: self.published.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            last_published: read(&self.last_published),
            last_received: read(&self.last_received),
        }
    }
}

fn set_now(slot: &Mutex<Option<DateTime<Utc>>>) {
    *slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
}

fn read(slot: &Mutex<Option<DateTime<Utc>>>) -> Option<DateTime<Utc>> {
    *slot.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = StatsRecorder::default();
        assert_eq!(stats.snapshot(), BridgeStats::default());

        stats.published(5);
        stats.published(1);
        stats.received();
        stats.error();
        stats.error();
        stats.dead_lettered();
        stats.discarded();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.published, 6);
        assert_eq!(snapshot.received, 1);
        assert_eq!(snapshot.errors, 2);
        assert_eq!(snapshot.dead_lettered, 1);
        assert_eq!(snapshot.discarded, 1);
        assert!(snapshot.last_published.is_some());
        assert!(snapshot.last_received.is_some());
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let json = serde_json::to_value(StatsRecorder::default().snapshot()).unwrap();
        assert_eq!(json["deadLettered"], 0);
        assert!(json["lastPublished"].is_null());
        assert!(json.get("lastReceived").is_some());
    }
}
