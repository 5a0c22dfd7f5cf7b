//! The broker bridge: mirrors local bus events to the broker and back.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use common::CorrelationId;
use event_bus::{BusEvent, DispatchOutcome, LocalEventBus, Subscription, TopicRouter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::batch::Batcher;
use crate::broker::{BrokerMessage, MessageConsumer, MessageProducer, ReceivedMessage};
use crate::config::{BridgeConfig, MIN_BATCH_TIMEOUT};
use crate::envelope::{DeadLetterEnvelope, WireEnvelope, headers};
use crate::error::{BridgeError, Result};
use crate::stats::{BridgeStats, StatsRecorder};

/// How long `disconnect()` waits for queued outbound events to be forwarded.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Runtime {
    subscriptions: Vec<Subscription>,
    forwarder: Option<(mpsc::UnboundedSender<BusEvent>, JoinHandle<()>)>,
    tasks: Vec<JoinHandle<()>>,
}

struct Inner {
    config: BridgeConfig,
    router: TopicRouter,
    bus: LocalEventBus,
    producer: Arc<dyn MessageProducer>,
    consumer: Arc<dyn MessageConsumer>,
    publish_events: HashSet<String>,
    subscribe_events: HashSet<String>,
    dead_letter_topic: String,
    stats: StatsRecorder,
    batcher: Batcher,
    connected: AtomicBool,
    lifecycle: tokio::sync::Mutex<()>,
    flush_lock: tokio::sync::Mutex<()>,
    runtime: Mutex<Runtime>,
}

/// Bidirectional bridge between a [`LocalEventBus`] and a message broker.
///
/// Outbound, every local event whose type is in `publish_events` and whose
/// source is this service is wrapped in a [`WireEnvelope`] and written to the
/// topic the router resolves for it, optionally batched per topic. Inbound,
/// messages on the topics of `subscribe_events` are decoded and re-emitted on
/// the local bus with their original payload. Events that came from the
/// broker keep their remote `source`, so they are never published back.
///
/// Broker trouble never reaches bus users: `publish` with a disconnected
/// producer is a counted no-op, and inbound failures are counted and
/// dead-lettered. Only [`connect`](Self::connect) returns errors; callers
/// are expected to carry on in local-only mode when it fails.
///
/// Background tasks hold the bridge alive until [`disconnect`](Self::disconnect).
#[derive(Clone)]
pub struct BrokerBridge {
    inner: Arc<Inner>,
}

impl BrokerBridge {
    /// Creates a bridge using the default routing table and the configured prefix.
    pub fn new(
        config: BridgeConfig,
        bus: LocalEventBus,
        producer: Arc<dyn MessageProducer>,
        consumer: Arc<dyn MessageConsumer>,
    ) -> Self {
        let router = TopicRouter::new().with_prefix(config.topic_prefix.clone().unwrap_or_default());
        Self::with_router(config, router, bus, producer, consumer)
    }

    /// Creates a bridge with a custom routing table. The router's prefix is used as is.
    pub fn with_router(
        config: BridgeConfig,
        router: TopicRouter,
        bus: LocalEventBus,
        producer: Arc<dyn MessageProducer>,
        consumer: Arc<dyn MessageConsumer>,
    ) -> Self {
        let publish_events = config.publish_events.iter().cloned().collect();
        let subscribe_events = config.subscribe_events.iter().cloned().collect();
        let dead_letter_topic = router.dead_letter_topic(&config.dead_letter_topic);
        let batcher = Batcher::new(config.batch_size);
        Self {
            inner: Arc::new(Inner {
                config,
                router,
                bus,
                producer,
                consumer,
                publish_events,
                subscribe_events,
                dead_letter_topic,
                stats: StatsRecorder::default(),
                batcher,
                connected: AtomicBool::new(false),
                lifecycle: tokio::sync::Mutex::new(()),
                flush_lock: tokio::sync::Mutex::new(()),
                runtime: Mutex::new(Runtime::default()),
            }),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn router(&self) -> &TopicRouter {
        &self.inner.router
    }

    pub fn bus(&self) -> &LocalEventBus {
        &self.inner.bus
    }

    /// Fully qualified dead-letter topic.
    pub fn dead_letter_topic(&self) -> &str {
        &self.inner.dead_letter_topic
    }

    /// Connects producer and consumer, subscribes to the inbound topics and
    /// starts mirroring local events. Returns once everything is live.
    ///
    /// Calling it again while connected is a no-op.
    #[tracing::instrument(skip(self), fields(service = %self.inner.config.service_name))]
    pub async fn connect(&self) -> Result<()> {
        let inner = &self.inner;
        let _lifecycle = inner.lifecycle.lock().await;
        if inner.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        inner.producer.connect().await?;
        if let Err(e) = inner.consumer.connect().await {
            inner.teardown_clients().await;
            return Err(e);
        }

        let mut tasks = Vec::new();
        if !inner.config.subscribe_events.is_empty() {
            let topics = inner.router.topics_for(&inner.config.subscribe_events);
            let rx = match inner.consumer.subscribe(&topics).await {
                Ok(rx) => rx,
                Err(e) => {
                    inner.teardown_clients().await;
                    return Err(e);
                }
            };
            tracing::info!(?topics, "subscribed to broker topics");
            tasks.push(tokio::spawn(consume_loop(Arc::clone(inner), rx)));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let subscriptions = inner
            .publish_events
            .iter()
            .map(|event_type| {
                let tx = tx.clone();
                inner.bus.subscribe(event_type, move |event| {
                    tx.send(event.clone())
                        .map_err(|_| BridgeError::NotConnected.into())
                })
            })
            .collect();
        let forwarder = tokio::spawn(forward_loop(Arc::clone(inner), rx));

        if inner.config.is_batching() {
            tasks.push(tokio::spawn(flush_timer(
                Arc::clone(inner),
                inner.config.batch_timeout,
            )));
        }

        *inner.runtime() = Runtime {
            subscriptions,
            forwarder: Some((tx, forwarder)),
            tasks,
        };
        inner.connected.store(true, Ordering::SeqCst);
        tracing::info!(
            publish = inner.publish_events.len(),
            subscribe = inner.subscribe_events.len(),
            batch_size = inner.config.batch_size,
            "broker bridge connected"
        );
        Ok(())
    }

    /// Stops mirroring, flushes buffered batches and closes both connections.
    ///
    /// Safe to call when `connect()` never succeeded.
    #[tracing::instrument(skip(self), fields(service = %self.inner.config.service_name))]
    pub async fn disconnect(&self) -> Result<()> {
        let inner = &self.inner;
        let _lifecycle = inner.lifecycle.lock().await;
        let runtime = std::mem::take(&mut *inner.runtime());

        for subscription in &runtime.subscriptions {
            subscription.unsubscribe();
        }
        drop(runtime.subscriptions);

        if let Some((tx, mut forwarder)) = runtime.forwarder {
            drop(tx);
            if tokio::time::timeout(DRAIN_TIMEOUT, &mut forwarder)
                .await
                .is_err()
            {
                tracing::warn!("outbound queue did not drain in time");
                forwarder.abort();
            }
        }

        if let Err(e) = inner.flush().await {
            tracing::warn!(error = %e, "final flush failed");
        }
        let pending = inner.batcher.pending();
        if pending > 0 {
            tracing::warn!(pending, "discarding unsent batched messages");
        }

        for task in runtime.tasks {
            task.abort();
        }
        inner.connected.store(false, Ordering::SeqCst);

        let producer = inner.producer.disconnect().await;
        let consumer = inner.consumer.disconnect().await;
        tracing::info!("broker bridge disconnected");
        producer.and(consumer)
    }

    /// True when `connect()` succeeded and both connections are live.
    pub fn is_ready(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
            && self.inner.producer.is_connected()
            && self.inner.consumer.is_connected()
    }

    /// Forwards one local event to the broker.
    ///
    /// Events not in `publish_events`, events from other services, and any
    /// event while the producer is down are skipped without error.
    pub async fn publish(&self, event: &BusEvent) {
        self.inner.publish(event).await;
    }

    /// Emits on the local bus; the event reaches the broker through the
    /// bridge's bus subscription if its type is published.
    pub fn emit(
        &self,
        event_type: &str,
        data: serde_json::Value,
        correlation_id: Option<CorrelationId>,
    ) -> DispatchOutcome {
        self.inner.bus.emit(event_type, data, correlation_id)
    }

    /// Sends every buffered batch now. Failed batches stay buffered.
    pub async fn flush(&self) -> Result<()> {
        self.inner.flush().await
    }

    pub fn stats(&self) -> BridgeStats {
        self.inner.stats.snapshot()
    }

    /// Outbound messages waiting in batch buffers.
    pub fn pending(&self) -> usize {
        self.inner.batcher.pending()
    }
}

impl std::fmt::Debug for BrokerBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerBridge")
            .field("service", &self.inner.config.service_name)
            .field("connected", &self.inner.connected.load(Ordering::SeqCst))
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn runtime(&self) -> MutexGuard<'_, Runtime> {
        self.runtime.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn teardown_clients(&self) {
        if let Err(e) = self.producer.disconnect().await {
            tracing::warn!(error = %e, "producer disconnect failed");
        }
        if let Err(e) = self.consumer.disconnect().await {
            tracing::warn!(error = %e, "consumer disconnect failed");
        }
    }

    async fn publish(&self, event: &BusEvent) {
        if !self.publish_events.contains(&event.event_type) {
            skipped("not_published");
            return;
        }
        if event.source() != self.config.service_name {
            tracing::trace!(
                event_type = %event.event_type,
                source = event.source(),
                "not forwarding event received from another service"
            );
            skipped("foreign_source");
            return;
        }
        if !self.producer.is_connected() {
            tracing::warn!(
                event_type = %event.event_type,
                "producer not connected, event stays local"
            );
            skipped("not_connected");
            return;
        }

        let topic = self.router.resolve(&event.event_type);
        let message = match WireEnvelope::from_event(event, &self.config.service_name).to_message() {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(event_type = %event.event_type, error = %e, "failed to encode event");
                self.stats.error();
                return;
            }
        };

        if self.config.is_batching() {
            // Held before the push so a batch re-queued by a failing flush
            // is sent ahead of newer messages.
            let _flushing = self.flush_lock.lock().await;
            if let Some(batch) = self.batcher.push(&topic, message) {
                self.send_batch(&topic, batch).await;
            }
        } else {
            self.send_batch(&topic, vec![message]).await;
        }
    }

    /// Sends one batch. A failed batch is re-queued when batching, otherwise dropped.
    async fn send_batch(&self, topic: &str, batch: Vec<BrokerMessage>) -> bool {
        let count = batch.len();
        match self.producer.send(topic, batch.clone()).await {
            Ok(()) => {
                self.stats.published(count as u64);
                tracing::debug!(topic, count, "published to broker");
                true
            }
            Err(e) => {
                self.stats.error();
                if self.config.is_batching() {
                    tracing::warn!(topic, count, error = %e, "batch send failed, re-queued");
                    self.batcher.requeue(topic, batch);
                } else {
                    tracing::warn!(topic, error = %e, "publish failed");
                }
                false
            }
        }
    }

    #[tracing::instrument(skip(self), fields(service = %self.config.service_name))]
    async fn flush(&self) -> Result<()> {
        if !self.producer.is_connected() {
            return Ok(());
        }
        let _flushing = self.flush_lock.lock().await;
        let mut failed = 0;
        for (topic, batch) in self.batcher.drain() {
            if !self.send_batch(&topic, batch).await {
                failed += 1;
            }
        }
        if failed > 0 {
            return Err(BridgeError::Publish(format!(
                "{failed} batch(es) failed and were re-queued"
            )));
        }
        Ok(())
    }

    async fn handle_inbound(&self, message: &ReceivedMessage) {
        let service = self.config.service_name.as_str();

        if message.header(headers::SOURCE) == Some(service) {
            self.discard(message, "own event");
            return;
        }
        if let Some(event_type) = message.header(headers::EVENT_TYPE) {
            if !self.subscribe_events.contains(event_type) {
                self.discard(message, "not subscribed");
                return;
            }
        }

        let envelope = match WireEnvelope::decode(&message.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.fail(message, e.to_string()).await;
                return;
            }
        };
        if envelope.payload.source == service {
            self.discard(message, "own event");
            return;
        }
        if !self.subscribe_events.contains(&envelope.event_type) {
            self.discard(message, "not subscribed");
            return;
        }

        let event_type = envelope.event_type.clone();
        let outcome = self.bus.publish(envelope.into_bus_event());
        if outcome.is_success() {
            self.stats.received();
            tracing::debug!(
                %event_type,
                topic = %message.topic,
                offset = message.offset,
                handlers = outcome.delivered,
                "re-emitted broker event locally"
            );
        } else {
            let error = format!("local handlers failed: {}", outcome.failures.join("; "));
            self.fail(message, error).await;
        }
    }

    fn discard(&self, message: &ReceivedMessage, reason: &str) {
        self.stats.discarded();
        tracing::trace!(topic = %message.topic, offset = message.offset, reason, "discarded broker message");
    }

    /// Counts the failure and writes exactly one dead-letter record when enabled.
    async fn fail(&self, message: &ReceivedMessage, error: String) {
        self.stats.error();
        tracing::error!(
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            %error,
            "failed to process broker message"
        );
        if !self.config.dead_letter {
            return;
        }

        let record = match DeadLetterEnvelope::new(message, error, &self.config.service_name)
            .to_message(message)
        {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode dead letter");
                return;
            }
        };
        match self.producer.send(&self.dead_letter_topic, vec![record]).await {
            Ok(()) => {
                self.stats.dead_lettered();
                tracing::warn!(topic = %self.dead_letter_topic, original = %message.topic, "message dead-lettered");
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to write dead letter");
            }
        }
    }
}

fn skipped(reason: &'static str) {
    metrics::counter!("bridge_publish_skipped_total", "reason" => reason).increment(1);
}

/// Handles inbound messages one at a time. A message is committed only once
/// it has been re-emitted, discarded or dead-lettered.
async fn consume_loop(inner: Arc<Inner>, mut rx: mpsc::Receiver<ReceivedMessage>) {
    while let Some(message) = rx.recv().await {
        inner.handle_inbound(&message).await;
        if let Err(e) = inner.consumer.commit(&message).await {
            tracing::warn!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                error = %e,
                "failed to commit offset"
            );
        }
    }
    tracing::debug!("broker consumer stream ended");
}

async fn forward_loop(inner: Arc<Inner>, mut rx: mpsc::UnboundedReceiver<BusEvent>) {
    while let Some(event) = rx.recv().await {
        inner.publish(&event).await;
    }
}

async fn flush_timer(inner: Arc<Inner>, period: Duration) {
    // Public config fields bypass the builder clamp.
    let mut interval = tokio::time::interval(period.max(MIN_BATCH_TIMEOUT));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval.tick().await;
    loop {
        interval.tick().await;
        if inner.batcher.pending() > 0 {
            if let Err(e) = inner.flush().await {
                tracing::warn!(error = %e, "timed flush failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBroker;
    use event_bus::EventPayload;
    use serde_json::json;

    fn bridge(config: BridgeConfig) -> (BrokerBridge, InMemoryBroker, LocalEventBus) {
        let broker = InMemoryBroker::new();
        let bus = LocalEventBus::for_service(config.service_name.clone());
        let bridge = BrokerBridge::new(
            config,
            bus.clone(),
            Arc::new(broker.clone()),
            Arc::new(broker.clone()),
        );
        (bridge, broker, bus)
    }

    fn local(event_type: &str, source: &str) -> BusEvent {
        BusEvent::new(event_type, EventPayload::new(json!({}), source, None))
    }

    #[tokio::test]
    async fn test_publish_filters_type_and_source() {
        let (bridge, broker, _bus) =
            bridge(BridgeConfig::new("sales").publish(["sale.created"]));
        bridge.connect().await.unwrap();

        bridge.publish(&local("sale.updated", "sales")).await;
        bridge.publish(&local("sale.created", "inventory")).await;
        assert_eq!(bridge.stats().published, 0);

        bridge.publish(&local("sale.created", "sales")).await;
        assert_eq!(bridge.stats().published, 1);
        assert_eq!(broker.messages("order-events").len(), 1);

        bridge.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_uses_prefixed_topic() {
        let (bridge, broker, _bus) = bridge(
            BridgeConfig::new("sales")
                .with_topic_prefix("staging")
                .publish(["payment.received", "custom.thing"]),
        );
        bridge.connect().await.unwrap();

        bridge.publish(&local("payment.received", "sales")).await;
        bridge.publish(&local("custom.thing", "sales")).await;

        assert_eq!(broker.messages("staging.payment-events").len(), 1);
        assert_eq!(broker.messages("staging.general-events").len(), 1);
        assert_eq!(bridge.dead_letter_topic(), "staging.dead-letter-queue");
        bridge.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_failure_propagates_and_leaves_bus_alone() {
        let (bridge, broker, bus) = bridge(BridgeConfig::new("sales").publish(["sale.created"]));
        broker.set_fail_on_connect(true);

        assert!(matches!(
            bridge.connect().await,
            Err(BridgeError::Connection(_))
        ));
        assert!(!bridge.is_ready());
        assert_eq!(bus.listener_count("sale.created"), 0);

        let outcome = bridge.emit("sale.created", json!({}), None);
        assert!(outcome.is_success());
        bridge.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_unbatched_send_failure_is_counted() {
        let (bridge, broker, _bus) = bridge(BridgeConfig::new("sales").publish(["sale.created"]));
        bridge.connect().await.unwrap();
        broker.set_fail_on_send(true);

        bridge.publish(&local("sale.created", "sales")).await;

        let stats = bridge.stats();
        assert_eq!(stats.published, 0);
        assert_eq!(stats.errors, 1);
        assert_eq!(bridge.pending(), 0);
    }

    #[tokio::test]
    async fn test_connect_twice_is_noop() {
        let (bridge, _broker, bus) = bridge(BridgeConfig::new("sales").publish(["sale.created"]));
        bridge.connect().await.unwrap();
        bridge.connect().await.unwrap();
        assert_eq!(bus.listener_count("sale.created"), 1);

        bridge.disconnect().await.unwrap();
        assert_eq!(bus.listener_count("sale.created"), 0);
        assert!(!bridge.is_ready());
    }

    /// Holds its first send until released, then fails it. Later sends
    /// succeed and record their message keys.
    #[derive(Default)]
    struct GatedProducer {
        gate: tokio::sync::Notify,
        holding: AtomicBool,
        sent: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl MessageProducer for GatedProducer {
        async fn connect(&self) -> Result<()> {
            Ok(())
        }

        async fn send(&self, _topic: &str, messages: Vec<BrokerMessage>) -> Result<()> {
            if !self.holding.swap(true, Ordering::SeqCst) {
                self.gate.notified().await;
                return Err(BridgeError::Publish("broker busy".to_string()));
            }
            let keys: Vec<String> = messages.into_iter().filter_map(|m| m.key).collect();
            self.sent.lock().unwrap().push(keys);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }

        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }
    }

    fn keyed(correlation_id: &str) -> BusEvent {
        BusEvent::new(
            "sale.created",
            EventPayload::new(json!({}), "sales", Some(correlation_id.into())),
        )
    }

    #[tokio::test]
    async fn test_requeued_batch_stays_ahead_of_later_publishes() {
        let producer = Arc::new(GatedProducer::default());
        let bridge = BrokerBridge::new(
            BridgeConfig::new("sales")
                .publish(["sale.created"])
                .with_batching(2, Duration::from_secs(60)),
            LocalEventBus::for_service("sales"),
            producer.clone(),
            Arc::new(InMemoryBroker::new()),
        );

        bridge.publish(&keyed("m1")).await;
        let flushing = tokio::spawn({
            let bridge = bridge.clone();
            async move { bridge.flush().await }
        });
        while !producer.holding.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }

        let publishing = tokio::spawn({
            let bridge = bridge.clone();
            async move {
                bridge.publish(&keyed("m2")).await;
                bridge.publish(&keyed("m3")).await;
            }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(producer.sent.lock().unwrap().is_empty());

        producer.gate.notify_one();
        assert!(flushing.await.unwrap().is_err());
        publishing.await.unwrap();

        assert_eq!(
            *producer.sent.lock().unwrap(),
            vec![vec!["m1".to_string(), "m2".to_string()]]
        );
        assert_eq!(bridge.pending(), 1);
    }
}
