//! In-process publish/subscribe with bounded replay history.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use common::CorrelationId;
use tokio::sync::oneshot;

use crate::error::{EventBusError, Result};
use crate::event::{BusEvent, EventPayload, TypedEvent};

/// Subscribing to this event type receives every emitted event.
pub const WILDCARD: &str = "*";

/// Default number of events retained for replay.
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

/// Error type handlers may return.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Return type of every handler.
pub type HandlerResult = std::result::Result<(), HandlerError>;

type Handler = Arc<dyn Fn(&BusEvent) -> HandlerResult + Send + Sync>;

/// Configuration for a [`LocalEventBus`].
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Identity stamped as `source` on every locally emitted event.
    pub service_name: String,
    /// Maximum number of events kept in the history ring buffer.
    pub history_limit: usize,
}

impl BusConfig {
    /// Creates a config with the default history limit.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    /// Sets the history limit.
    pub fn with_history_limit(mut self, history_limit: usize) -> Self {
        self.history_limit = history_limit;
        self
    }
}

/// What happened while dispatching one emission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Handlers that ran to completion.
    pub delivered: usize,
    /// Error messages from handlers that failed or panicked.
    pub failures: Vec<String>,
}

impl DispatchOutcome {
    /// Returns true if no handler failed.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

struct Registration {
    id: u64,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    handlers: HashMap<String, Vec<Registration>>,
    history: VecDeque<BusEvent>,
    next_id: u64,
}

impl Registry {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn record(&mut self, event: &BusEvent, limit: usize) {
        if limit == 0 {
            return;
        }
        while self.history.len() >= limit {
            self.history.pop_front();
        }
        self.history.push_back(event.clone());
    }

    /// Exact-type handlers first, then wildcard handlers, each in registration order.
    fn handlers_for(&self, event_type: &str) -> Vec<Handler> {
        let exact = self.handlers.get(event_type).into_iter().flatten();
        let wildcard = (event_type != WILDCARD)
            .then(|| self.handlers.get(WILDCARD))
            .flatten()
            .into_iter()
            .flatten();
        exact
            .chain(wildcard)
            .map(|registration| Arc::clone(&registration.handler))
            .collect()
    }
}

struct Shared {
    config: BusConfig,
    registry: Mutex<Registry>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, event_type: &str, id: u64) -> bool {
        let mut registry = self.lock();
        let Some(registrations) = registry.handlers.get_mut(event_type) else {
            return false;
        };
        let before = registrations.len();
        registrations.retain(|registration| registration.id != id);
        let removed = registrations.len() != before;
        if registrations.is_empty() {
            registry.handlers.remove(event_type);
        }
        removed
    }
}

/// Handle returned by every subscribe call.
///
/// Dropping the handle does not unsubscribe; call [`Subscription::unsubscribe`].
pub struct Subscription {
    id: u64,
    event_type: String,
    bus: Weak<Shared>,
    active: Arc<AtomicBool>,
}

impl Subscription {
    /// Removes exactly this registration. Safe to call more than once.
    ///
    /// Returns true if this call removed the handler.
    pub fn unsubscribe(&self) -> bool {
        if !self.active.swap(false, Ordering::SeqCst) {
            return false;
        }
        self.bus
            .upgrade()
            .is_some_and(|shared| shared.remove(&self.event_type, self.id))
    }

    /// Returns true until the handler is removed, either by `unsubscribe` or
    /// by a one-shot handler firing.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// The event type this subscription listens to.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("event_type", &self.event_type)
            .field("active", &self.is_active())
            .finish()
    }
}

struct UnsubscribeOnDrop(Subscription);

impl Drop for UnsubscribeOnDrop {
    fn drop(&mut self) {
        self.0.unsubscribe();
    }
}

/// Process-wide in-memory event bus.
///
/// Cloning is cheap and every clone shares the same subscription table and
/// history. Dispatch is synchronous: all handlers for an emission have run
/// before `emit` returns. Handlers are called without the internal lock held,
/// so they may emit, subscribe or unsubscribe themselves.
#[derive(Clone)]
pub struct LocalEventBus {
    inner: Arc<Shared>,
}

impl LocalEventBus {
    /// Creates a new bus.
    pub fn new(config: BusConfig) -> Self {
        Self {
            inner: Arc::new(Shared {
                config,
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    /// Creates a bus with the default history limit.
    pub fn for_service(service_name: impl Into<String>) -> Self {
        Self::new(BusConfig::new(service_name))
    }

    /// The service name stamped on locally emitted events.
    pub fn service_name(&self) -> &str {
        &self.inner.config.service_name
    }

    /// Emits `data` under `event_type`, generating a correlation id if none is given.
    pub fn emit(
        &self,
        event_type: &str,
        data: serde_json::Value,
        correlation_id: Option<CorrelationId>,
    ) -> DispatchOutcome {
        let payload = EventPayload::new(data, self.service_name(), correlation_id);
        self.publish(BusEvent::new(event_type, payload))
    }

    /// Emits a typed event.
    pub fn emit_typed<E: TypedEvent>(
        &self,
        event: &E,
        correlation_id: Option<CorrelationId>,
    ) -> Result<DispatchOutcome> {
        let data = serde_json::to_value(event)?;
        Ok(self.emit(E::EVENT_TYPE, data, correlation_id))
    }

    /// Dispatches a fully formed event, keeping its payload (including `source`) as is.
    ///
    /// Used to re-inject events that originated in another process.
    pub fn publish(&self, event: BusEvent) -> DispatchOutcome {
        let handlers = {
            let mut registry = self.inner.lock();
            registry.record(&event, self.inner.config.history_limit);
            registry.handlers_for(&event.event_type)
        };

        metrics::counter!("event_bus_emitted_total").increment(1);
        tracing::trace!(
            event_type = %event.event_type,
            correlation_id = %event.payload.correlation_id,
            handlers = handlers.len(),
            "dispatching event"
        );

        let mut outcome = DispatchOutcome::default();
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(Ok(())) => outcome.delivered += 1,
                Ok(Err(e)) => {
                    tracing::warn!(event_type = %event.event_type, error = %e, "event handler failed");
                    outcome.failures.push(e.to_string());
                }
                Err(panic) => {
                    let message = format!("handler panicked: {}", panic_message(panic.as_ref()));
                    tracing::error!(event_type = %event.event_type, error = %message, "event handler panicked");
                    outcome.failures.push(message);
                }
            }
        }

        if !outcome.failures.is_empty() {
            metrics::counter!("event_bus_handler_failures_total")
                .increment(outcome.failures.len() as u64);
        }
        outcome
    }

    /// Registers a handler for `event_type` (or [`WILDCARD`]).
    pub fn subscribe<F>(&self, event_type: &str, handler: F) -> Subscription
    where
        F: Fn(&BusEvent) -> HandlerResult + Send + Sync + 'static,
    {
        let id = self.inner.lock().allocate_id();
        let active = Arc::new(AtomicBool::new(true));
        self.register(id, event_type, Arc::new(handler), active)
    }

    /// Registers a handler that removes itself after its first invocation.
    pub fn subscribe_once<F>(&self, event_type: &str, handler: F) -> Subscription
    where
        F: Fn(&BusEvent) -> HandlerResult + Send + Sync + 'static,
    {
        let id = self.inner.lock().allocate_id();
        let active = Arc::new(AtomicBool::new(true));
        let bus = Arc::downgrade(&self.inner);
        let key = event_type.to_string();

        // Shared with the handle, so it sees the removal too.
        let pending = Arc::clone(&active);
        let wrapped = move |event: &BusEvent| {
            if !pending.swap(false, Ordering::SeqCst) {
                return Ok(());
            }
            if let Some(shared) = bus.upgrade() {
                shared.remove(&key, id);
            }
            handler(event)
        };
        self.register(id, event_type, Arc::new(wrapped), active)
    }

    /// Registers a handler receiving decoded data of a typed event.
    ///
    /// An event whose data does not decode counts as a handler failure.
    pub fn subscribe_typed<E, F>(&self, handler: F) -> Subscription
    where
        E: TypedEvent,
        F: Fn(EventPayload<E>) -> HandlerResult + Send + Sync + 'static,
    {
        self.subscribe(E::EVENT_TYPE, move |event| {
            let payload = event.payload.decode::<E>()?;
            handler(payload)
        })
    }

    /// Resolves with the next `event_type` emission, or fails after `timeout`.
    ///
    /// The temporary subscription is removed on success, on timeout and if
    /// the returned future is dropped early.
    pub async fn wait_for(&self, event_type: &str, timeout: Duration) -> Result<BusEvent> {
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let guard = UnsubscribeOnDrop(self.subscribe_once(event_type, move |event| {
            if let Some(tx) = tx.lock().unwrap_or_else(PoisonError::into_inner).take() {
                let _ = tx.send(event.clone());
            }
            Ok(())
        }));

        let received = tokio::time::timeout(timeout, rx).await;
        drop(guard);

        match received {
            Ok(Ok(event)) => Ok(event),
            _ => Err(EventBusError::Timeout {
                event_type: event_type.to_string(),
                timeout,
            }),
        }
    }

    /// Returns up to `limit` of the most recent events, oldest first,
    /// optionally restricted to one event type.
    pub fn history(&self, event_type: Option<&str>, limit: usize) -> Vec<BusEvent> {
        let registry = self.inner.lock();
        let mut events: Vec<BusEvent> = registry
            .history
            .iter()
            .rev()
            .filter(|event| event_type.is_none_or(|t| event.event_type == t))
            .take(limit)
            .cloned()
            .collect();
        events.reverse();
        events
    }

    /// Number of events currently held in history.
    pub fn history_len(&self) -> usize {
        self.inner.lock().history.len()
    }

    /// Drops all retained history.
    pub fn clear_history(&self) {
        self.inner.lock().history.clear();
    }

    /// Number of handlers registered for exactly `event_type`.
    pub fn listener_count(&self, event_type: &str) -> usize {
        self.inner
            .lock()
            .handlers
            .get(event_type)
            .map_or(0, Vec::len)
    }

    fn register(
        &self,
        id: u64,
        event_type: &str,
        handler: Handler,
        active: Arc<AtomicBool>,
    ) -> Subscription {
        self.inner
            .lock()
            .handlers
            .entry(event_type.to_string())
            .or_default()
            .push(Registration { id, handler });

        Subscription {
            id,
            event_type: event_type.to_string(),
            bus: Arc::downgrade(&self.inner),
            active,
        }
    }
}

impl std::fmt::Debug for LocalEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalEventBus")
            .field("service_name", &self.service_name())
            .field("history_limit", &self.inner.config.history_limit)
            .finish_non_exhaustive()
    }
}

/// Extracts a readable message from a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
