//! Event type names and the static event-type to broker-topic routing table.

use std::collections::{BTreeSet, HashMap};

/// Well-known event type names.
pub mod event_types {
    pub const SALE_CREATED: &str = "sale.created";
    pub const SALE_UPDATED: &str = "sale.updated";
    pub const SALE_COMPLETED: &str = "sale.completed";
    pub const SALE_CANCELLED: &str = "sale.cancelled";

    pub const QUOTATION_CREATED: &str = "quotation.created";
    pub const QUOTATION_CONVERTED: &str = "quotation.converted";

    pub const PAYMENT_RECEIVED: &str = "payment.received";
    pub const PAYMENT_REFUNDED: &str = "payment.refunded";
    pub const PAYMENT_FAILED: &str = "payment.failed";

    pub const INVENTORY_RESERVED: &str = "inventory.reserved";
    pub const INVENTORY_RELEASED: &str = "inventory.released";
    pub const INVENTORY_UPDATED: &str = "inventory.updated";
    pub const INVENTORY_LOW_STOCK: &str = "inventory.low_stock";

    pub const RETURN_CREATED: &str = "return.created";
    pub const RETURN_APPROVED: &str = "return.approved";
    pub const RETURN_COMPLETED: &str = "return.completed";

    pub const CUSTOMER_CREATED: &str = "customer.created";
    pub const CUSTOMER_UPDATED: &str = "customer.updated";

    pub const SAGA_STARTED: &str = "saga.started";
    pub const SAGA_STEP_COMPLETED: &str = "saga.step_completed";
    pub const SAGA_STEP_FAILED: &str = "saga.step_failed";
    pub const SAGA_COMPENSATING: &str = "saga.compensating";
    pub const SAGA_STEP_COMPENSATED: &str = "saga.step_compensated";
    pub const SAGA_COMPENSATION_FAILED: &str = "saga.compensation_failed";
    pub const SAGA_COMPLETED: &str = "saga.completed";
    pub const SAGA_FAILED: &str = "saga.failed";
}

/// Topic receiving every event type without an explicit route.
pub const FALLBACK_TOPIC: &str = "general-events";

/// Topic receiving messages that failed consumer-side processing.
pub const DEAD_LETTER_TOPIC: &str = "dead-letter-queue";

const DEFAULT_ROUTES: &[(&str, &str)] = &[
    (event_types::SALE_CREATED, "order-events"),
    (event_types::SALE_UPDATED, "order-events"),
    (event_types::SALE_COMPLETED, "order-events"),
    (event_types::SALE_CANCELLED, "order-events"),
    (event_types::QUOTATION_CREATED, "order-events"),
    (event_types::QUOTATION_CONVERTED, "order-events"),
    (event_types::PAYMENT_RECEIVED, "payment-events"),
    (event_types::PAYMENT_REFUNDED, "payment-events"),
    (event_types::PAYMENT_FAILED, "payment-events"),
    (event_types::INVENTORY_RESERVED, "inventory-events"),
    (event_types::INVENTORY_RELEASED, "inventory-events"),
    (event_types::INVENTORY_UPDATED, "inventory-events"),
    (event_types::INVENTORY_LOW_STOCK, "inventory-events"),
    (event_types::RETURN_CREATED, "return-events"),
    (event_types::RETURN_APPROVED, "return-events"),
    (event_types::RETURN_COMPLETED, "return-events"),
    (event_types::CUSTOMER_CREATED, "customer-events"),
    (event_types::CUSTOMER_UPDATED, "customer-events"),
    (event_types::SAGA_STARTED, "saga-events"),
    (event_types::SAGA_STEP_COMPLETED, "saga-events"),
    (event_types::SAGA_STEP_FAILED, "saga-events"),
    (event_types::SAGA_COMPENSATING, "saga-events"),
    (event_types::SAGA_STEP_COMPENSATED, "saga-events"),
    (event_types::SAGA_COMPENSATION_FAILED, "saga-events"),
    (event_types::SAGA_COMPLETED, "saga-events"),
    (event_types::SAGA_FAILED, "saga-events"),
];

/// Maps event types to broker topic names.
///
/// Several event types share one topic. Unknown types route to
/// [`FALLBACK_TOPIC`]. When a prefix is set every resolved name becomes
/// `"<prefix>.<topic>"`.
#[derive(Debug, Clone)]
pub struct TopicRouter {
    routes: HashMap<String, String>,
    prefix: Option<String>,
}

impl TopicRouter {
    /// Creates a router with the default routing table and no prefix.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a router with no routes; everything goes to the fallback topic.
    pub fn empty() -> Self {
        Self {
            routes: HashMap::new(),
            prefix: None,
        }
    }

    /// Sets the environment/tenant prefix. An empty prefix means none.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.prefix = (!prefix.is_empty()).then_some(prefix);
        self
    }

    /// Adds or replaces a route.
    pub fn route(mut self, event_type: impl Into<String>, topic: impl Into<String>) -> Self {
        self.routes.insert(event_type.into(), topic.into());
        self
    }

    /// Returns the configured prefix.
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Resolves the fully qualified topic for an event type.
    pub fn resolve(&self, event_type: &str) -> String {
        let topic = self
            .routes
            .get(event_type)
            .map(String::as_str)
            .unwrap_or(FALLBACK_TOPIC);
        self.qualify(topic)
    }

    /// Applies the prefix to a bare topic name.
    pub fn qualify(&self, topic: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}.{topic}"),
            None => topic.to_string(),
        }
    }

    /// Returns the distinct qualified topics needed for a set of event types, sorted.
    pub fn topics_for<I, S>(&self, event_types: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        event_types
            .into_iter()
            .map(|event_type| self.resolve(event_type.as_ref()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Returns every qualified topic the table can resolve to, including the fallback.
    pub fn all_topics(&self) -> Vec<String> {
        self.routes
            .values()
            .map(String::as_str)
            .chain(std::iter::once(FALLBACK_TOPIC))
            .map(|topic| self.qualify(topic))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Resolves the dead-letter topic name under this router's prefix.
    pub fn dead_letter_topic(&self, name: &str) -> String {
        self.qualify(name)
    }
}

impl Default for TopicRouter {
    fn default() -> Self {
        Self {
            routes: DEFAULT_ROUTES
                .iter()
                .map(|(event_type, topic)| (event_type.to_string(), topic.to_string()))
                .collect(),
            prefix: None,
        }
    }
}
