//! Bridge configuration loaded from environment variables.

use std::time::Duration;

use event_bus::DEAD_LETTER_TOPIC;

/// Default number of messages per topic batch (1 disables batching).
pub const DEFAULT_BATCH_SIZE: usize = 1;

/// Default interval after which partial batches are flushed.
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_millis(100);

/// Shortest accepted flush interval; the flush timer needs a non-zero period.
pub const MIN_BATCH_TIMEOUT: Duration = Duration::from_millis(1);

/// Broker bridge configuration.
///
/// Reads from environment variables:
/// - `SERVICE_NAME` (default: `"unknown-service"`)
/// - `KAFKA_BROKERS`, comma separated (default: `"localhost:9092"`)
/// - `KAFKA_CLIENT_ID` (default: the service name)
/// - `KAFKA_GROUP_ID` (default: `"<service>-group"`)
/// - `KAFKA_TOPIC_PREFIX` (default: none)
/// - `KAFKA_PUBLISH_EVENTS` / `KAFKA_SUBSCRIBE_EVENTS`, comma separated event types
/// - `KAFKA_BATCH_SIZE` (default: `1`), `KAFKA_BATCH_TIMEOUT_MS` (default: `100`)
/// - `KAFKA_DLQ_ENABLED` (default: `true`)
/// - `KAFKA_SASL_USERNAME`, `KAFKA_SASL_PASSWORD`, `KAFKA_SASL_MECHANISM`,
///   `KAFKA_SECURITY_PROTOCOL` (optional)
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Identity of this process. Stamped as `source` on outbound events and
    /// used for loop prevention on inbound ones.
    pub service_name: String,
    pub brokers: Vec<String>,
    pub client_id: String,
    pub group_id: String,
    /// Environment/tenant prefix applied to every topic name.
    pub topic_prefix: Option<String>,
    /// Event types forwarded from the local bus to the broker.
    pub publish_events: Vec<String>,
    /// Event types accepted from the broker and re-emitted locally.
    pub subscribe_events: Vec<String>,
    pub batch_size: usize,
    pub batch_timeout: Duration,
    /// Whether failed inbound messages are written to the dead-letter topic.
    pub dead_letter: bool,
    /// Bare dead-letter topic name; the topic prefix is applied on use.
    pub dead_letter_topic: String,
    pub sasl_username: Option<String>,
    pub sasl_password: Option<String>,
    pub sasl_mechanism: Option<String>,
    pub security_protocol: Option<String>,
}

impl BridgeConfig {
    /// Creates a config for `service_name` with defaults for everything else.
    pub fn new(service_name: impl Into<String>) -> Self {
        let service_name = service_name.into();
        Self {
            client_id: service_name.clone(),
            group_id: format!("{service_name}-group"),
            service_name,
            brokers: vec!["localhost:9092".to_string()],
            topic_prefix: None,
            publish_events: Vec::new(),
            subscribe_events: Vec::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            batch_timeout: DEFAULT_BATCH_TIMEOUT,
            dead_letter: true,
            dead_letter_topic: DEAD_LETTER_TOPIC.to_string(),
            sasl_username: None,
            sasl_password: None,
            sasl_mechanism: None,
            security_protocol: None,
        }
    }

    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup.
    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let service_name =
            non_empty(lookup("SERVICE_NAME")).unwrap_or_else(|| "unknown-service".to_string());
        let mut config = Self::new(service_name);

        if let Some(brokers) = non_empty(lookup("KAFKA_BROKERS")) {
            config.brokers = split_list(&brokers);
        }
        if let Some(client_id) = non_empty(lookup("KAFKA_CLIENT_ID")) {
            config.client_id = client_id;
        }
        if let Some(group_id) = non_empty(lookup("KAFKA_GROUP_ID")) {
            config.group_id = group_id;
        }
        config.topic_prefix = non_empty(lookup("KAFKA_TOPIC_PREFIX"));
        config.publish_events = lookup("KAFKA_PUBLISH_EVENTS")
            .map(|v| split_list(&v))
            .unwrap_or_default();
        config.subscribe_events = lookup("KAFKA_SUBSCRIBE_EVENTS")
            .map(|v| split_list(&v))
            .unwrap_or_default();
        config.batch_size = lookup("KAFKA_BATCH_SIZE")
            .and_then(|v| v.parse().ok())
            .filter(|size| *size > 0)
            .unwrap_or(DEFAULT_BATCH_SIZE);
        config.batch_timeout = lookup("KAFKA_BATCH_TIMEOUT_MS")
            .and_then(|v| v.parse().ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_BATCH_TIMEOUT);
        config.dead_letter = lookup("KAFKA_DLQ_ENABLED")
            .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "false" | "0" | "no"))
            .unwrap_or(true);
        config.sasl_username = non_empty(lookup("KAFKA_SASL_USERNAME"));
        config.sasl_password = non_empty(lookup("KAFKA_SASL_PASSWORD"));
        config.sasl_mechanism = non_empty(lookup("KAFKA_SASL_MECHANISM"));
        config.security_protocol = non_empty(lookup("KAFKA_SECURITY_PROTOCOL"));
        config
    }

    pub fn with_brokers<I, S>(mut self, brokers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.brokers = brokers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = group_id.into();
        self
    }

    /// Sets the topic prefix. An empty prefix means none.
    pub fn with_topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.topic_prefix = (!prefix.is_empty()).then_some(prefix);
        self
    }

    pub fn publish<I, S>(mut self, event_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.publish_events
            .extend(event_types.into_iter().map(Into::into));
        self
    }

    pub fn subscribe<I, S>(mut self, event_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subscribe_events
            .extend(event_types.into_iter().map(Into::into));
        self
    }

    /// Enables per-topic batching. A size of 0 or 1 sends every message immediately.
    ///
    /// The timeout is raised to [`MIN_BATCH_TIMEOUT`] if shorter.
    pub fn with_batching(mut self, batch_size: usize, batch_timeout: Duration) -> Self {
        self.batch_size = batch_size.max(1);
        self.batch_timeout = batch_timeout.max(MIN_BATCH_TIMEOUT);
        self
    }

    pub fn with_dead_letter(mut self, enabled: bool) -> Self {
        self.dead_letter = enabled;
        self
    }

    /// Adds SASL authentication.
    pub fn with_sasl(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
        mechanism: impl Into<String>,
    ) -> Self {
        self.sasl_username = Some(username.into());
        self.sasl_password = Some(password.into());
        self.sasl_mechanism = Some(mechanism.into());
        self.security_protocol = Some("SASL_SSL".to_string());
        self
    }

    /// Returns true when outbound messages are buffered per topic.
    pub fn is_batching(&self) -> bool {
        self.batch_size > 1
    }

    /// Comma separated broker list, as broker clients expect it.
    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
