use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when interacting with the local event bus.
#[derive(Debug, Error)]
pub enum EventBusError {
    /// No matching event was emitted before the deadline.
    #[error("Timed out after {timeout:?} waiting for event '{event_type}'")]
    Timeout {
        event_type: String,
        timeout: Duration,
    },

    /// A payload could not be converted to or from JSON.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for event bus operations.
pub type Result<T> = std::result::Result<T, EventBusError>;
