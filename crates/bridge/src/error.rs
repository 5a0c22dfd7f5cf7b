use thiserror::Error;

/// Errors raised by the broker bridge and its broker adapters.
///
/// Only `connect()` and the topic administration calls surface these to
/// callers. Per-message failures on the publish and consume paths are
/// recorded in the bridge statistics instead.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Topic administration failed: {0}")]
    Admin(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
