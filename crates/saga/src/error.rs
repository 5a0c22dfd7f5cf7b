//! Saga error types.

use event_bus::EventBusError;
use thiserror::Error;

use crate::state::SagaStatus;

/// Errors raised by the saga orchestrator itself.
///
/// Business failures of individual steps or compensations are never
/// returned as `SagaError`; they are recorded in the [`SagaResult`](crate::SagaResult).
#[derive(Debug, Error)]
pub enum SagaError {
    /// Two steps were registered under the same name.
    #[error("Duplicate step name: {0}")]
    DuplicateStep(String),

    /// Step input or output could not be serialized for a lifecycle event.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A lifecycle event could not be emitted.
    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    /// The orchestrator attempted a status change the lifecycle forbids.
    #[error("Invalid saga transition from {from} to {to}")]
    InvalidTransition { from: SagaStatus, to: SagaStatus },

    /// The orchestration loop itself failed (e.g. a panic outside any step).
    #[error("Orchestrator fault: {0}")]
    Fault(String),
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
