//! Saga lifecycle events emitted on the local event bus.
//!
//! Every event carries the saga's correlation id in its payload envelope, so
//! other services can join them to their own work, e.g. listen for
//! `saga.failed` to run their own compensations.

use chrono::{DateTime, Utc};
use event_bus::{TypedEvent, event_types};
use serde::{Deserialize, Serialize};

/// Emitted before the first step runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaStarted {
    pub saga: String,
    pub steps: Vec<String>,
    pub input: serde_json::Value,
    pub started_at: DateTime<Utc>,
}

/// Emitted after each successful step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepCompleted {
    pub saga: String,
    pub step: String,
    pub index: usize,
    pub output: serde_json::Value,
}

/// Emitted when a step fails (error, panic or deadline).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepFailed {
    pub saga: String,
    pub step: String,
    pub index: usize,
    pub error: String,
}

/// Emitted once when compensation begins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompensationStarted {
    pub saga: String,
    pub failed_step: String,
    /// Steps that will be compensated, in compensation (reverse) order.
    pub steps: Vec<String>,
}

/// Emitted after a compensation succeeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepCompensated {
    pub saga: String,
    pub step: String,
}

/// Emitted after a compensation fails; remaining compensations still run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompensationFailed {
    pub saga: String,
    pub step: String,
    pub error: String,
}

/// Emitted when every step succeeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaCompleted {
    pub saga: String,
    pub result: serde_json::Value,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

/// Emitted when the saga ends in failure.
///
/// `compensated` is false only for orchestrator faults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaFailed {
    pub saga: String,
    pub errors: Vec<String>,
    pub compensated: bool,
    pub failed_at: DateTime<Utc>,
}

impl TypedEvent for SagaStarted {
    const EVENT_TYPE: &'static str = event_types::SAGA_STARTED;
}

impl TypedEvent for StepCompleted {
    const EVENT_TYPE: &'static str = event_types::SAGA_STEP_COMPLETED;
}

impl TypedEvent for StepFailed {
    const EVENT_TYPE: &'static str = event_types::SAGA_STEP_FAILED;
}

impl TypedEvent for CompensationStarted {
    const EVENT_TYPE: &'static str = event_types::SAGA_COMPENSATING;
}

impl TypedEvent for StepCompensated {
    const EVENT_TYPE: &'static str = event_types::SAGA_STEP_COMPENSATED;
}

impl TypedEvent for CompensationFailed {
    const EVENT_TYPE: &'static str = event_types::SAGA_COMPENSATION_FAILED;
}

impl TypedEvent for SagaCompleted {
    const EVENT_TYPE: &'static str = event_types::SAGA_COMPLETED;
}

impl TypedEvent for SagaFailed {
    const EVENT_TYPE: &'static str = event_types::SAGA_FAILED;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_types() {
        assert_eq!(SagaStarted::EVENT_TYPE, "saga.started");
        assert_eq!(StepCompleted::EVENT_TYPE, "saga.step_completed");
        assert_eq!(StepFailed::EVENT_TYPE, "saga.step_failed");
        assert_eq!(CompensationStarted::EVENT_TYPE, "saga.compensating");
        assert_eq!(StepCompensated::EVENT_TYPE, "saga.step_compensated");
        assert_eq!(CompensationFailed::EVENT_TYPE, "saga.compensation_failed");
        assert_eq!(SagaCompleted::EVENT_TYPE, "saga.completed");
        assert_eq!(SagaFailed::EVENT_TYPE, "saga.failed");
    }

    #[test]
    fn test_saga_failed_shape() {
        let event = SagaFailed {
            saga: "create-sale".into(),
            errors: vec!["Step \"charge\" failed: declined".into()],
            compensated: true,
            failed_at: Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["saga"], "create-sale");
        assert_eq!(json["compensated"], true);
        assert_eq!(json["errors"][0], "Step \"charge\" failed: declined");
        assert!(json["failedAt"].is_string());
    }

    #[test]
    fn test_compensation_started_shape() {
        let event = CompensationStarted {
            saga: "create-sale".into(),
            failed_step: "charge".into(),
            steps: vec!["reserve".into(), "check".into()],
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["failedStep"], "charge");
        assert_eq!(json["steps"], serde_json::json!(["reserve", "check"]));
    }
}
