//! Per-saga execution state, owned and mutated only by its `SagaManager`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::CorrelationId;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};
use crate::state::SagaStatus;
use crate::step::SagaStep;

/// The recorded input and output of a step that succeeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult<T> {
    pub input: T,
    pub output: T,
}

/// Execution state of one saga.
///
/// Callers only ever see clones (via [`SagaManager::context`](crate::SagaManager::context)),
/// never the live context.
#[derive(Debug, Clone)]
pub struct SagaContext<T> {
    correlation_id: CorrelationId,
    status: SagaStatus,
    current_step: usize,
    steps: Vec<SagaStep<T>>,
    results: HashMap<String, StepResult<T>>,
    errors: Vec<String>,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl<T> SagaContext<T> {
    pub(crate) fn new(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            status: SagaStatus::Pending,
            current_step: 0,
            steps: Vec::new(),
            results: HashMap::new(),
            errors: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// The correlation id stamped on every lifecycle event.
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Current status.
    pub fn status(&self) -> SagaStatus {
        self.status
    }

    /// Number of steps that have succeeded in the current run.
    pub fn current_step(&self) -> usize {
        self.current_step
    }

    /// Registered steps in execution order.
    pub fn steps(&self) -> &[SagaStep<T>] {
        &self.steps
    }

    /// Registered step names in execution order.
    pub fn step_names(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.name().to_string()).collect()
    }

    /// Results of succeeded steps keyed by step name.
    pub fn results(&self) -> &HashMap<String, StepResult<T>> {
        &self.results
    }

    /// Result of one step, if it succeeded.
    pub fn result(&self, step_name: &str) -> Option<&StepResult<T>> {
        self.results.get(step_name)
    }

    /// Step failure, compensation failure and fault messages, in order.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub(crate) fn has_step(&self, name: &str) -> bool {
        self.steps.iter().any(|s| s.name() == name)
    }

    pub(crate) fn push_step(&mut self, step: SagaStep<T>) {
        self.steps.push(step);
    }

    fn transition(&mut self, next: SagaStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(SagaError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub(crate) fn begin(&mut self) -> Result<()> {
        self.transition(SagaStatus::Running)?;
        self.current_step = 0;
        self.started_at = Utc::now();
        self.completed_at = None;
        Ok(())
    }

    pub(crate) fn record_success(&mut self, step_name: &str, input: T, output: T) {
        self.results
            .insert(step_name.to_string(), StepResult { input, output });
        self.current_step += 1;
    }

    pub(crate) fn record_error(&mut self, message: String) {
        self.errors.push(message);
    }

    pub(crate) fn begin_compensation(&mut self) -> Result<()> {
        self.transition(SagaStatus::Compensating)
    }

    pub(crate) fn complete(&mut self) -> Result<()> {
        self.transition(SagaStatus::Completed)?;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub(crate) fn fail(&mut self) -> Result<()> {
        self.transition(SagaStatus::Failed)?;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Ends the run as `Failed` from whatever status it reached.
    pub(crate) fn abort(&mut self) {
        self.status = SagaStatus::Failed;
        self.completed_at = Some(Utc::now());
    }
}
