//! Saga manager: runs steps in order and compensates in reverse on failure.

use std::panic::AssertUnwindSafe;
use std::time::Instant;

use chrono::Utc;
use common::CorrelationId;
use event_bus::{LocalEventBus, TypedEvent, panic_message};
use futures_util::FutureExt;
use serde::Serialize;

use crate::context::SagaContext;
use crate::error::{Result, SagaError};
use crate::events::{
    CompensationFailed, CompensationStarted, SagaCompleted, SagaFailed, SagaStarted,
    StepCompensated, StepCompleted, StepFailed,
};
use crate::state::SagaStatus;
use crate::step::SagaStep;

/// Outcome of [`SagaManager::execute`].
#[derive(Debug, Clone, PartialEq)]
pub struct SagaResult<T> {
    pub success: bool,
    /// Output of the last step (or the input, for a saga without steps).
    pub data: Option<T>,
    pub errors: Vec<String>,
    /// True when a step failed and compensation ran. False on success and on
    /// orchestrator faults, where no compensation is attempted.
    pub compensated: bool,
}

impl<T> SagaResult<T> {
    fn succeeded(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            errors: Vec::new(),
            compensated: false,
        }
    }

    fn failed(errors: Vec<String>, compensated: bool) -> Self {
        Self {
            success: false,
            data: None,
            errors,
            compensated,
        }
    }
}

/// Orchestrates a fixed list of steps with reverse-order compensation.
///
/// Each step receives the previous step's output; the first receives the
/// input passed to [`execute`](Self::execute). Lifecycle events are emitted
/// on the injected bus under the saga's correlation id, and a broker bridge
/// listening on that bus forwards them to other services.
///
/// `execute` takes `&mut self`, so one manager never runs twice concurrently.
/// Calling `execute` again on the same manager reuses the same context
/// (results and errors accumulate); build a new manager per operation.
pub struct SagaManager<T = serde_json::Value> {
    name: String,
    bus: LocalEventBus,
    context: SagaContext<T>,
}

impl<T> SagaManager<T>
where
    T: Clone + Serialize + Send + Sync + 'static,
{
    /// Creates a manager with a generated correlation id.
    pub fn new(name: impl Into<String>, bus: LocalEventBus) -> Self {
        Self::with_correlation_id(name, bus, CorrelationId::new())
    }

    /// Creates a manager joined to an existing correlation id.
    pub fn with_correlation_id(
        name: impl Into<String>,
        bus: LocalEventBus,
        correlation_id: CorrelationId,
    ) -> Self {
        Self {
            name: name.into(),
            bus,
            context: SagaContext::new(correlation_id),
        }
    }

    /// Starts a builder.
    pub fn builder(name: impl Into<String>, bus: LocalEventBus) -> SagaBuilder<T> {
        SagaBuilder {
            name: name.into(),
            bus,
            correlation_id: None,
            steps: Vec::new(),
        }
    }

    /// Appends a step. Names must be unique within the saga.
    pub fn add_step(&mut self, step: SagaStep<T>) -> Result<&mut Self> {
        if self.context.has_step(step.name()) {
            return Err(SagaError::DuplicateStep(step.name().to_string()));
        }
        self.context.push_step(step);
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        self.context.correlation_id()
    }

    pub fn status(&self) -> SagaStatus {
        self.context.status()
    }

    /// Returns a detached copy of the context.
    pub fn context(&self) -> SagaContext<T> {
        self.context.clone()
    }

    /// Runs the saga to completion.
    ///
    /// Never returns an error: step failures, compensation failures and
    /// orchestrator faults are all reported through the [`SagaResult`].
    #[tracing::instrument(
        skip(self, input),
        fields(saga = %self.name, correlation_id = %self.context.correlation_id())
    )]
    pub async fn execute(&mut self, input: T) -> SagaResult<T> {
        metrics::counter!("saga_executions_total").increment(1);
        let started = Instant::now();

        let outcome = AssertUnwindSafe(self.run(input)).catch_unwind().await;
        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(fault)) => self.abort(fault),
            Err(panic) => self.abort(SagaError::Fault(panic_message(panic.as_ref()))),
        };

        metrics::histogram!("saga_duration_seconds").record(started.elapsed().as_secs_f64());
        result
    }

    async fn run(&mut self, input: T) -> Result<SagaResult<T>> {
        let started = Instant::now();
        if self.context.status().is_terminal() {
            tracing::warn!(previous = %self.context.status(), "re-executing a finished saga");
        }
        self.context.begin()?;
        self.emit(&SagaStarted {
            saga: self.name.clone(),
            steps: self.context.step_names(),
            input: serde_json::to_value(&input)?,
            started_at: self.context.started_at(),
        })?;
        tracing::info!(steps = self.context.steps().len(), "saga started");

        let steps = self.context.steps().to_vec();
        let mut current = input;

        for (index, step) in steps.iter().enumerate() {
            tracing::debug!(step = step.name(), index, "saga step started");

            match step.run(current.clone()).await {
                Ok(output) => {
                    self.context
                        .record_success(step.name(), current, output.clone());
                    self.emit(&StepCompleted {
                        saga: self.name.clone(),
                        step: step.name().to_string(),
                        index,
                        output: serde_json::to_value(&output)?,
                    })?;
                    current = output;
                }
                Err(message) => {
                    let error = format!("Step \"{}\" failed: {}", step.name(), message);
                    tracing::warn!(step = step.name(), index, error = %message, "saga step failed");
                    self.context.record_error(error);
                    self.emit(&StepFailed {
                        saga: self.name.clone(),
                        step: step.name().to_string(),
                        index,
                        error: message,
                    })?;

                    self.compensate(step.name()).await?;

                    self.context.fail()?;
                    self.emit(&SagaFailed {
                        saga: self.name.clone(),
                        errors: self.context.errors().to_vec(),
                        compensated: true,
                        failed_at: Utc::now(),
                    })?;
                    metrics::counter!("saga_failed_total").increment(1);
                    tracing::warn!(failed_step = step.name(), "saga failed");

                    return Ok(SagaResult::failed(self.context.errors().to_vec(), true));
                }
            }
        }

        self.context.complete()?;
        self.emit(&SagaCompleted {
            saga: self.name.clone(),
            result: serde_json::to_value(&current)?,
            duration_ms: started.elapsed().as_millis() as u64,
            completed_at: Utc::now(),
        })?;
        metrics::counter!("saga_completed_total").increment(1);
        tracing::info!("saga completed successfully");

        Ok(SagaResult::succeeded(current))
    }

    /// Compensates every step that succeeded in this run, in reverse order.
    ///
    /// Compensation is best effort: a failing compensation is recorded and the
    /// remaining ones still run.
    async fn compensate(&mut self, failed_step: &str) -> Result<()> {
        self.context.begin_compensation()?;

        let completed: Vec<_> = self.context.steps()[..self.context.current_step()]
            .iter()
            .rev()
            .filter_map(|step| {
                self.context
                    .result(step.name())
                    .map(|result| (step.clone(), result.clone()))
            })
            .collect();

        self.emit(&CompensationStarted {
            saga: self.name.clone(),
            failed_step: failed_step.to_string(),
            steps: completed
                .iter()
                .filter(|(step, _)| step.has_compensation())
                .map(|(step, _)| step.name().to_string())
                .collect(),
        })?;
        metrics::counter!("saga_compensations_total").increment(1);
        tracing::info!(failed_step, steps = completed.len(), "compensating saga");

        for (step, result) in completed {
            match step.run_compensation(result.input, result.output).await {
                None => {}
                Some(Ok(())) => {
                    tracing::debug!(step = step.name(), "step compensated");
                    self.emit(&StepCompensated {
                        saga: self.name.clone(),
                        step: step.name().to_string(),
                    })?;
                }
                Some(Err(message)) => {
                    tracing::error!(step = step.name(), error = %message, "compensation failed");
                    self.context.record_error(format!(
                        "Compensation for \"{}\" failed: {}",
                        step.name(),
                        message
                    ));
                    self.emit(&CompensationFailed {
                        saga: self.name.clone(),
                        step: step.name().to_string(),
                        error: message,
                    })?;
                }
            }
        }

        Ok(())
    }

    /// Records an orchestrator fault. No compensation is attempted.
    fn abort(&mut self, fault: SagaError) -> SagaResult<T> {
        let error = format!("Saga \"{}\" aborted: {}", self.name, fault);
        tracing::error!(error = %fault, "saga aborted by orchestrator fault");
        self.context.record_error(error);
        self.context.abort();
        metrics::counter!("saga_faults_total").increment(1);

        let failed = SagaFailed {
            saga: self.name.clone(),
            errors: self.context.errors().to_vec(),
            compensated: false,
            failed_at: Utc::now(),
        };
        if let Err(e) = self.emit(&failed) {
            tracing::error!(error = %e, "failed to emit saga.failed after fault");
        }

        SagaResult::failed(self.context.errors().to_vec(), false)
    }

    fn emit<E: TypedEvent>(&self, event: &E) -> Result<()> {
        self.bus
            .emit_typed(event, Some(self.context.correlation_id().clone()))?;
        Ok(())
    }
}

/// Builder for [`SagaManager`].
pub struct SagaBuilder<T> {
    name: String,
    bus: LocalEventBus,
    correlation_id: Option<CorrelationId>,
    steps: Vec<SagaStep<T>>,
}

impl<T> SagaBuilder<T>
where
    T: Clone + Serialize + Send + Sync + 'static,
{
    /// Joins the saga to an existing correlation id.
    pub fn correlation_id(mut self, correlation_id: impl Into<CorrelationId>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Appends a step.
    pub fn step(mut self, step: SagaStep<T>) -> Self {
        self.steps.push(step);
        self
    }

    /// Builds the manager, rejecting duplicate step names.
    pub fn build(self) -> Result<SagaManager<T>> {
        let mut manager = SagaManager::with_correlation_id(
            self.name,
            self.bus,
            self.correlation_id.unwrap_or_default(),
        );
        for step in self.steps {
            manager.add_step(step)?;
        }
        Ok(manager)
    }
}
