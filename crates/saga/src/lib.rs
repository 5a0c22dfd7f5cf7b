//! Saga orchestration for multi-step distributed operations.
//!
//! A [`SagaManager`] runs an ordered list of [`SagaStep`]s, feeding each
//! step the previous step's output. When a step fails, every step that
//! already succeeded is compensated in reverse order, and the caller gets a
//! [`SagaResult`] describing what happened. Step failures never escape
//! `execute` as errors.
//!
//! Lifecycle events (`saga.started`, `saga.completed`, `saga.failed`, ...)
//! are emitted on the injected [`LocalEventBus`](event_bus::LocalEventBus)
//! under the saga's correlation id.

pub mod context;
pub mod error;
pub mod events;
pub mod fallback;
pub mod manager;
pub mod state;
pub mod step;

pub use context::{SagaContext, StepResult};
pub use error::{Result, SagaError};
pub use events::{
    CompensationFailed, CompensationStarted, SagaCompleted, SagaFailed, SagaStarted,
    StepCompensated, StepCompleted, StepFailed,
};
pub use fallback::with_fallback;
pub use manager::{SagaBuilder, SagaManager, SagaResult};
pub use state::SagaStatus;
pub use step::{CompensateFn, ExecuteFn, SagaStep, StepError};
