//! Saga steps: a name plus an execute function and an optional compensation.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use event_bus::panic_message;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;

/// Error type returned by step and compensation functions.
pub type StepError = Box<dyn std::error::Error + Send + Sync>;

/// Boxed execute function: receives the previous step's output.
pub type ExecuteFn<T> = Arc<dyn Fn(T) -> BoxFuture<'static, Result<T, StepError>> + Send + Sync>;

/// Boxed compensate function: receives the step's original input and output.
pub type CompensateFn<T> =
    Arc<dyn Fn(T, T) -> BoxFuture<'static, Result<(), StepError>> + Send + Sync>;

/// One named step of a saga.
///
/// ```ignore
/// let reserve = SagaStep::new("reserve_inventory", |order: Value| async move {
///     inventory.reserve(&order).await
/// })
/// .with_compensation(|_order, reservation| async move {
///     inventory.release(&reservation).await
/// });
/// ```
pub struct SagaStep<T> {
    name: String,
    execute: ExecuteFn<T>,
    compensate: Option<CompensateFn<T>>,
    timeout: Option<Duration>,
}

impl<T: Send + 'static> SagaStep<T> {
    /// Creates a step without compensation.
    pub fn new<F, Fut>(name: impl Into<String>, execute: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, StepError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            execute: Arc::new(move |input| execute(input).boxed()),
            compensate: None,
            timeout: None,
        }
    }

    /// Sets the compensating action. It should be idempotent.
    pub fn with_compensation<F, Fut>(mut self, compensate: F) -> Self
    where
        F: Fn(T, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), StepError>> + Send + 'static,
    {
        self.compensate = Some(Arc::new(move |input, output| {
            compensate(input, output).boxed()
        }));
        self
    }

    /// Fails the step if `execute` has not finished within `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Runs `execute`, converting errors, panics and an elapsed deadline into a message.
    pub(crate) async fn run(&self, input: T) -> Result<T, String> {
        let future = AssertUnwindSafe((self.execute)(input)).catch_unwind();
        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, future).await {
                Ok(outcome) => outcome,
                Err(_) => return Err(format!("timed out after {}ms", limit.as_millis())),
            },
            None => future.await,
        };

        match outcome {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(e.to_string()),
            Err(panic) => Err(format!("panicked: {}", panic_message(panic.as_ref()))),
        }
    }

    /// Runs the compensation, if any. `None` means the step has nothing to undo.
    pub(crate) async fn run_compensation(&self, input: T, output: T) -> Option<Result<(), String>> {
        let compensate = self.compensate.as_ref()?;
        let outcome = AssertUnwindSafe(compensate(input, output))
            .catch_unwind()
            .await;

        Some(match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(panic) => Err(format!("panicked: {}", panic_message(panic.as_ref()))),
        })
    }
}

impl<T> SagaStep<T> {
    /// The step name, unique within its saga.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true if the step has a compensating action.
    pub fn has_compensation(&self) -> bool {
        self.compensate.is_some()
    }

    /// The execution deadline, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl<T> Clone for SagaStep<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            execute: Arc::clone(&self.execute),
            compensate: self.compensate.clone(),
            timeout: self.timeout,
        }
    }
}

impl<T> std::fmt::Debug for SagaStep<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaStep")
            .field("name", &self.name)
            .field("compensable", &self.has_compensation())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_returns_output() {
        let step = SagaStep::new("double", |n: i32| async move { Ok::<_, StepError>(n * 2) });
        assert_eq!(step.run(21).await, Ok(42));
    }

    #[tokio::test]
    async fn test_run_converts_error_to_message() {
        let step = SagaStep::new("fail", |_: i32| async move {
            Err::<i32, StepError>("out of stock".into())
        });
        assert_eq!(step.run(1).await, Err("out of stock".to_string()));
    }

    #[tokio::test]
    async fn test_run_catches_panic() {
        let step = SagaStep::new("boom", |_: i32| async move {
            if true {
                panic!("kaboom");
            }
            Ok::<_, StepError>(0)
        });
        let err = step.run(1).await.unwrap_err();
        assert!(err.starts_with("panicked: kaboom"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_enforces_timeout() {
        let step = SagaStep::new("slow", |n: i32| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, StepError>(n)
        })
        .with_timeout(Duration::from_millis(250));

        assert_eq!(step.run(1).await, Err("timed out after 250ms".to_string()));
    }

    #[tokio::test]
    async fn test_compensation_absent() {
        let step = SagaStep::new("plain", |n: i32| async move { Ok::<_, StepError>(n) });
        assert!(!step.has_compensation());
        assert!(step.run_compensation(1, 1).await.is_none());
    }

    #[tokio::test]
    async fn test_compensation_receives_input_and_output() {
        let seen = Arc::new(std::sync::Mutex::new(None));
        let seen_ref = Arc::clone(&seen);
        let step = SagaStep::new("reserve", |n: i32| async move { Ok::<_, StepError>(n + 100) })
            .with_compensation(move |input, output| {
                let seen = Arc::clone(&seen_ref);
                async move {
                    *seen.lock().unwrap() = Some((input, output));
                    Ok::<(), StepError>(())
                }
            });

        assert!(step.has_compensation());
        assert_eq!(step.run_compensation(1, 101).await, Some(Ok(())));
        assert_eq!(*seen.lock().unwrap(), Some((1, 101)));
    }

    #[test]
    fn test_debug_does_not_require_debug_data() {
        struct Opaque;
        let step = SagaStep::new("opaque", |o: Opaque| async move { Ok::<_, StepError>(o) });
        let rendered = format!("{step:?}");
        assert!(rendered.contains("opaque"));
    }
}
