//! Collaborator-side fallback policy for step functions.
//!
//! The saga manager never turns a failed step into a success. A collaborator
//! that can tolerate its downstream being unavailable (for example a "soft"
//! inventory reservation that proceeds with a locally generated id) wraps its
//! own execute function with [`with_fallback`], keeping that policy visible at
//! the call site.

use std::future::Future;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use crate::step::StepError;

/// Wraps `execute` so an error is replaced by `fallback(input, &error)`.
///
/// The input is cloned before `execute` runs so the fallback can build its
/// value from it. Panics are not caught here; they still fail the step.
pub fn with_fallback<T, F, Fut, G>(
    execute: F,
    fallback: G,
) -> impl Fn(T) -> BoxFuture<'static, Result<T, StepError>> + Send + Sync + 'static
where
    T: Clone + Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, StepError>> + Send + 'static,
    G: Fn(T, &StepError) -> T + Send + Sync + 'static,
{
    let fallback = Arc::new(fallback);
    move |input: T| {
        let attempt = execute(input.clone());
        let fallback = Arc::clone(&fallback);
        async move {
            match attempt.await {
                Ok(output) => Ok(output),
                Err(error) => {
                    tracing::warn!(error = %error, "step failed, continuing with fallback value");
                    Ok(fallback(input, &error))
                }
            }
        }
        .boxed()
    }
}
