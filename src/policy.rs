//! Resilient call execution for one named policy.
//!
//! A call passes the bulkhead, the rate limiter and the circuit breaker, in
//! that order, then runs under the policy's timeout. Its outcome (success,
//! failure, timeout) is recorded into the breaker's window. Rejections are
//! recorded too, and never invoke the operation.
//!
//! ```
//! use lifeline::{Fallback, PolicyRegistry};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let registry = PolicyRegistry::default();
//! let guarded = registry
//!     .policy("backendA")
//!     .with_fallback(Fallback::<String, std::io::Error>::value("fallback".to_string()));
//!
//! let body = guarded
//!     .execute(|| async { Err::<String, _>(std::io::Error::other("connection refused")) })
//!     .await;
//! assert_eq!(body, "fallback");
//! # }
//! ```

use crate::circuit_breaker::CircuitState;
use crate::config::PolicyConfig;
use crate::error::{CallOutcome, ResilienceError};
use crate::fallback::Fallback;
use crate::registry::PolicyCell;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Cheap, cloneable handle to a named policy's shared state.
#[derive(Clone)]
pub struct PolicyHandle {
    cell: Arc<PolicyCell>,
}

impl fmt::Debug for PolicyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyHandle").field("name", &self.cell.name()).finish()
    }
}

fn classify<T, E>(result: &Result<T, ResilienceError<E>>) -> CallOutcome {
    match result {
        Ok(_) => CallOutcome::Success,
        Err(e) => e.outcome(),
    }
}

impl PolicyHandle {
    pub(crate) fn new(cell: Arc<PolicyCell>) -> Self {
        Self { cell }
    }

    pub fn name(&self) -> &str {
        self.cell.name()
    }

    pub fn config(&self) -> &PolicyConfig {
        self.cell.config()
    }

    pub fn state(&self) -> CircuitState {
        self.cell.circuit_state()
    }

    /// Failure fraction over the window, once `minimum_calls` outcomes exist.
    pub fn failure_rate(&self) -> Option<f64> {
        self.cell.failure_rate()
    }

    pub fn available_permits(&self) -> usize {
        self.cell.available_permits()
    }

    /// Force the breaker closed and clear its window.
    pub fn reset(&self) {
        self.cell.reset();
    }

    /// Run `operation` under this policy.
    ///
    /// Returns the operation's value, [`ResilienceError::Inner`] with its
    /// error, or the rejection/timeout that stopped it.
    pub async fn execute<T, E, Fut, Op>(&self, operation: Op) -> Result<T, ResilienceError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
        Op: FnOnce() -> Fut,
    {
        let permit = self.cell.admit::<E>()?;
        let result = self.cell.config().timeout().execute(operation).await;
        permit.complete(classify(&result));
        result
    }

    /// Like [`execute`](Self::execute), but the operation receives a token
    /// that is cancelled when the timeout fires.
    pub async fn execute_cancellable<T, E, Fut, Op>(
        &self,
        operation: Op,
    ) -> Result<T, ResilienceError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
        Op: FnOnce(CancellationToken) -> Fut,
    {
        let permit = self.cell.admit::<E>()?;
        let result = self.cell.config().timeout().execute_cancellable(operation).await;
        permit.complete(classify(&result));
        result
    }

    /// Pair this policy with a fallback so calls always yield a `T`.
    pub fn with_fallback<T, E>(&self, fallback: Fallback<T, E>) -> Guarded<T, E> {
        Guarded { handle: self.clone(), fallback }
    }
}

/// A policy plus the fallback used whenever a call does not succeed.
pub struct Guarded<T, E> {
    handle: PolicyHandle,
    fallback: Fallback<T, E>,
}

impl<T: Clone, E> Clone for Guarded<T, E> {
    fn clone(&self) -> Self {
        Self { handle: self.handle.clone(), fallback: self.fallback.clone() }
    }
}

impl<T: fmt::Debug, E> fmt::Debug for Guarded<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Guarded")
            .field("policy", &self.handle.name())
            .field("fallback", &self.fallback)
            .finish()
    }
}

impl<T: Clone, E: fmt::Display> Guarded<T, E> {
    pub fn policy(&self) -> &PolicyHandle {
        &self.handle
    }

    /// Run `operation`; any error or rejection is replaced by the fallback.
    pub async fn execute<Fut, Op>(&self, operation: Op) -> T
    where
        Fut: Future<Output = Result<T, E>>,
        Op: FnOnce() -> Fut,
    {
        match self.handle.execute(operation).await {
            Ok(value) => value,
            Err(cause) => self.recover(cause),
        }
    }

    /// Cancellation-aware variant of [`execute`](Self::execute).
    pub async fn execute_cancellable<Fut, Op>(&self, operation: Op) -> T
    where
        Fut: Future<Output = Result<T, E>>,
        Op: FnOnce(CancellationToken) -> Fut,
    {
        match self.handle.execute_cancellable(operation).await {
            Ok(value) => value,
            Err(cause) => self.recover(cause),
        }
    }

    fn recover(&self, cause: ResilienceError<E>) -> T {
        tracing::warn!(
            target: "lifeline::fallback",
            policy = %self.handle.name(),
            outcome = %cause.outcome(),
            "fallback reason was {}",
            cause
        );
        self.fallback.recover(&cause)
    }
}
