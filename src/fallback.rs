//! Substitute results for failed or rejected calls.

use crate::error::ResilienceError;
use std::fmt;
use std::sync::Arc;

type CauseFn<T, E> = dyn Fn(&ResilienceError<E>) -> T + Send + Sync;

/// What to return in place of a call that failed, timed out, or was rejected.
pub enum Fallback<T, E> {
    /// A fixed substitute, cloned for every failed call.
    Value(T),
    /// Builds the substitute from the exact error the call produced.
    FromCause(Arc<CauseFn<T, E>>),
}

impl<T, E> Fallback<T, E> {
    pub fn value(value: T) -> Self {
        Fallback::Value(value)
    }

    /// Cause-aware fallback; `f` is invoked once per failed call.
    ///
    /// ```
    /// use lifeline::{Fallback, ResilienceError};
    ///
    /// let fallback: Fallback<String, std::io::Error> = Fallback::from_cause(|cause| match cause {
    ///     ResilienceError::Timeout { .. } => "slow".to_string(),
    ///     _ => "unavailable".to_string(),
    /// });
    /// # let _ = fallback;
    /// ```
    pub fn from_cause<F>(f: F) -> Self
    where
        F: Fn(&ResilienceError<E>) -> T + Send + Sync + 'static,
    {
        Fallback::FromCause(Arc::new(f))
    }

    /// Produce the substitute for `cause`.
    pub fn recover(&self, cause: &ResilienceError<E>) -> T
    where
        T: Clone,
    {
        match self {
            Fallback::Value(value) => value.clone(),
            Fallback::FromCause(f) => f(cause),
        }
    }
}

impl<T: Clone, E> Clone for Fallback<T, E> {
    fn clone(&self) -> Self {
        match self {
            Fallback::Value(value) => Fallback::Value(value.clone()),
            Fallback::FromCause(f) => Fallback::FromCause(Arc::clone(f)),
        }
    }
}

impl<T: fmt::Debug, E> fmt::Debug for Fallback<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fallback::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Fallback::FromCause(_) => f.write_str("FromCause(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError(&'static str);

    #[test]
    fn value_is_returned_for_any_cause() {
        let fallback: Fallback<&str, TestError> = Fallback::value("Fail");
        assert_eq!(fallback.recover(&ResilienceError::Inner(TestError("x"))), "Fail");
        assert_eq!(fallback.recover(&ResilienceError::Bulkhead { in_flight: 1, max: 1 }), "Fail");
    }

    #[test]
    fn factory_sees_the_exact_cause() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let fallback: Fallback<String, TestError> = Fallback::from_cause(move |cause| {
            counter.fetch_add(1, Ordering::SeqCst);
            match cause {
                ResilienceError::Inner(TestError(msg)) => format!("failed: {msg}"),
                ResilienceError::Timeout { .. } => "timed out".to_string(),
                other => other.outcome().to_string(),
            }
        });

        assert_eq!(fallback.recover(&ResilienceError::Inner(TestError("db down"))), "failed: db down");
        assert_eq!(
            fallback.recover(&ResilienceError::Timeout {
                elapsed: Duration::from_secs(4),
                timeout: Duration::from_secs(4),
            }),
            "timed out"
        );
        assert_eq!(
            fallback.recover(&ResilienceError::RateLimited { wait: Duration::ZERO }),
            "rejected_rate_limit"
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn clones_share_the_factory() {
        let fallback: Fallback<u8, TestError> = Fallback::from_cause(|_| 7);
        let copy = fallback.clone();
        assert_eq!(copy.recover(&ResilienceError::Inner(TestError("x"))), 7);
        assert_eq!(format!("{:?}", copy), "FromCause(..)");
    }
}
