//! Time-bounded execution.
//!
//! Cancellation is advisory. When the deadline fires the in-flight future is
//! dropped, which stops it at its next suspension point; work it handed off
//! elsewhere (a spawned task, a blocking thread) keeps running unless it
//! watches the [`CancellationToken`] given out by
//! [`TimeoutPolicy::execute_cancellable`]. Its eventual result is discarded.

use crate::error::{ConfigError, ResilienceError};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    duration: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self { duration: Duration::from_secs(4) }
    }
}

impl TimeoutPolicy {
    /// Create a timeout policy; the duration must be non-zero.
    pub fn new(duration: Duration) -> Result<Self, ConfigError> {
        if duration.is_zero() {
            return Err(ConfigError::ZeroDuration { field: "timeout_duration" });
        }
        Ok(Self { duration })
    }

    pub(crate) fn from_validated(duration: Duration) -> Self {
        Self { duration }
    }

    /// Inspect the configured timeout duration.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Run `operation`, failing with [`ResilienceError::Timeout`] if it has not
    /// completed within the configured duration, whatever it would have returned.
    pub async fn execute<T, E, Fut, Op>(&self, operation: Op) -> Result<T, ResilienceError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
        Op: FnOnce() -> Fut,
    {
        let start = Instant::now();

        match tokio::time::timeout(self.duration, operation()).await {
            Ok(result) => result.map_err(ResilienceError::Inner),
            Err(_) => {
                let elapsed = start.elapsed();
                Err(ResilienceError::Timeout { elapsed, timeout: self.duration })
            }
        }
    }

    /// Like [`execute`](Self::execute), but hands the operation a token that is
    /// cancelled when the deadline fires.
    pub async fn execute_cancellable<T, E, Fut, Op>(
        &self,
        operation: Op,
    ) -> Result<T, ResilienceError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
        Op: FnOnce(CancellationToken) -> Fut,
    {
        let token = CancellationToken::new();
        let result = self.execute(|| operation(token.clone())).await;
        if result.as_ref().is_err_and(ResilienceError::is_timeout) {
            token.cancel();
            tracing::debug!(
                target: "lifeline::timeout",
                timeout = ?self.duration,
                "deadline elapsed; cancellation signalled"
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError(String);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "TestError: {}", self.0)
        }
    }

    impl std::error::Error for TestError {}

    #[test]
    fn rejects_zero_duration() {
        assert_eq!(
            TimeoutPolicy::new(Duration::ZERO).unwrap_err(),
            ConfigError::ZeroDuration { field: "timeout_duration" }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_completes_before_timeout() {
        let timeout = TimeoutPolicy::new(Duration::from_millis(100)).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        let result = timeout
            .execute(|| async move {
                counter_clone.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok::<_, TestError>(42)
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn late_success_is_still_a_timeout() {
        let timeout = TimeoutPolicy::new(Duration::from_millis(50)).unwrap();

        let result = timeout
            .execute(|| async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<_, TestError>(42)
            })
            .await;

        match result.unwrap_err() {
            ResilienceError::Timeout { elapsed, timeout } => {
                assert_eq!(timeout, Duration::from_millis(50));
                assert!(elapsed >= timeout, "elapsed time should be at least the timeout");
            }
            e => panic!("Expected Timeout error, got {:?}", e),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_propagates_operation_errors() {
        let timeout = TimeoutPolicy::new(Duration::from_secs(1)).unwrap();

        let result = timeout
            .execute(|| async { Err::<(), _>(TestError("operation failed".to_string())) })
            .await;

        match result.unwrap_err() {
            ResilienceError::Inner(e) => assert_eq!(e.0, "operation failed"),
            e => panic!("Expected Inner error, got {:?}", e),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn token_is_cancelled_only_on_timeout() {
        let timeout = TimeoutPolicy::new(Duration::from_millis(20)).unwrap();
        let seen = Arc::new(std::sync::Mutex::new(None::<CancellationToken>));

        let captured = seen.clone();
        let ok = timeout
            .execute_cancellable(|token| async move {
                *captured.lock().unwrap() = Some(token);
                Ok::<_, TestError>(())
            })
            .await;
        assert!(ok.is_ok());
        assert!(!seen.lock().unwrap().as_ref().unwrap().is_cancelled());

        let captured = seen.clone();
        let late = timeout
            .execute_cancellable(|token| async move {
                *captured.lock().unwrap() = Some(token);
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, TestError>(())
            })
            .await;
        assert!(late.unwrap_err().is_timeout());
        assert!(seen.lock().unwrap().as_ref().unwrap().is_cancelled());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn blocking_work_observes_cancellation() {
        let timeout = TimeoutPolicy::new(Duration::from_millis(30)).unwrap();
        let stopped = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();

        let flag = stopped.clone();
        let result = timeout
            .execute_cancellable(move |token| async move {
                let worker = tokio::task::spawn_blocking(move || {
                    while !token.is_cancelled() {
                        std::thread::sleep(Duration::from_millis(2));
                    }
                    flag.store(true, Ordering::SeqCst);
                    let _ = done_tx.send(());
                });
                worker.await.map_err(|e| TestError(e.to_string()))
            })
            .await;

        assert!(result.unwrap_err().is_timeout());
        tokio::time::timeout(Duration::from_secs(5), done_rx)
            .await
            .expect("blocking worker should stop after cancellation")
            .expect("worker signalled");
        assert!(stopped.load(Ordering::SeqCst));
    }
}
