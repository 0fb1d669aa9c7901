use futures::future::join_all;
use lifeline::{
    CallOutcome, CircuitState, Fallback, ManualClock, PolicyRegistry, ResilienceError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Barrier;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
struct TestError(&'static str);

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TestError: {}", self.0)
    }
}

impl std::error::Error for TestError {}

#[tokio::test]
async fn success_then_two_failures_opens_with_defaults() {
    let registry = PolicyRegistry::default();
    let handle = registry.policy("backendA");
    let cfg = handle.config().circuit_breaker();
    assert_eq!(
        (cfg.minimum_calls(), cfg.sliding_window_size(), cfg.failure_rate_threshold()),
        (3, 10, 20.0)
    );

    handle.execute(|| async { Ok::<_, TestError>(()) }).await.unwrap();
    for _ in 0..2 {
        let err = handle.execute(|| async { Err::<(), _>(TestError("down")) }).await.unwrap_err();
        assert!(err.is_inner());
    }
    assert_eq!(handle.state(), CircuitState::Open);

    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let err = handle
        .execute(|| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, TestError>(())
        })
        .await
        .unwrap_err();
    assert_eq!(err.outcome(), CallOutcome::RejectedCircuitOpen);
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exactly_one_probe_after_cool_down() {
    let clock = ManualClock::new();
    let registry = PolicyRegistry::builder()
        .policy("p", |b| {
            b.minimum_calls(1)
                .sliding_window_size(1)
                .wait_duration_in_open_state(Duration::from_millis(100))
                .timeout_duration(Duration::from_secs(10))
        })
        .clock(clock.clone())
        .build()
        .unwrap();
    let handle = registry.policy("p");

    let _ = handle.execute(|| async { Err::<(), _>(TestError("down")) }).await;
    assert_eq!(handle.state(), CircuitState::Open);
    clock.advance(Duration::from_millis(100));

    let callers = 8;
    let barrier = Arc::new(Barrier::new(callers));
    let gate = CancellationToken::new();
    let runs = Arc::new(AtomicUsize::new(0));
    let rejected = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..callers)
        .map(|_| {
            let handle = handle.clone();
            let barrier = barrier.clone();
            let gate = gate.clone();
            let runs = runs.clone();
            let rejected = rejected.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                let result = handle
                    .execute(|| async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        gate.cancelled().await;
                        Ok::<_, TestError>(())
                    })
                    .await;
                if let Err(e) = &result {
                    assert!(e.is_circuit_open(), "unexpected error: {e}");
                    rejected.fetch_add(1, Ordering::SeqCst);
                }
                result
            })
        })
        .collect();

    tokio::time::timeout(Duration::from_secs(5), async {
        while rejected.load(Ordering::SeqCst) < callers - 1 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("all but one caller rejected while the probe is in flight");
    assert_eq!(handle.state(), CircuitState::HalfOpen);

    gate.cancel();
    let results = join_all(tasks).await;
    let ok = results.into_iter().filter(|r| matches!(r, Ok(Ok(())))).count();
    assert_eq!(ok, 1);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(handle.state(), CircuitState::Closed);
}

#[tokio::test]
async fn bulkhead_of_one_rejects_concurrent_call() {
    let registry = PolicyRegistry::builder()
        .policy("backendA", |b| b.bulkhead_max_concurrent(1))
        .build()
        .unwrap();
    let handle = registry.policy("backendA");
    let gate = CancellationToken::new();

    let holder = {
        let handle = handle.clone();
        let gate = gate.clone();
        tokio::spawn(async move {
            handle
                .execute(|| async move {
                    gate.cancelled().await;
                    Ok::<_, TestError>("first")
                })
                .await
        })
    };
    while handle.available_permits() > 0 {
        tokio::task::yield_now().await;
    }

    let err = handle.execute(|| async { Ok::<_, TestError>("second") }).await.unwrap_err();
    assert_eq!(err.bulkhead_capacity(), Some((1, 1)));

    gate.cancel();
    assert_eq!(holder.await.unwrap().unwrap(), "first");
    assert_eq!(handle.execute(|| async { Ok::<_, TestError>("third") }).await.unwrap(), "third");
}

#[tokio::test(start_paused = true)]
async fn rate_limit_refills_after_period_rollover() {
    let registry = PolicyRegistry::builder()
        .policy("rateA", |b| b.rate_limit(1, Duration::from_secs(1)))
        .build()
        .unwrap();
    let handle = registry.policy("rateA");

    assert!(handle.execute(|| async { Ok::<_, TestError>(()) }).await.is_ok());
    let err = handle.execute(|| async { Ok::<_, TestError>(()) }).await.unwrap_err();
    assert!(err.is_rate_limited());

    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(handle.execute(|| async { Ok::<_, TestError>(()) }).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn late_success_counts_as_timeout() {
    let registry = PolicyRegistry::builder()
        .policy("slow", |b| b.timeout_duration(Duration::from_millis(50)).minimum_calls(1))
        .build()
        .unwrap();
    let handle = registry.policy("slow");

    let err = handle
        .execute(|| async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, TestError>(42)
        })
        .await
        .unwrap_err();
    assert_eq!(err.outcome(), CallOutcome::Timeout);
    assert_eq!(handle.failure_rate(), Some(1.0));
    assert_eq!(handle.state(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn fallback_factory_receives_the_exact_cause() {
    let registry = PolicyRegistry::builder()
        .policy("backendB", |b| b.timeout_duration(Duration::from_millis(20)))
        .build()
        .unwrap();
    let seen: Arc<Mutex<Vec<CallOutcome>>> = Arc::default();
    let record = seen.clone();
    let guarded = registry.policy("backendB").with_fallback(Fallback::from_cause(
        move |cause: &ResilienceError<TestError>| {
            record.lock().unwrap().push(cause.outcome());
            match cause {
                ResilienceError::Inner(e) => format!("inner {}", e.0),
                other => other.outcome().to_string(),
            }
        },
    ));

    let slow = guarded
        .execute(|| async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok("late".to_string())
        })
        .await;
    let broken = guarded.execute(|| async { Err(TestError("refused")) }).await;

    assert_eq!(slow, "timeout");
    assert_eq!(broken, "inner refused");
    assert_eq!(*seen.lock().unwrap(), vec![CallOutcome::Timeout, CallOutcome::Failure]);
}

#[tokio::test]
async fn static_fallback_for_rejections() {
    let registry = PolicyRegistry::builder()
        .policy("rateA", |b| b.rate_limit(1, Duration::from_secs(60)))
        .build()
        .unwrap();
    let guarded = registry.policy("rateA").with_fallback(Fallback::<_, TestError>::value("Fail"));

    assert_eq!(guarded.execute(|| async { Ok("ok") }).await, "ok");
    assert_eq!(guarded.execute(|| async { Ok("ok") }).await, "Fail");
}

#[tokio::test]
async fn named_and_default_policies_are_independent() {
    let registry = PolicyRegistry::builder()
        .policy("fragile", |b| b.minimum_calls(1).sliding_window_size(1))
        .build()
        .unwrap();
    let fragile = registry.policy("fragile");
    let sturdy = registry.policy("sturdy");

    let _ = fragile.execute(|| async { Err::<(), _>(TestError("down")) }).await;
    assert_eq!(fragile.state(), CircuitState::Open);

    assert!(sturdy.execute(|| async { Ok::<_, TestError>(()) }).await.is_ok());
    assert_eq!(sturdy.state(), CircuitState::Closed);
    assert_eq!(sturdy.config(), registry.config_for(lifeline::DEFAULT_POLICY));

    // Same name, same state.
    assert_eq!(registry.policy("fragile").state(), CircuitState::Open);
    registry.reset("fragile").unwrap();
    assert_eq!(fragile.state(), CircuitState::Closed);
}

#[tokio::test]
async fn permits_are_returned_on_every_path() {
    let registry = PolicyRegistry::builder()
        .policy("p", |b| b.bulkhead_max_concurrent(4).minimum_calls(10).sliding_window_size(10))
        .build()
        .unwrap();
    let handle = registry.policy("p");

    let calls = (0..4u8).map(|i| {
        let handle = handle.clone();
        async move {
            handle
                .execute(|| async move {
                    if i % 2 == 0 {
                        Ok(i)
                    } else {
                        Err(TestError("odd"))
                    }
                })
                .await
        }
    });
    let results = join_all(calls).await;
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 2);
    assert_eq!(handle.available_permits(), 4);
}
