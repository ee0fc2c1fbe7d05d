use rpc_resilience_core::{CallError, OutcomeCode, TransportError};
use rpc_resilience_retry::{run_with_retry, BackoffPolicy, RetryConfig, RetryError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn transport(code: OutcomeCode) -> CallError {
    CallError::Transport(TransportError::new(code, code.as_str()))
}

#[tokio::test(start_paused = true)]
async fn succeeds_once_the_peer_recovers() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let result = run_with_retry(
        move |attempt| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(OutcomeCode::Unknown)
                } else {
                    Ok(attempt)
                }
            }
        },
        &[OutcomeCode::Unknown],
        4,
        BackoffPolicy::Fixed(Duration::from_millis(10)),
    )
    .await;

    assert_eq!(result.unwrap(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn codes_outside_the_set_fail_immediately() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let result: Result<(), _> = run_with_retry(
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(OutcomeCode::PermissionDenied) }
        },
        &[OutcomeCode::Unknown],
        4,
        BackoffPolicy::Fixed(Duration::from_secs(1)),
    )
    .await;

    assert_eq!(result, Err(RetryError::NotRetryable(OutcomeCode::PermissionDenied)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn exhaustion_keeps_the_last_failure() {
    let result: Result<(), _> = run_with_retry(
        |attempt| async move {
            if attempt == 4 {
                Err(OutcomeCode::ResourceExhausted)
            } else {
                Err(OutcomeCode::Unknown)
            }
        },
        &[OutcomeCode::Unknown, OutcomeCode::ResourceExhausted],
        4,
        BackoffPolicy::Linear(Duration::from_millis(1)),
    )
    .await;

    let err = result.unwrap_err();
    assert!(err.is_exhausted());
    assert_eq!(*err.last(), OutcomeCode::ResourceExhausted);
}

#[tokio::test(start_paused = true)]
async fn call_errors_map_to_the_call_taxonomy() {
    let executor = RetryConfig::<CallError>::builder()
        .max_attempts(2)
        .fixed_backoff(Duration::from_millis(5))
        .retry_on_codes([OutcomeCode::Unknown])
        .build();

    let exhausted: CallError = executor
        .run(|_| async { Err::<(), _>(transport(OutcomeCode::Unknown)) })
        .await
        .unwrap_err()
        .into();
    match exhausted {
        CallError::RetriesExhausted { attempts, last } => {
            assert_eq!(attempts, 2);
            assert_eq!(last.code(), OutcomeCode::Unknown);
        }
        other => panic!("unexpected {other:?}"),
    }

    let rejected: CallError = executor
        .run(|_| async { Err::<(), _>(transport(OutcomeCode::NotFound)) })
        .await
        .unwrap_err()
        .into();
    assert_eq!(rejected, transport(OutcomeCode::NotFound));
}

#[tokio::test(start_paused = true)]
async fn local_rejections_are_never_retried() {
    let executor = RetryConfig::<CallError>::builder()
        .max_attempts(5)
        .retry_on_codes(OutcomeCode::ALL)
        .build();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let result = executor
        .run(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<(), _>(CallError::CircuitOpen {
                    name: "peer".to_string(),
                })
            }
        })
        .await;

    assert!(matches!(result, Err(RetryError::NotRetryable(CallError::CircuitOpen { .. }))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn executors_share_no_state() {
    let unary = RetryConfig::<OutcomeCode>::builder().max_attempts(4).build();
    let stream = RetryConfig::<OutcomeCode>::builder().max_attempts(2).build();

    let a: Result<(), _> = unary.run(|_| async { Err(OutcomeCode::Unknown) }).await;
    let b: Result<(), _> = stream.run(|_| async { Err(OutcomeCode::Unknown) }).await;

    assert!(matches!(a, Err(RetryError::Exhausted { attempts: 4, .. })));
    assert!(matches!(b, Err(RetryError::Exhausted { attempts: 2, .. })));
}
