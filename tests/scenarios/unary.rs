use super::{client, init_tracing};
use rpc_resilience_client::transport::methods;
use rpc_resilience_client::{
    BackoffSpec, CallRequest, PolicyConfig, ResiliencyClient, RetryPolicyConfig,
    SimulatedTransport,
};
use rpc_resilience_core::{CallError, OutcomeCode, TransportError};
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn unary_ok_within_its_timeout() {
    init_tracing();
    let peer = SimulatedTransport::default();
    let started = Instant::now();

    let response = client(&peer)
        .unary_resiliency(
            CallRequest::new(0, 5, [OutcomeCode::Ok]),
            Some(Duration::from_secs(5)),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), OutcomeCode::Ok);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(peer.calls(methods::UNARY), 1);
}

#[tokio::test(start_paused = true)]
async fn unary_default_retry_waits_exponentially() {
    init_tracing();
    let peer = SimulatedTransport::default();
    for _ in 0..3 {
        peer.fail_next_open(methods::UNARY, TransportError::new(OutcomeCode::Unknown, "flaky"));
    }
    let started = Instant::now();

    // Default unary policy: 4 attempts, Exponential(2s), waits 2s + 4s + 8s.
    let response = client(&peer)
        .unary_resiliency(
            CallRequest::new(0, 0, [OutcomeCode::Ok]),
            Some(Duration::from_secs(30)),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), OutcomeCode::Ok);
    assert_eq!(peer.calls(methods::UNARY), 4);
    assert_eq!(started.elapsed(), Duration::from_secs(14));
}

#[tokio::test(start_paused = true)]
async fn unary_deadline_cuts_retries_short() {
    init_tracing();
    let peer = SimulatedTransport::default();
    for _ in 0..4 {
        peer.fail_next_open(methods::UNARY, TransportError::new(OutcomeCode::Unknown, "flaky"));
    }
    let started = Instant::now();

    // The default 5s deadline expires during the 4s wait before attempt 3.
    let error = client(&peer)
        .unary_resiliency(CallRequest::new(0, 0, [OutcomeCode::Ok]), None)
        .await
        .unwrap_err();

    assert_eq!(
        error,
        CallError::DeadlineExceeded {
            after: Duration::from_secs(5)
        }
    );
    assert_eq!(started.elapsed(), Duration::from_secs(5));
    assert_eq!(peer.calls(methods::UNARY), 2);
}

#[tokio::test(start_paused = true)]
async fn unary_non_retryable_code_is_returned_at_once() {
    init_tracing();
    let peer = SimulatedTransport::default();

    let error = client(&peer)
        .unary_resiliency(CallRequest::new(0, 0, [OutcomeCode::AlreadyExists]), None)
        .await
        .unwrap_err();

    assert_eq!(error.outcome_code(), Some(OutcomeCode::AlreadyExists));
    assert!(!error.is_retries_exhausted());
    assert_eq!(peer.calls(methods::UNARY), 1);
}

#[tokio::test(start_paused = true)]
async fn unary_policy_from_toml_drives_retries() {
    init_tracing();
    let policy = PolicyConfig::from_toml_str(
        r#"
        [unary_retry]
        max_attempts = 2
        retryable_codes = ["UNKNOWN", "NOT_FOUND"]
        backoff = { kind = "fixed", delay = 0.25 }
        "#,
    )
    .unwrap();
    assert_eq!(
        policy.unary_retry,
        RetryPolicyConfig::new(2, BackoffSpec::Fixed {
            delay: Duration::from_millis(250)
        })
        .with_codes([OutcomeCode::Unknown, OutcomeCode::NotFound])
    );
    let peer = SimulatedTransport::default();
    let client = ResiliencyClient::builder(peer.clone())
        .policy(policy)
        .build()
        .unwrap();

    let error = client
        .unary_resiliency(CallRequest::new(0, 0, [OutcomeCode::NotFound]), None)
        .await
        .unwrap_err();

    assert!(matches!(error, CallError::RetriesExhausted { attempts: 2, .. }));
    assert_eq!(peer.calls(methods::UNARY), 2);
}
