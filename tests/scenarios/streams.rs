use super::{client, init_tracing};
use rpc_resilience_client::transport::methods;
use rpc_resilience_client::{CallRequest, SimulatedTransport};
use rpc_resilience_core::{CallError, OutcomeCode, TransportError};
use std::time::Duration;
use tokio::time::Instant;

fn requests(codes: &[OutcomeCode]) -> Vec<CallRequest> {
    codes
        .iter()
        .enumerate()
        .map(|(i, code)| CallRequest::new(0, 1, [*code]).with_payload(format!("r{i}")))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn server_stream_yields_three_responses_then_ends() {
    init_tracing();
    let peer = SimulatedTransport::builder()
        .response_header("x-server", "simulated")
        .build();
    let client = client(&peer);

    let outcome = client
        .server_resiliency(CallRequest::new(0, 1, [OutcomeCode::Ok]), None)
        .await;

    assert!(outcome.is_ok(), "{:?}", outcome.error);
    assert_eq!(outcome.responses.len(), 3);
    assert!(outcome.responses.iter().all(|r| r.status() == OutcomeCode::Ok));
    assert_eq!(outcome.headers.get("x-server"), Some("simulated"));
    assert_eq!(client.circuit_breaker().metrics().counters.total_successes, 1);
}

#[tokio::test(start_paused = true)]
async fn bidi_resource_exhausted_mid_stream_is_recorded_once() {
    init_tracing();
    let peer = SimulatedTransport::default();
    let client = client(&peer);

    let outcome = client
        .bidirectional_resiliency(
            requests(&[
                OutcomeCode::Ok,
                OutcomeCode::Ok,
                OutcomeCode::ResourceExhausted,
                OutcomeCode::Ok,
            ]),
            None,
        )
        .await;

    assert_eq!(outcome.responses.len(), 2);
    assert_eq!(
        outcome.error.as_ref().and_then(CallError::outcome_code),
        Some(OutcomeCode::ResourceExhausted)
    );
    // The peer stopped at the failing request; nothing after it was handled.
    assert_eq!(
        peer.observed_payloads(methods::BIDI_STREAMING),
        vec!["r0", "r1", "r2"]
    );
    assert_eq!(peer.calls(methods::BIDI_STREAMING), 1);

    let counters = client.circuit_breaker().metrics().counters;
    assert_eq!(counters.requests, 1);
    assert_eq!(counters.total_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn bidi_in_band_status_is_stream_fatal() {
    init_tracing();
    let peer = SimulatedTransport::builder().in_band_status(true).build();

    let outcome = client(&peer)
        .bidirectional_resiliency(
            requests(&[OutcomeCode::Ok, OutcomeCode::PermissionDenied, OutcomeCode::Ok]),
            None,
        )
        .await;

    assert_eq!(outcome.responses.len(), 1);
    assert_eq!(
        outcome.error.as_ref().and_then(CallError::outcome_code),
        Some(OutcomeCode::PermissionDenied)
    );
}

#[tokio::test(start_paused = true)]
async fn client_stream_returns_the_single_response() {
    init_tracing();
    let peer = SimulatedTransport::default();
    let request = CallRequest::new(2, 8, [OutcomeCode::Ok]);

    let response = client(&peer)
        .client_resiliency(vec![request; 3], Some(Duration::from_secs(60)))
        .await
        .unwrap();

    assert_eq!(response.status(), OutcomeCode::Ok);
    assert!(
        response.payload().starts_with("received 3 requests"),
        "{}",
        response.payload()
    );
    assert_eq!(peer.observed_payloads(methods::CLIENT_STREAMING).len(), 3);
}

#[tokio::test(start_paused = true)]
async fn failed_stream_open_is_retried_after_a_linear_wait() {
    init_tracing();
    let peer = SimulatedTransport::default();
    peer.fail_next_open(
        methods::SERVER_STREAMING,
        TransportError::new(OutcomeCode::Unknown, "not yet"),
    );
    let started = Instant::now();

    let outcome = client(&peer)
        .server_resiliency(
            CallRequest::new(0, 0, [OutcomeCode::Ok]),
            Some(Duration::from_secs(10)),
        )
        .await;

    assert!(outcome.is_ok(), "{:?}", outcome.error);
    assert_eq!(outcome.responses.len(), 3);
    assert_eq!(peer.calls(methods::SERVER_STREAMING), 2);
    // Default stream policy: Linear(3s), so one 3s wait before the reopen.
    assert_eq!(started.elapsed(), Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn server_stream_deadline_keeps_partial_responses() {
    init_tracing();
    let peer = SimulatedTransport::builder().stream_length(10).build();

    // Each response takes 1-2s; the default server deadline is 3s.
    let outcome = client(&peer)
        .server_resiliency(CallRequest::new(1, 2, [OutcomeCode::Ok]), None)
        .await;

    assert!(outcome.opened);
    assert!(!outcome.responses.is_empty() && outcome.responses.len() < 10);
    assert!(outcome.error.as_ref().is_some_and(CallError::is_timeout));
    assert_eq!(peer.calls(methods::SERVER_STREAMING), 1);
}
