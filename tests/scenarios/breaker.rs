use super::init_tracing;
use rpc_resilience_circuitbreaker::{CircuitBreakerConfig, CircuitState};
use rpc_resilience_client::transport::methods;
use rpc_resilience_client::{
    BreakerPolicy, CallRequest, PolicyConfig, ResiliencyClient, SimulatedTransport,
};
use rpc_resilience_core::{CallError, OutcomeCode};
use std::time::Duration;

fn tripping_client(peer: &SimulatedTransport) -> ResiliencyClient {
    ResiliencyClient::builder(peer.clone())
        .policy(PolicyConfig {
            circuit_breaker: BreakerPolicy {
                minimum_request_volume: 2,
                open_duration: Duration::from_secs(10),
                ..BreakerPolicy::default()
            },
            ..PolicyConfig::default()
        })
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn breaker_shared_by_every_call_shape() {
    init_tracing();
    let peer = SimulatedTransport::default();
    let client = tripping_client(&peer);

    for _ in 0..2 {
        let error = client
            .unary_resiliency(CallRequest::new(0, 0, [OutcomeCode::NotFound]), None)
            .await
            .unwrap_err();
        assert_eq!(error.outcome_code(), Some(OutcomeCode::NotFound));
    }
    assert_eq!(client.circuit_breaker().state(), CircuitState::Open);

    let error = client
        .unary_resiliency(CallRequest::new(0, 0, [OutcomeCode::Ok]), None)
        .await
        .unwrap_err();
    assert_eq!(
        error,
        CallError::CircuitOpen {
            name: "resiliency".to_string()
        }
    );

    let outcome = client
        .server_resiliency(CallRequest::new(0, 0, [OutcomeCode::Ok]), None)
        .await;
    assert!(outcome.error.as_ref().is_some_and(CallError::is_circuit_open));
    assert!(!outcome.opened);

    assert_eq!(peer.calls(methods::UNARY), 2);
    assert_eq!(peer.calls(methods::SERVER_STREAMING), 0);
}

#[tokio::test(start_paused = true)]
async fn successful_probe_closes_the_circuit() {
    init_tracing();
    let peer = SimulatedTransport::default();
    let client = tripping_client(&peer);
    for _ in 0..2 {
        let _ = client
            .unary_resiliency(CallRequest::new(0, 0, [OutcomeCode::NotFound]), None)
            .await;
    }
    assert!(client.circuit_breaker().is_open());

    tokio::time::advance(Duration::from_secs(10)).await;
    let outcome = client
        .bidirectional_resiliency(vec![CallRequest::new(0, 0, [OutcomeCode::Ok])], None)
        .await;

    assert!(outcome.is_ok(), "{:?}", outcome.error);
    assert_eq!(client.circuit_breaker().state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn supplied_breaker_replaces_the_policy_breaker() {
    init_tracing();
    let peer = SimulatedTransport::default();
    let breaker = CircuitBreakerConfig::builder().name("shared").build();
    let client = ResiliencyClient::builder(peer.clone())
        .circuit_breaker(breaker.clone())
        .build()
        .unwrap();

    breaker.force_open();
    let error = client
        .client_resiliency(vec![CallRequest::new(0, 0, [OutcomeCode::Ok])], None)
        .await
        .unwrap_err();

    assert_eq!(
        error,
        CallError::CircuitOpen {
            name: "shared".to_string()
        }
    );
    assert_eq!(peer.calls(methods::CLIENT_STREAMING), 0);
}
