use rpc_resilience_circuitbreaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn breaker(volume: usize, threshold: f64) -> CircuitBreaker {
    CircuitBreakerConfig::builder()
        .name("thresholds")
        .minimum_request_volume(volume)
        .failure_ratio_threshold(threshold)
        .open_duration(Duration::from_secs(30))
        .build()
}

async fn call(
    breaker: &CircuitBreaker,
    fail: bool,
) -> Result<(), CircuitBreakerError<&'static str>> {
    breaker
        .execute(|| async move { if fail { Err("boom") } else { Ok(()) } })
        .await
}

#[tokio::test]
async fn ratio_at_threshold_does_not_trip() {
    let breaker = breaker(4, 0.5);
    for fail in [false, true, false, true] {
        let _ = call(&breaker, fail).await;
    }
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.metrics().failure_ratio, 0.5);

    let _ = call(&breaker, true).await;
    assert_eq!(breaker.state(), CircuitState::Open);
}

#[tokio::test]
async fn minimum_volume_gates_the_ratio() {
    let breaker = breaker(10, 0.5);
    for _ in 0..9 {
        let _ = call(&breaker, true).await;
    }
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.metrics().counters.total_failures, 9);

    let _ = call(&breaker, true).await;
    assert_eq!(breaker.state(), CircuitState::Open);
}

#[tokio::test]
async fn open_circuit_never_invokes_the_operation() {
    let breaker = breaker(1, 0.5);
    let _ = call(&breaker, true).await;
    assert!(breaker.is_open());

    let invoked = Arc::new(AtomicUsize::new(0));
    for _ in 0..5 {
        let invoked = Arc::clone(&invoked);
        let result: Result<(), CircuitBreakerError<&str>> = breaker
            .execute(|| async move {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(CircuitBreakerError::OpenCircuit { ref name }) if name == "thresholds"));
    }
    assert_eq!(invoked.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn threshold_of_one_never_trips() {
    let breaker = breaker(2, 1.0);
    for _ in 0..20 {
        let _ = call(&breaker, true).await;
    }
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test]
async fn classified_outcomes_drive_the_ratio() {
    let breaker = breaker(2, 0.5);
    // Only "fatal" errors count against the circuit.
    for error in ["benign", "benign", "benign"] {
        let _: Result<(), _> = breaker
            .execute_classified(
                || async move { Err::<(), _>(error) },
                |result: &Result<(), &str>| matches!(result, Err("fatal")),
            )
            .await;
    }
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.metrics().counters.total_successes, 3);
}
