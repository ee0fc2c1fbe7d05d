use rpc_resilience_circuitbreaker::{
    CallOutcome, CircuitBreakerConfig, CircuitBreakerEvent, CircuitState,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn transitions_are_reported_in_order() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let breaker = CircuitBreakerConfig::builder()
        .name("observed")
        .minimum_request_volume(1)
        .open_duration(Duration::from_secs(1))
        .on_state_transition(move |name, from, to| {
            sink.lock().unwrap().push((name.to_string(), from, to));
        })
        .build();

    breaker.try_acquire().unwrap().record_failure();
    tokio::time::advance(Duration::from_secs(1)).await;
    breaker.try_acquire().unwrap().record_success();

    let seen = seen.lock().unwrap();
    assert_eq!(
        *seen,
        vec![
            ("observed".to_string(), CircuitState::Closed, CircuitState::Open),
            ("observed".to_string(), CircuitState::Open, CircuitState::HalfOpen),
            ("observed".to_string(), CircuitState::HalfOpen, CircuitState::Closed),
        ]
    );
}

#[tokio::test]
async fn permitted_and_rejected_calls_are_reported() {
    let permitted = Arc::new(AtomicUsize::new(0));
    let rejected = Arc::new(AtomicUsize::new(0));
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let (p, r, o) = (Arc::clone(&permitted), Arc::clone(&rejected), Arc::clone(&outcomes));
    let breaker = CircuitBreakerConfig::builder()
        .minimum_request_volume(2)
        .on_call_permitted(move |_| {
            p.fetch_add(1, Ordering::SeqCst);
        })
        .on_call_rejected(move || {
            r.fetch_add(1, Ordering::SeqCst);
        })
        .on_outcome(move |succeeded, _| o.lock().unwrap().push(succeeded))
        .build();

    breaker.try_acquire().unwrap().record_success();
    breaker.try_acquire().unwrap().record_failure();
    breaker.try_acquire().unwrap().record_failure();
    assert!(breaker.try_acquire().is_none());

    assert_eq!(permitted.load(Ordering::SeqCst), 3);
    assert_eq!(rejected.load(Ordering::SeqCst), 1);
    assert_eq!(*outcomes.lock().unwrap(), vec![true, false, false]);
}

#[tokio::test]
async fn a_panicking_observer_does_not_reach_the_caller() {
    let breaker = CircuitBreakerConfig::builder()
        .minimum_request_volume(1)
        .on_state_transition(|_, _, _| panic!("observer failure"))
        .build();

    breaker.try_acquire().unwrap().record_failure();
    assert_eq!(breaker.state(), CircuitState::Open);
}

#[tokio::test]
async fn observers_may_query_the_breaker() {
    let states = Arc::new(Mutex::new(Vec::new()));
    let slot: Arc<Mutex<Option<rpc_resilience_circuitbreaker::CircuitBreaker>>> =
        Arc::new(Mutex::new(None));
    let (sink, handle) = (Arc::clone(&states), Arc::clone(&slot));
    let breaker = CircuitBreakerConfig::builder()
        .minimum_request_volume(1)
        .on_state_transition(move |_, _, _| {
            if let Some(breaker) = handle.lock().unwrap().as_ref() {
                // Runs outside the breaker's lock, so this cannot deadlock.
                sink.lock().unwrap().push(breaker.metrics().state);
            }
        })
        .build();
    *slot.lock().unwrap() = Some(breaker.clone());

    breaker.try_acquire().unwrap().record_failure();
    assert_eq!(*states.lock().unwrap(), vec![CircuitState::Open]);
}

#[tokio::test(start_paused = true)]
async fn outcomes_from_an_earlier_generation_are_marked_stale() {
    let recorded = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&recorded);
    let breaker = CircuitBreakerConfig::builder()
        .minimum_request_volume(1)
        .on_event(move |event| {
            if let CircuitBreakerEvent::OutcomeRecorded { outcome, stale, .. } = event {
                sink.lock().unwrap().push((*outcome, *stale));
            }
        })
        .build();

    let in_flight = breaker.try_acquire().unwrap();
    breaker.try_acquire().unwrap().record_failure();
    assert_eq!(breaker.state(), CircuitState::Open);
    in_flight.record_success();

    assert_eq!(breaker.state(), CircuitState::Open);
    assert_eq!(
        *recorded.lock().unwrap(),
        vec![(CallOutcome::Failure, false), (CallOutcome::Success, true)]
    );
}

#[tokio::test(start_paused = true)]
async fn transitions_carry_increasing_generations() {
    let generations = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&generations);
    let breaker = CircuitBreakerConfig::builder()
        .minimum_request_volume(1)
        .open_duration(Duration::from_secs(1))
        .on_event(move |event| {
            if let CircuitBreakerEvent::StateTransition { generation, .. } = event {
                sink.lock().unwrap().push(*generation);
            }
        })
        .build();

    breaker.try_acquire().unwrap().record_failure();
    tokio::time::advance(Duration::from_secs(1)).await;
    breaker.try_acquire().unwrap().record_success();

    assert_eq!(*generations.lock().unwrap(), vec![1, 2, 3]);
    assert_eq!(breaker.metrics().generation, 3);
}
