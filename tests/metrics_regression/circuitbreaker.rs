//! Circuit breaker metrics regression tests

use super::helpers::*;
use rpc_resilience_circuitbreaker::CircuitBreakerConfig;
use serial_test::serial;
use std::time::Duration;

#[tokio::test]
#[serial]
async fn circuitbreaker_metrics_exist() {
    init_recorder();

    let breaker = CircuitBreakerConfig::builder()
        .name("test_cb")
        .failure_ratio_threshold(0.5)
        .minimum_request_volume(4)
        .open_duration(Duration::from_millis(100))
        .build();

    // Alternating outcomes hold the ratio at 0.5, which does not trip; one
    // more failure does.
    for i in 0..6 {
        if let Some(permit) = breaker.try_acquire() {
            if i % 2 == 0 {
                permit.record_success();
            } else {
                permit.record_failure();
            }
        }
    }
    let _ = breaker.try_acquire().map(|permit| permit.record_failure());

    // Verify counter metrics
    assert_counter_exists("circuitbreaker_calls_total");
    assert_metric_has_label("circuitbreaker_calls_total", "circuitbreaker", "test_cb");
    assert_metric_has_label("circuitbreaker_calls_total", "outcome", "success");
    assert_metric_has_label("circuitbreaker_calls_total", "outcome", "failure");

    // Verify transition counter
    assert_counter_exists("circuitbreaker_transitions_total");
    assert_metric_has_label(
        "circuitbreaker_transitions_total",
        "circuitbreaker",
        "test_cb",
    );

    // Verify state gauge
    assert_gauge_exists("circuitbreaker_state");
    assert_metric_has_label("circuitbreaker_state", "circuitbreaker", "test_cb");

    // Verify duration histogram
    assert_histogram_exists("circuitbreaker_call_duration_seconds");
    assert_metric_has_label(
        "circuitbreaker_call_duration_seconds",
        "circuitbreaker",
        "test_cb",
    );
}

#[tokio::test]
#[serial]
async fn circuitbreaker_rejections_and_transitions_are_counted() {
    init_recorder();

    let breaker = CircuitBreakerConfig::builder()
        .name("reject_cb")
        .minimum_request_volume(1)
        .open_duration(Duration::from_secs(60))
        .build();

    breaker.try_acquire().unwrap().record_failure();
    for _ in 0..3 {
        assert!(breaker.try_acquire().is_none());
    }

    assert_eq!(
        counter_value(
            "circuitbreaker_calls_total",
            &[("circuitbreaker", "reject_cb"), ("outcome", "rejected")]
        ),
        3
    );
    assert_eq!(
        counter_value(
            "circuitbreaker_transitions_total",
            &[
                ("circuitbreaker", "reject_cb"),
                ("from", "Closed"),
                ("to", "Open")
            ]
        ),
        1
    );
    assert_eq!(
        gauge_value("circuitbreaker_state", &[("circuitbreaker", "reject_cb")]),
        Some(1.0)
    );
}

#[tokio::test(start_paused = true)]
#[serial]
async fn circuitbreaker_state_gauge_follows_recovery() {
    init_recorder();

    let breaker = CircuitBreakerConfig::builder()
        .name("recovery_cb")
        .minimum_request_volume(1)
        .open_duration(Duration::from_secs(1))
        .build();

    breaker.try_acquire().unwrap().record_failure();
    tokio::time::advance(Duration::from_secs(1)).await;
    let probe = breaker.try_acquire().unwrap();
    assert_eq!(
        gauge_value("circuitbreaker_state", &[("circuitbreaker", "recovery_cb")]),
        Some(2.0)
    );

    probe.record_success();
    assert_eq!(
        gauge_value("circuitbreaker_state", &[("circuitbreaker", "recovery_cb")]),
        Some(0.0)
    );
    assert_eq!(
        counter_value(
            "circuitbreaker_transitions_total",
            &[("circuitbreaker", "recovery_cb"), ("to", "Closed")]
        ),
        1
    );
}
