//! Property tests for the circuit breaker.
//!
//! Invariants tested:
//! - The circuit opens exactly when the window's failure ratio first exceeds
//!   the threshold with enough volume
//! - Every recorded outcome is counted exactly once
//! - An open circuit admits nothing
//! - Half-open admits at most the configured number of probes

use proptest::prelude::*;
use rpc_resilience_circuitbreaker::{CircuitBreakerConfig, CircuitState};
use std::time::Duration;
use tokio::runtime::Runtime;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Property: the breaker follows a reference model of the trip rule
    #[test]
    fn trips_exactly_when_the_model_does(
        outcomes in prop::collection::vec(any::<bool>(), 1..60),
        volume in 1usize..=12,
        threshold in 0.05f64..=0.95,
    ) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let breaker = CircuitBreakerConfig::builder()
                .minimum_request_volume(volume)
                .failure_ratio_threshold(threshold)
                .open_duration(Duration::from_secs(3600))
                .build();

            let (mut requests, mut failures, mut open) = (0usize, 0usize, false);
            for success in outcomes {
                let permit = breaker.try_acquire();
                if open {
                    prop_assert!(permit.is_none(), "open circuit admitted a call");
                    continue;
                }
                let permit = permit.expect("closed circuit admits every call");
                if success { permit.record_success() } else { permit.record_failure() }

                requests += 1;
                failures += usize::from(!success);
                if requests >= volume && failures as f64 / requests as f64 > threshold {
                    open = true;
                }
                let expected = if open { CircuitState::Open } else { CircuitState::Closed };
                prop_assert_eq!(breaker.state(), expected);
            }
            Ok(())
        })?;
    }

    /// Property: closed-state counters add up
    #[test]
    fn counters_are_conserved(outcomes in prop::collection::vec(any::<bool>(), 0..100)) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let breaker = CircuitBreakerConfig::builder()
                .minimum_request_volume(usize::MAX)
                .build();
            for &success in &outcomes {
                let permit = breaker.try_acquire().unwrap();
                if success { permit.record_success() } else { permit.record_failure() }
            }

            let counters = breaker.metrics().counters;
            prop_assert_eq!(counters.requests, outcomes.len());
            prop_assert_eq!(counters.total_successes, outcomes.iter().filter(|s| **s).count());
            prop_assert_eq!(counters.requests, counters.total_successes + counters.total_failures);
            Ok(())
        })?;
    }

    /// Property: half-open never admits more than its probe budget
    #[test]
    fn half_open_respects_probe_budget(
        probes in 1usize..=5,
        contenders in 1usize..=20,
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap();
        rt.block_on(async {
            let breaker = CircuitBreakerConfig::builder()
                .minimum_request_volume(1)
                .max_half_open_requests(probes)
                .open_duration(Duration::from_secs(1))
                .build();
            breaker.try_acquire().unwrap().record_failure();
            tokio::time::advance(Duration::from_secs(1)).await;

            let admitted: Vec<_> = (0..contenders).filter_map(|_| breaker.try_acquire()).collect();
            prop_assert_eq!(admitted.len(), probes.min(contenders));
            prop_assert_eq!(breaker.state(), CircuitState::HalfOpen);

            let admitted_count = admitted.len();
            for permit in admitted {
                permit.record_success();
            }
            let expected = if admitted_count == probes {
                CircuitState::Closed
            } else {
                CircuitState::HalfOpen
            };
            prop_assert_eq!(breaker.state(), expected);
            Ok(())
        })?;
    }
}
