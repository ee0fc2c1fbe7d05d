//! Each scenario drives a full `ResiliencyClient` (interceptors, breaker,
//! retry, deadline, driver) against `SimulatedTransport` on paused time.

mod breaker;
mod metadata;
mod streams;
mod unary;

use rpc_resilience_client::{ResiliencyClient, SimulatedTransport};

/// Routes client logs to the test harness. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("rpc_resilience_client=debug")
        .try_init();
}

pub fn client(peer: &SimulatedTransport) -> ResiliencyClient {
    ResiliencyClient::builder(peer.clone())
        .build()
        .expect("default policy is valid")
}
