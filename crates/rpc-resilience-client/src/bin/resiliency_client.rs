//! Demonstration client for `resiliency.ResiliencyService`.
//!
//! Runs one call of each shape with fixed parameters and logs what happens.
//!
//! Run with: cargo run --bin resiliency-client
//! (expects a server on localhost:9090)
//!
//! Environment:
//! - `RESILIENCY_SIMULATE=1`: use the in-process simulated peer instead of
//!   dialing the server
//! - `RESILIENCY_POLICY=<path>`: load the retry/breaker/timeout policy from a
//!   TOML file
//! - `RUST_LOG`: log filter, `info` by default

use rpc_resilience_client::{
    CallRequest, LoggingInterceptor, PolicyConfig, RequestMetadataInterceptor, ResiliencyClient,
    ResiliencyTransport, SimulatedTransport, StaticMetadataInterceptor, StreamOutcome,
    GrpcTransport,
};
use rpc_resilience_core::OutcomeCode;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const SERVER_ADDR: &str = "http://localhost:9090";

fn request(min_delay: u32, max_delay: u32, codes: &[OutcomeCode]) -> CallRequest {
    CallRequest::new(min_delay, max_delay, codes.iter().copied())
}

fn report(name: &str, outcome: &StreamOutcome) {
    for response in &outcome.responses {
        info!("{name}: {}", response.payload());
    }
    match &outcome.error {
        None => info!("{name}: completed with {} responses", outcome.responses.len()),
        Some(err) => error!("{name}: failed after {} responses: {err}", outcome.responses.len()),
    }
}

async fn run_demo<T: ResiliencyTransport>(
    transport: T,
    policy: PolicyConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = ResiliencyClient::builder(transport)
        .policy(policy)
        .interceptor(LoggingInterceptor)
        .interceptor(
            StaticMetadataInterceptor::default()
                .pair("my-request-metadata-key-1", "my-request-metadata-value-1")
                .pair("my-request-metadata-key-2", "my-request-metadata-value-2"),
        )
        .interceptor(RequestMetadataInterceptor)
        .build()?;

    info!("\n=== UnaryResiliency ===");
    match client
        .unary_resiliency(request(0, 5, &[OutcomeCode::Ok]), Some(Duration::from_secs(5)))
        .await
    {
        Ok(response) => info!("unary: {}", response.payload()),
        Err(err) => error!("unary: {err}"),
    }

    info!("\n=== ServerResiliency ===");
    let outcome = client
        .server_resiliency(request(2, 6, &[OutcomeCode::Ok]), Some(Duration::from_secs(3)))
        .await;
    report("server", &outcome);

    info!("\n=== ClientResiliency ===");
    let requests = vec![request(2, 8, &[OutcomeCode::Ok]); 3];
    match client
        .client_resiliency(requests, Some(Duration::from_secs(60)))
        .await
    {
        Ok(response) => info!("client: {}", response.payload()),
        Err(err) => error!("client: {err}"),
    }

    info!("\n=== BiDirectionalResiliency ===");
    let requests = vec![request(0, 3, &[OutcomeCode::Ok]); 4];
    let outcome = client.bidirectional_resiliency(requests, None).await;
    report("bidi", &outcome);

    let metrics = client.circuit_breaker().metrics();
    info!("\n=== Summary ===");
    info!("Circuit breaker state: {}", metrics.state);
    info!(
        "Calls recorded: {} ({} failed)",
        metrics.counters.requests, metrics.counters.total_failures
    );

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let policy = match std::env::var_os("RESILIENCY_POLICY") {
        Some(path) => PolicyConfig::load(path)?,
        None => PolicyConfig::default(),
    };

    let result = if std::env::var("RESILIENCY_SIMULATE").is_ok_and(|v| v == "1") {
        info!("Using the in-process simulated peer");
        run_demo(SimulatedTransport::default(), policy).await
    } else {
        info!("Connecting to gRPC server at {SERVER_ADDR}");
        match GrpcTransport::connect(SERVER_ADDR).await {
            Ok(transport) => run_demo(transport, policy).await,
            Err(err) => {
                error!("Cannot connect to gRPC server: {err}");
                std::process::exit(1);
            }
        }
    };

    if let Err(e) = result {
        error!("Client error: {e}");
        std::process::exit(1);
    }

    Ok(())
}
