//! Resiliency-aware client for the four gRPC call shapes.
//!
//! [`ResiliencyClient`] wraps a [`ResiliencyTransport`] with interceptors,
//! deadlines, retries and a circuit breaker, and exposes one operation per
//! call shape:
//!
//! | Operation | Cardinality | Retried |
//! |---|---|---|
//! | [`unary_resiliency`](ResiliencyClient::unary_resiliency) | 1 → 1 | whole call |
//! | [`server_resiliency`](ResiliencyClient::server_resiliency) | 1 → N | until the stream opens |
//! | [`client_resiliency`](ResiliencyClient::client_resiliency) | N → 1 | whole call |
//! | [`bidirectional_resiliency`](ResiliencyClient::bidirectional_resiliency) | N ↔ M | until the stream opens |
//!
//! Streaming calls are run by the [`DuplexStreamDriver`]: the send and
//! receive directions are separate tasks, joined by a latch that releases
//! once both have finished, whether they ended normally, failed, were
//! cancelled or ran out of time. The result is a [`StreamOutcome`] carrying
//! everything received and the first stream-fatal error.
//!
//! ## Transports
//!
//! - [`GrpcTransport`] speaks to a real `resiliency.ResiliencyService` over
//!   tonic.
//! - [`SimulatedTransport`] is an in-process peer that honours the request's
//!   delay range and desired status codes, for tests and offline demos.
//!
//! ## Example
//!
//! ```
//! use rpc_resilience_client::{
//!     CallRequest, RequestMetadataInterceptor, ResiliencyClient, SimulatedTransport,
//! };
//! use rpc_resilience_core::OutcomeCode;
//!
//! # #[tokio::main(flavor = "current_thread", start_paused = true)]
//! # async fn main() {
//! let client = ResiliencyClient::builder(SimulatedTransport::default())
//!     .interceptor(RequestMetadataInterceptor)
//!     .build()
//!     .unwrap();
//!
//! let requests = vec![CallRequest::new(0, 1, [OutcomeCode::Ok]); 4];
//! let outcome = client.bidirectional_resiliency(requests, None).await;
//! assert!(outcome.is_ok());
//! assert_eq!(outcome.responses.len(), 4);
//! # }
//! ```

pub mod driver;
pub mod facade;
pub mod grpc;
pub mod interceptor;
pub mod message;
pub mod metadata;
pub mod policy;
pub mod simulation;
pub mod stages;
pub mod transport;

pub use driver::{
    CompletionLatch, Deadline, DuplexStreamDriver, StreamCall, StreamOutcome, StreamSession,
};
pub use facade::{ResiliencyClient, ResiliencyClientBuilder};
pub use grpc::GrpcTransport;
pub use interceptor::{CallContext, CallShape, Interceptor, InterceptorChain};
pub use message::{CallRequest, CallResponse};
pub use metadata::Metadata;
pub use policy::{
    BackoffSpec, BreakerPolicy, ConfigError, PolicyConfig, RetryPolicyConfig, Timeouts,
};
pub use simulation::{ObservedRequest, SimulatedTransport, SimulatedTransportBuilder};
pub use stages::{
    LoggingInterceptor, PayloadTagInterceptor, RequestMetadataInterceptor,
    StaticMetadataInterceptor,
};
pub use transport::{CallOptions, ResiliencyTransport, StreamingResponse};
