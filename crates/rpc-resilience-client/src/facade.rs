//! The resiliency client: the four call shapes behind one policy.
//!
//! Every call passes through the same layers, outermost first:
//!
//! 1. interceptors open the call context and, for unary calls, transform the
//!    request;
//! 2. the circuit breaker admits or rejects the call;
//! 3. the call's deadline starts;
//! 4. the retry executor runs attempts against the transport.
//!
//! The breaker sees one outcome per logical call, whatever the number of
//! attempts, and a missed deadline counts against it like any other failure.
//!
//! Unary and client-streaming calls are retried as a whole. Server and
//! bidirectional streams are retried only while the stream has not opened;
//! once it is established nothing is retried.

use crate::driver::{Deadline, DuplexStreamDriver, StreamCall, StreamOutcome};
use crate::interceptor::{CallShape, Interceptor, InterceptorChain};
use crate::message::{CallRequest, CallResponse};
use crate::metadata::log_response_metadata;
use crate::policy::{ConfigError, PolicyConfig};
use crate::transport::{methods, CallOptions, ResiliencyTransport};
use rpc_resilience_circuitbreaker::{CallPermit, CircuitBreaker};
use rpc_resilience_core::{CallError, OutcomeCode, TransportError};
use rpc_resilience_retry::{RetryError, RetryExecutor};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Resiliency-aware client for the four call shapes.
///
/// Cheap to clone; clones share the transport, the breaker and the shutdown
/// token.
///
/// # Examples
///
/// ```
/// use rpc_resilience_client::{CallRequest, ResiliencyClient, SimulatedTransport};
/// use rpc_resilience_core::OutcomeCode;
///
/// # #[tokio::main(flavor = "current_thread", start_paused = true)]
/// # async fn main() {
/// let client = ResiliencyClient::builder(SimulatedTransport::default())
///     .build()
///     .unwrap();
///
/// let request = CallRequest::new(0, 1, [OutcomeCode::Ok]);
/// let response = client.unary_resiliency(request, None).await.unwrap();
/// assert!(response.status().is_ok());
/// # }
/// ```
#[derive(Clone)]
pub struct ResiliencyClient {
    transport: Arc<dyn ResiliencyTransport>,
    interceptors: InterceptorChain,
    policy: PolicyConfig,
    breaker: CircuitBreaker,
    unary_retry: RetryExecutor<CallError>,
    stream_retry: RetryExecutor<CallError>,
    driver: DuplexStreamDriver,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for ResiliencyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResiliencyClient")
            .field("interceptors", &self.interceptors)
            .field("breaker", &self.breaker)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ResiliencyClient`].
pub struct ResiliencyClientBuilder {
    transport: Arc<dyn ResiliencyTransport>,
    interceptors: InterceptorChain,
    policy: PolicyConfig,
    breaker: Option<CircuitBreaker>,
    shutdown: CancellationToken,
    stream_buffer: Option<usize>,
}

impl ResiliencyClientBuilder {
    /// Replaces the policy.
    ///
    /// Default: [`PolicyConfig::default`]
    pub fn policy(mut self, policy: PolicyConfig) -> Self {
        self.policy = policy;
        self
    }

    /// Appends an interceptor stage.
    pub fn interceptor<I>(mut self, stage: I) -> Self
    where
        I: Interceptor + 'static,
    {
        self.interceptors = self.interceptors.with(stage);
        self
    }

    /// Replaces the whole interceptor chain.
    pub fn interceptors(mut self, chain: InterceptorChain) -> Self {
        self.interceptors = chain;
        self
    }

    /// Uses `breaker` instead of one built from the policy, so several
    /// clients can share a breaker.
    pub fn circuit_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Cancelling `token` cancels every call in flight on the client.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Outbound requests queued ahead of the transport on streaming calls.
    pub fn stream_buffer(mut self, buffer: usize) -> Self {
        self.stream_buffer = Some(buffer);
        self
    }

    /// Validates the policy and builds the client.
    pub fn build(self) -> Result<ResiliencyClient, ConfigError> {
        self.policy.validate()?;

        let breaker = self
            .breaker
            .unwrap_or_else(|| self.policy.circuit_breaker.build());
        let mut driver =
            DuplexStreamDriver::new(Arc::clone(&self.transport), self.interceptors.clone());
        if let Some(buffer) = self.stream_buffer {
            driver = driver.with_buffer(buffer);
        }

        Ok(ResiliencyClient {
            unary_retry: self.policy.unary_retry.executor("unary"),
            stream_retry: self.policy.stream_retry.executor("stream"),
            transport: self.transport,
            interceptors: self.interceptors,
            policy: self.policy,
            breaker,
            driver,
            shutdown: self.shutdown,
        })
    }
}

impl ResiliencyClient {
    /// Starts building a client over `transport`.
    pub fn builder<T>(transport: T) -> ResiliencyClientBuilder
    where
        T: ResiliencyTransport,
    {
        ResiliencyClientBuilder {
            transport: Arc::new(transport),
            interceptors: InterceptorChain::new(),
            policy: PolicyConfig::default(),
            breaker: None,
            shutdown: CancellationToken::new(),
            stream_buffer: None,
        }
    }

    /// The client's policy.
    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    /// The breaker guarding every call of the client.
    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Cancels every call in flight and every later call.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// One request, one response.
    ///
    /// `timeout` overrides the policy's unary deadline.
    pub async fn unary_resiliency(
        &self,
        request: CallRequest,
        timeout: Option<Duration>,
    ) -> Result<CallResponse, CallError> {
        let method = methods::UNARY;
        let shape = CallShape::Unary;
        let context = self.interceptors.start_call(method, shape)?;
        let request = self.interceptors.before_send(&context, request)?;
        let permit = self.admit(method)?;

        let deadline = Deadline::after(timeout.unwrap_or(self.policy.timeouts.unary));
        let attempts = self.unary_retry.run(|attempt| {
            let transport = Arc::clone(&self.transport);
            let request = request.clone();
            let options = CallOptions {
                timeout: Some(deadline.remaining()),
                metadata: context.metadata().clone(),
            };
            async move {
                debug!(method, attempt, "sending unary request");
                let response = transport.unary(request, options).await?;
                if !response.status().is_ok() {
                    return Err(in_band_failure(&response));
                }
                Ok(response)
            }
        });

        let result = tokio::select! {
            result = tokio::time::timeout_at(deadline.at(), attempts) => match result {
                Ok(result) => result.map_err(CallError::from),
                Err(_) => Err(deadline.exceeded()),
            },
            _ = self.shutdown.cancelled() => Err(CallError::Cancelled),
        };

        let response = match permit.record(result) {
            Ok(response) => response,
            Err(error) => {
                warn!(method, error = %error, "unary call failed");
                return Err(error);
            }
        };
        let response = self.interceptors.after_receive(&context, response)?;
        log_response_metadata(method, response.headers());
        info!(method, payload = response.payload(), "response from server");
        Ok(response)
    }

    /// One request, a stream of responses.
    ///
    /// `timeout` overrides the policy's server-streaming deadline.
    pub async fn server_resiliency(
        &self,
        request: CallRequest,
        timeout: Option<Duration>,
    ) -> StreamOutcome {
        self.run_stream(
            methods::SERVER_STREAMING,
            CallShape::ServerStreaming,
            timeout,
            |call| self.driver.server_streaming(call, request.clone()),
        )
        .await
    }

    /// A stream of requests, one response.
    ///
    /// `timeout` overrides the policy's client-streaming deadline.
    pub async fn client_resiliency(
        &self,
        requests: Vec<CallRequest>,
        timeout: Option<Duration>,
    ) -> Result<CallResponse, CallError> {
        let outcome = self
            .run_stream(
                methods::CLIENT_STREAMING,
                CallShape::ClientStreaming,
                timeout,
                |call| self.driver.client_streaming(call, requests.clone()),
            )
            .await;
        outcome.into_result()?.pop().ok_or_else(|| {
            TransportError::new(OutcomeCode::Unknown, "stream closed without a response").into()
        })
    }

    /// Requests and responses flowing both ways at once.
    ///
    /// `timeout` overrides the policy's bidirectional deadline.
    pub async fn bidirectional_resiliency(
        &self,
        requests: Vec<CallRequest>,
        timeout: Option<Duration>,
    ) -> StreamOutcome {
        self.run_stream(
            methods::BIDI_STREAMING,
            CallShape::BidiStreaming,
            timeout,
            |call| self.driver.bidi_streaming(call, requests.clone()),
        )
        .await
    }

    fn admit(&self, method: &str) -> Result<CallPermit, CallError> {
        self.breaker.try_acquire().ok_or_else(|| {
            warn!(method, breaker = self.breaker.name(), "circuit open; call rejected");
            CallError::CircuitOpen {
                name: self.breaker.name().to_string(),
            }
        })
    }

    async fn run_stream<F, Fut>(
        &self,
        method: &'static str,
        shape: CallShape,
        timeout: Option<Duration>,
        mut start: F,
    ) -> StreamOutcome
    where
        F: FnMut(StreamCall) -> Fut,
        Fut: Future<Output = StreamOutcome>,
    {
        let context = match self.interceptors.start_call(method, shape) {
            Ok(context) => context,
            Err(error) => return StreamOutcome::rejected(shape, error),
        };
        let permit = match self.admit(method) {
            Ok(permit) => permit,
            Err(error) => return StreamOutcome::rejected(shape, error),
        };

        let deadline =
            Deadline::after(timeout.unwrap_or_else(|| self.policy.timeouts.for_shape(shape)));
        let token = self.shutdown.child_token();
        let _cancel_on_drop = token.clone().drop_guard();
        let call = StreamCall::new(context)
            .with_deadline(deadline)
            .with_cancellation(token.clone());

        let whole_call = shape == CallShape::ClientStreaming;
        let in_attempt = &AtomicBool::new(false);
        let last_failed = &Mutex::new(None);
        let shutdown = &self.shutdown;
        let attempts = self.stream_retry.run(move |attempt| {
            in_attempt.store(true, Ordering::Relaxed);
            let session = start(call.clone());
            async move {
                let outcome = if shutdown.is_cancelled() {
                    StreamOutcome::rejected(shape, CallError::Cancelled)
                } else if deadline.is_expired() {
                    StreamOutcome::rejected(shape, deadline.exceeded())
                } else {
                    session.await
                };
                in_attempt.store(false, Ordering::Relaxed);
                match outcome.error.clone() {
                    // A shut down client makes no further attempts.
                    Some(_) if shutdown.is_cancelled() => Ok(outcome),
                    Some(error) if whole_call || !outcome.opened => {
                        debug!(method, attempt, error = %error, "stream attempt failed");
                        *last_failed.lock().unwrap_or_else(PoisonError::into_inner) = Some(outcome);
                        Err(error)
                    }
                    _ => Ok(outcome),
                }
            }
        });
        tokio::pin!(attempts);

        let result = tokio::select! {
            biased;
            result = &mut attempts => result,
            _ = tokio::time::sleep_until(deadline.at()) => {
                if in_attempt.load(Ordering::Relaxed) {
                    // The session enforces the same deadline; let it unwind
                    // so what it received is kept.
                    token.cancel();
                    attempts.await
                } else {
                    Err(RetryError::NotRetryable(deadline.exceeded()))
                }
            }
            _ = self.shutdown.cancelled() => {
                if in_attempt.load(Ordering::Relaxed) {
                    attempts.await
                } else {
                    Err(RetryError::NotRetryable(CallError::Cancelled))
                }
            }
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(error) => {
                let error = CallError::from(error);
                let failed = last_failed
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                let mut outcome =
                    failed.unwrap_or_else(|| StreamOutcome::rejected(shape, error.clone()));
                outcome.error = Some(error);
                outcome
            }
        };

        match &outcome.error {
            None => {
                permit.record_success();
                info!(
                    method,
                    responses = outcome.responses.len(),
                    sent = outcome.sent,
                    "stream completed"
                );
            }
            Some(error) => {
                permit.record_failure();
                warn!(
                    method,
                    responses = outcome.responses.len(),
                    error = %error,
                    "stream ended with an error"
                );
            }
        }
        if outcome.opened {
            log_response_metadata(method, &outcome.headers);
        }
        outcome
    }
}

fn in_band_failure(response: &CallResponse) -> CallError {
    TransportError::new(response.status(), response.payload().to_string()).into()
}
