//! An in-process resiliency peer.
//!
//! [`SimulatedTransport`] answers the four call shapes the way the resiliency
//! server does: for each request it waits a random time in
//! `[min_delay, max_delay)` and answers with a code drawn from the request's
//! desired status codes. Everything runs on tokio time, so tests with paused
//! time are deterministic apart from the draws, which can be seeded.

use crate::message::{CallRequest, CallResponse};
use crate::metadata::Metadata;
use crate::transport::{
    methods, CallOptions, RequestStream, ResiliencyTransport, ResponseStream, StreamingResponse,
};
use futures::future::BoxFuture;
use futures::StreamExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rpc_resilience_core::{OutcomeCode, TransportError};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// A request as the peer received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedRequest {
    /// Method path the request arrived on.
    pub method: &'static str,
    /// The request.
    pub request: CallRequest,
    /// Request metadata of the call.
    pub metadata: Metadata,
}

struct Inner {
    headers: Metadata,
    stream_length: usize,
    in_band_status: bool,
    rng: Mutex<StdRng>,
    open_failures: Mutex<HashMap<&'static str, VecDeque<TransportError>>>,
    observed: Mutex<Vec<ObservedRequest>>,
    opened: Mutex<HashMap<&'static str, usize>>,
}

/// Simulated resiliency peer.
///
/// Cloning is cheap; clones share the peer's state and its request log.
#[derive(Clone)]
pub struct SimulatedTransport {
    inner: Arc<Inner>,
}

/// Builder for [`SimulatedTransport`].
pub struct SimulatedTransportBuilder {
    headers: Metadata,
    stream_length: usize,
    in_band_status: bool,
    seed: Option<u64>,
}

impl SimulatedTransportBuilder {
    /// Header metadata sent with every response.
    pub fn response_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key, value);
        self
    }

    /// Responses sent per server-streaming call.
    ///
    /// Default: 3
    pub fn stream_length(mut self, n: usize) -> Self {
        self.stream_length = n;
        self
    }

    /// Report non-OK codes on streams as in-band response statuses instead of
    /// terminating the stream with a transport error.
    ///
    /// Default: false
    pub fn in_band_status(mut self, enabled: bool) -> Self {
        self.in_band_status = enabled;
        self
    }

    /// Seeds the delay and code draws.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Builds the peer.
    pub fn build(self) -> SimulatedTransport {
        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        SimulatedTransport {
            inner: Arc::new(Inner {
                headers: self.headers,
                stream_length: self.stream_length,
                in_band_status: self.in_band_status,
                rng: Mutex::new(rng),
                open_failures: Mutex::new(HashMap::new()),
                observed: Mutex::new(Vec::new()),
                opened: Mutex::new(HashMap::new()),
            }),
        }
    }
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SimulatedTransport {
    /// Creates a builder.
    pub fn builder() -> SimulatedTransportBuilder {
        SimulatedTransportBuilder {
            headers: Metadata::new(),
            stream_length: 3,
            in_band_status: false,
            seed: None,
        }
    }

    /// Makes the next call on `method` fail at open with `error`. Queued
    /// failures are used in order.
    pub fn fail_next_open(&self, method: &'static str, error: TransportError) {
        lock(&self.inner.open_failures)
            .entry(method)
            .or_default()
            .push_back(error);
    }

    /// Every request the peer has received, in arrival order.
    pub fn observed(&self) -> Vec<ObservedRequest> {
        lock(&self.inner.observed).clone()
    }

    /// Payloads received on `method`, in arrival order.
    pub fn observed_payloads(&self, method: &str) -> Vec<String> {
        lock(&self.inner.observed)
            .iter()
            .filter(|observed| observed.method == method)
            .map(|observed| observed.request.payload().to_string())
            .collect()
    }

    /// Number of calls opened on `method`, failed opens included.
    pub fn calls(&self, method: &str) -> usize {
        lock(&self.inner.opened).get(method).copied().unwrap_or(0)
    }

    fn open(&self, method: &'static str) -> Result<(), TransportError> {
        *lock(&self.inner.opened).entry(method).or_default() += 1;
        match lock(&self.inner.open_failures)
            .get_mut(method)
            .and_then(VecDeque::pop_front)
        {
            Some(error) => {
                tracing::debug!(method, code = %error.code(), "simulated open failure");
                Err(error)
            }
            None => Ok(()),
        }
    }
}

impl Inner {
    fn observe(&self, method: &'static str, request: &CallRequest, metadata: &Metadata) {
        lock(&self.observed).push(ObservedRequest {
            method,
            request: request.clone(),
            metadata: metadata.clone(),
        });
    }

    /// Draws the delay and outcome for one request.
    fn draw(&self, request: &CallRequest) -> (Duration, OutcomeCode) {
        let mut rng = lock(&self.rng);
        let min = u64::from(request.min_delay_seconds()) * 1000;
        let max = u64::from(request.max_delay_seconds()) * 1000;
        let delay_ms = if max > min {
            rng.random_range(min..max)
        } else {
            min
        };
        let codes = request.desired_status_codes();
        let code = if codes.is_empty() {
            OutcomeCode::Ok
        } else {
            codes[rng.random_range(0..codes.len())]
        };
        (Duration::from_millis(delay_ms), code)
    }

    /// Produces one answer: a response, or the error that ends the call.
    async fn answer(
        &self,
        request: &CallRequest,
        sequence: usize,
    ) -> Result<CallResponse, TransportError> {
        let (delay, code) = self.draw(request);
        tokio::time::sleep(delay).await;
        let payload = format!("response {sequence} to '{}' after {delay:?}", request.payload());
        if code.is_ok() {
            Ok(CallResponse::ok(payload))
        } else {
            Err(TransportError::new(code, format!("simulated {code}")))
        }
    }

    /// Turns an answer into a stream item. Returns `false` once the stream
    /// must end.
    fn stream_item(
        &self,
        answer: Result<CallResponse, TransportError>,
    ) -> (Result<CallResponse, TransportError>, bool) {
        match answer {
            Ok(response) => (Ok(response), true),
            Err(error) if self.in_band_status => (
                Ok(CallResponse::new(error.message().to_string(), error.code())),
                true,
            ),
            Err(error) => (Err(error), false),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ResiliencyTransport for SimulatedTransport {
    fn unary(
        &self,
        request: CallRequest,
        options: CallOptions,
    ) -> BoxFuture<'static, Result<CallResponse, TransportError>> {
        let this = self.clone();
        Box::pin(async move {
            this.open(methods::UNARY)?;
            let inner = &this.inner;
            inner.observe(methods::UNARY, &request, &options.metadata);
            let response = inner.answer(&request, 1).await?;
            Ok(response.with_headers(inner.headers.clone()))
        })
    }

    fn server_streaming(
        &self,
        request: CallRequest,
        options: CallOptions,
    ) -> BoxFuture<'static, Result<StreamingResponse, TransportError>> {
        let this = self.clone();
        Box::pin(async move {
            this.open(methods::SERVER_STREAMING)?;
            let inner = Arc::clone(&this.inner);
            inner.observe(methods::SERVER_STREAMING, &request, &options.metadata);

            let (tx, rx) = mpsc::channel(1);
            let producer = Arc::clone(&inner);
            tokio::spawn(async move {
                for sequence in 1..=producer.stream_length {
                    let answer = producer.answer(&request, sequence).await;
                    let (item, more) = producer.stream_item(answer);
                    if tx.send(item).await.is_err() || !more {
                        break;
                    }
                }
            });

            let messages: ResponseStream = ReceiverStream::new(rx).boxed();
            Ok(StreamingResponse::new(inner.headers.clone(), messages))
        })
    }

    fn client_streaming(
        &self,
        mut requests: RequestStream,
        options: CallOptions,
    ) -> BoxFuture<'static, Result<CallResponse, TransportError>> {
        let this = self.clone();
        Box::pin(async move {
            this.open(methods::CLIENT_STREAMING)?;
            let inner = &this.inner;
            let mut received = 0;
            let mut last = None;
            while let Some(request) = requests.next().await {
                inner.observe(methods::CLIENT_STREAMING, &request, &options.metadata);
                received += 1;
                last = Some(request);
            }
            let last = last.ok_or_else(|| {
                TransportError::new(OutcomeCode::InvalidArgument, "no requests received")
            })?;
            let response = inner.answer(&last, received).await?;
            Ok(response
                .with_payload(format!("received {received} requests; {}", response.payload()))
                .with_headers(inner.headers.clone()))
        })
    }

    fn bidi_streaming(
        &self,
        mut requests: RequestStream,
        options: CallOptions,
    ) -> BoxFuture<'static, Result<StreamingResponse, TransportError>> {
        let this = self.clone();
        Box::pin(async move {
            this.open(methods::BIDI_STREAMING)?;
            let inner = Arc::clone(&this.inner);

            let (tx, rx) = mpsc::channel(1);
            let peer = Arc::clone(&inner);
            let metadata = options.metadata;
            tokio::spawn(async move {
                let mut sequence = 0;
                while let Some(request) = requests.next().await {
                    sequence += 1;
                    peer.observe(methods::BIDI_STREAMING, &request, &metadata);
                    let (item, more) = peer.stream_item(peer.answer(&request, sequence).await);
                    if tx.send(item).await.is_err() || !more {
                        break;
                    }
                }
            });

            let messages: ResponseStream = ReceiverStream::new(rx).boxed();
            Ok(StreamingResponse::new(inner.headers.clone(), messages))
        })
    }
}

impl std::fmt::Debug for SimulatedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedTransport")
            .field("stream_length", &self.inner.stream_length)
            .field("in_band_status", &self.inner.in_band_status)
            .finish_non_exhaustive()
    }
}
