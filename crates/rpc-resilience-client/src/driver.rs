//! Driving streaming calls to completion.
//!
//! A streaming call has up to two directions, each run as its own task:
//!
//! - the **send** direction feeds the caller's requests, in order, into the
//!   outbound stream and then closes it ("no more sends");
//! - the **receive** direction opens the call and drains inbound responses
//!   until end of stream or a stream-fatal error.
//!
//! The directions never wait on each other. The caller waits on a single join
//! point, a [`CompletionLatch`] counted down once per direction, which
//! releases only when every direction has finished. Directions count down
//! from a drop guard, so the latch releases on success, failure, cancellation
//! and panic alike.
//!
//! The first error observed by either direction is kept in the session's
//! error slot; later errors are dropped. Recording an error also cancels the
//! session, which every blocking step of both directions watches.

use crate::interceptor::{CallContext, CallShape, InterceptorChain};
use crate::message::{CallRequest, CallResponse};
use crate::metadata::Metadata;
use crate::transport::{CallOptions, ResiliencyTransport, ResponseStream};
use futures::StreamExt;
use rpc_resilience_core::{CallError, TransportError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// A countdown latch released once its count reaches zero.
#[derive(Debug)]
pub struct CompletionLatch {
    remaining: AtomicUsize,
    released: Notify,
}

impl CompletionLatch {
    /// Creates a latch that releases after `count` count-downs. A latch
    /// created with zero is released from the start.
    pub fn new(count: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(count),
            released: Notify::new(),
        }
    }

    /// Decrements the count. Extra count-downs are ignored.
    pub fn count_down(&self) {
        let previous = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if previous == Ok(1) {
            self.released.notify_waiters();
        }
    }

    /// Count-downs still outstanding.
    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    /// Returns true once the count has reached zero.
    pub fn is_released(&self) -> bool {
        self.remaining() == 0
    }

    /// Waits until the count reaches zero.
    pub async fn wait(&self) {
        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_released() {
                return;
            }
            notified.await;
        }
    }
}

const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Absolute deadline of a call, with the timeout it was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
    timeout: Duration,
}

impl Deadline {
    /// A deadline `timeout` from now.
    ///
    /// Timeouts too large to represent as an instant are capped at roughly
    /// thirty years.
    pub fn after(timeout: Duration) -> Self {
        let now = Instant::now();
        let at = now
            .checked_add(timeout)
            .unwrap_or_else(|| now + FAR_FUTURE);
        Self { at, timeout }
    }

    /// When the deadline expires.
    pub fn at(&self) -> Instant {
        self.at
    }

    /// The timeout the deadline was created with.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Time left, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Returns true once the deadline has passed.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// The error reported when this deadline expires.
    pub fn exceeded(&self) -> CallError {
        CallError::DeadlineExceeded {
            after: self.timeout,
        }
    }
}

/// One streaming call handed to the driver.
#[derive(Debug, Clone)]
pub struct StreamCall {
    context: Arc<CallContext>,
    deadline: Option<Deadline>,
    cancel: CancellationToken,
}

impl StreamCall {
    /// A call with no deadline and its own cancellation token.
    pub fn new(context: CallContext) -> Self {
        Self {
            context: Arc::new(context),
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Attaches a deadline.
    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Ties the call to `token`: cancelling it cancels the call.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The call's interceptor context.
    pub fn context(&self) -> &CallContext {
        &self.context
    }

    fn options(&self) -> CallOptions {
        CallOptions {
            timeout: self.deadline.map(|deadline| deadline.remaining()),
            metadata: self.context.metadata().clone(),
        }
    }
}

/// The state of one open streaming call.
///
/// Lives from stream open until both directions have finished and the
/// outcome has been handed to the caller.
#[derive(Debug)]
pub struct StreamSession {
    shape: CallShape,
    method: &'static str,
    latch: CompletionLatch,
    error: OnceLock<CallError>,
    cancel: CancellationToken,
    opened: AtomicBool,
    headers: OnceLock<Metadata>,
    responses: Mutex<Vec<CallResponse>>,
    sent: AtomicUsize,
}

impl StreamSession {
    fn new(
        context: &CallContext,
        directions: usize,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            shape: context.shape(),
            method: context.method(),
            latch: CompletionLatch::new(directions),
            error: OnceLock::new(),
            cancel,
            opened: AtomicBool::new(false),
            headers: OnceLock::new(),
            responses: Mutex::new(Vec::new()),
            sent: AtomicUsize::new(0),
        })
    }

    /// Records `error` if no error has been recorded yet. Returns whether it
    /// was recorded.
    pub fn record_error(&self, error: CallError) -> bool {
        let recorded = self.error.set(error.clone()).is_ok();
        if recorded {
            warn!(method = self.method, shape = %self.shape, error = %error, "stream failed");
        } else {
            debug!(method = self.method, error = %error, "dropping error observed after the first");
        }
        recorded
    }

    /// Records `error` and cancels both directions.
    pub fn fail(&self, error: CallError) {
        self.record_error(error);
        self.cancel.cancel();
    }

    /// The first recorded error.
    pub fn error(&self) -> Option<&CallError> {
        self.error.get()
    }

    /// Cancels both directions.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns true once the session has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Returns true once the stream has been established.
    pub fn is_opened(&self) -> bool {
        self.opened.load(Ordering::Acquire)
    }

    /// Waits until every direction has finished.
    pub async fn join(&self) {
        self.latch.wait().await;
    }

    fn direction(self: &Arc<Self>, name: &'static str) -> DirectionGuard {
        DirectionGuard {
            session: Arc::clone(self),
            name,
        }
    }

    fn mark_opened(&self, headers: Metadata) {
        let _ = self.headers.set(headers);
        self.opened.store(true, Ordering::Release);
    }

    fn push_response(&self, response: CallResponse) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(response);
    }

    /// Waits for the join point, enforcing `deadline` while waiting.
    async fn finish(&self, deadline: Option<Deadline>) {
        let Some(deadline) = deadline else {
            self.join().await;
            return;
        };
        tokio::select! {
            _ = self.join() => {}
            _ = tokio::time::sleep_until(deadline.at()) => {
                self.fail(deadline.exceeded());
                self.join().await;
            }
        }
    }

    fn outcome(&self) -> StreamOutcome {
        StreamOutcome {
            shape: self.shape,
            opened: self.is_opened(),
            headers: self.headers.get().cloned().unwrap_or_default(),
            responses: std::mem::take(
                &mut *self.responses.lock().unwrap_or_else(PoisonError::into_inner),
            ),
            sent: self.sent.load(Ordering::Acquire),
            error: self.error.get().cloned(),
        }
    }
}

/// Counts its direction down on drop.
struct DirectionGuard {
    session: Arc<StreamSession>,
    name: &'static str,
}

impl Drop for DirectionGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.session.fail(CallError::Cancelled);
        }
        trace!(method = self.session.method, direction = self.name, "direction finished");
        self.session.latch.count_down();
    }
}

/// What a streaming call produced, released at the join point.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub struct StreamOutcome {
    /// The call's shape.
    pub shape: CallShape,
    /// Whether the stream was established.
    pub opened: bool,
    /// Header metadata received when the stream opened.
    pub headers: Metadata,
    /// Responses processed before the stream ended, in arrival order.
    pub responses: Vec<CallResponse>,
    /// Requests handed to the outbound stream.
    pub sent: usize,
    /// The first stream-fatal error, if any. `None` means a graceful end of
    /// stream.
    pub error: Option<CallError>,
}

impl StreamOutcome {
    /// An outcome for a call that never started.
    pub fn rejected(shape: CallShape, error: CallError) -> Self {
        Self {
            shape,
            opened: false,
            headers: Metadata::new(),
            responses: Vec::new(),
            sent: 0,
            error: Some(error),
        }
    }

    /// Returns true if the stream ended gracefully.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// The responses, or the stream-fatal error.
    pub fn into_result(self) -> Result<Vec<CallResponse>, CallError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.responses),
        }
    }
}

/// Runs the streaming call shapes against a transport.
#[derive(Clone)]
pub struct DuplexStreamDriver {
    transport: Arc<dyn ResiliencyTransport>,
    interceptors: InterceptorChain,
    buffer: usize,
}

impl std::fmt::Debug for DuplexStreamDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplexStreamDriver")
            .field("interceptors", &self.interceptors)
            .field("buffer", &self.buffer)
            .finish_non_exhaustive()
    }
}

impl DuplexStreamDriver {
    /// Creates a driver.
    pub fn new(transport: Arc<dyn ResiliencyTransport>, interceptors: InterceptorChain) -> Self {
        Self {
            transport,
            interceptors,
            buffer: 8,
        }
    }

    /// Sets how many outbound requests may be queued ahead of the transport.
    ///
    /// Default: 8
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    /// Sends one request and drains the response stream.
    pub async fn server_streaming(&self, call: StreamCall, request: CallRequest) -> StreamOutcome {
        let session = StreamSession::new(call.context(), 1, call.cancel.child_token());
        let receive = session.direction("receive");

        let transport = Arc::clone(&self.transport);
        let chain = self.interceptors.clone();
        let context = Arc::clone(&call.context);
        let options = call.options();
        let task_session = Arc::clone(&session);
        tokio::spawn(async move {
            let _receive = receive;
            let session = task_session;
            let request = match chain.before_send(&context, request) {
                Ok(request) => request,
                Err(error) => return session.fail(error),
            };
            let opened = tokio::select! {
                biased;
                _ = session.cancel.cancelled() => return cancelled(&session),
                opened = transport.server_streaming(request, options) => opened,
            };
            match opened {
                Ok(opened) => {
                    session.sent.fetch_add(1, Ordering::AcqRel);
                    session.mark_opened(opened.headers);
                    receive_loop(&session, &chain, &context, opened.messages).await;
                }
                Err(error) => session.fail(error.into()),
            }
        });

        session.finish(call.deadline).await;
        session.outcome()
    }

    /// Sends every request, then waits for the single response.
    pub async fn client_streaming(
        &self,
        call: StreamCall,
        requests: Vec<CallRequest>,
    ) -> StreamOutcome {
        let session = StreamSession::new(call.context(), 2, call.cancel.child_token());
        let (tx, rx) = mpsc::channel(self.buffer);
        self.spawn_send_loop(&session, &call, requests, tx);

        let receive = session.direction("receive");
        let transport = Arc::clone(&self.transport);
        let chain = self.interceptors.clone();
        let context = Arc::clone(&call.context);
        let options = call.options();
        let task_session = Arc::clone(&session);
        tokio::spawn(async move {
            let _receive = receive;
            let session = task_session;
            let outbound = ReceiverStream::new(rx).boxed();
            let response = tokio::select! {
                biased;
                _ = session.cancel.cancelled() => return cancelled(&session),
                response = transport.client_streaming(outbound, options) => response,
            };
            match response {
                Ok(response) => {
                    session.mark_opened(response.headers().clone());
                    accept(&session, &chain, &context, response);
                }
                Err(error) => session.fail(error.into()),
            }
        });

        session.finish(call.deadline).await;
        session.outcome()
    }

    /// Sends requests and receives responses concurrently until both
    /// directions are done.
    pub async fn bidi_streaming(
        &self,
        call: StreamCall,
        requests: Vec<CallRequest>,
    ) -> StreamOutcome {
        let session = StreamSession::new(call.context(), 2, call.cancel.child_token());
        let (tx, rx) = mpsc::channel(self.buffer);
        self.spawn_send_loop(&session, &call, requests, tx);

        let receive = session.direction("receive");
        let transport = Arc::clone(&self.transport);
        let chain = self.interceptors.clone();
        let context = Arc::clone(&call.context);
        let options = call.options();
        let task_session = Arc::clone(&session);
        tokio::spawn(async move {
            let _receive = receive;
            let session = task_session;
            let outbound = ReceiverStream::new(rx).boxed();
            let opened = tokio::select! {
                biased;
                _ = session.cancel.cancelled() => return cancelled(&session),
                opened = transport.bidi_streaming(outbound, options) => opened,
            };
            match opened {
                Ok(opened) => {
                    session.mark_opened(opened.headers);
                    receive_loop(&session, &chain, &context, opened.messages).await;
                }
                Err(error) => session.fail(error.into()),
            }
        });

        session.finish(call.deadline).await;
        session.outcome()
    }

    fn spawn_send_loop(
        &self,
        session: &Arc<StreamSession>,
        call: &StreamCall,
        requests: Vec<CallRequest>,
        tx: mpsc::Sender<CallRequest>,
    ) {
        let send = session.direction("send");
        let chain = self.interceptors.clone();
        let context = Arc::clone(&call.context);
        let session = Arc::clone(session);
        tokio::spawn(async move {
            let _send = send;
            for request in requests {
                let request = match chain.before_send(&context, request) {
                    Ok(request) => request,
                    Err(error) => return session.fail(error),
                };
                tokio::select! {
                    biased;
                    _ = session.cancel.cancelled() => return cancelled(&session),
                    sent = tx.send(request) => {
                        if sent.is_err() {
                            debug!(
                                method = session.method,
                                "peer stopped reading; ending send loop"
                            );
                            return;
                        }
                        session.sent.fetch_add(1, Ordering::AcqRel);
                    }
                }
            }
            trace!(
                method = session.method,
                sent = session.sent.load(Ordering::Acquire),
                "all requests sent"
            );
            // Dropping the sender closes the outbound stream.
            drop(tx);
        });
    }
}

fn cancelled(session: &StreamSession) {
    session.record_error(CallError::Cancelled);
}

/// Checks the in-band status, intercepts and keeps one response. Returns
/// false if the response ended the stream.
fn accept(
    session: &StreamSession,
    chain: &InterceptorChain,
    context: &CallContext,
    response: CallResponse,
) -> bool {
    if !response.status().is_ok() {
        session.fail(
            TransportError::new(response.status(), response.payload().to_string()).into(),
        );
        return false;
    }
    match chain.after_receive(context, response) {
        Ok(response) => {
            info!(method = session.method, payload = response.payload(), "response from server");
            session.push_response(response);
            true
        }
        Err(error) => {
            session.fail(error);
            false
        }
    }
}

async fn receive_loop(
    session: &StreamSession,
    chain: &InterceptorChain,
    context: &CallContext,
    mut messages: ResponseStream,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = session.cancel.cancelled() => return cancelled(session),
            next = messages.next() => next,
        };
        match next {
            None => {
                debug!(method = session.method, "end of stream");
                return;
            }
            Some(Ok(response)) => {
                if !accept(session, chain, context, response) {
                    return;
                }
            }
            Some(Err(error)) => {
                if session.is_cancelled() {
                    debug!(
                        method = session.method,
                        error = %error,
                        "stream closed after cancellation"
                    );
                }
                session.fail(error.into());
                return;
            }
        }
    }
}
