//! The seam between the resiliency layer and the wire.
//!
//! [`ResiliencyTransport`] exposes the four call shapes of the resiliency
//! service. The tonic adapter in [`crate::grpc`] talks to a real server;
//! [`crate::simulation::SimulatedTransport`] answers in-process.

use crate::message::{CallRequest, CallResponse};
use crate::metadata::Metadata;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use rpc_resilience_core::TransportError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Method paths of the resiliency service.
pub mod methods {
    /// Unary call.
    pub const UNARY: &str = "/resiliency.ResiliencyService/UnaryResiliency";
    /// Server-streaming call.
    pub const SERVER_STREAMING: &str = "/resiliency.ResiliencyService/ServerResiliency";
    /// Client-streaming call.
    pub const CLIENT_STREAMING: &str = "/resiliency.ResiliencyService/ClientResiliency";
    /// Bidirectional-streaming call.
    pub const BIDI_STREAMING: &str = "/resiliency.ResiliencyService/BiDirectionalResiliency";
}

/// Outbound messages of a streaming call. The stream ending means
/// "no more sends".
pub type RequestStream = BoxStream<'static, CallRequest>;

/// Inbound messages of a streaming call. `None` is a graceful end of stream.
pub type ResponseStream = BoxStream<'static, Result<CallResponse, TransportError>>;

/// Per-call options handed to the transport.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Time left before the call's deadline, if it has one.
    pub timeout: Option<Duration>,
    /// Request metadata to send with the call.
    pub metadata: Metadata,
}

/// An opened response stream.
pub struct StreamingResponse {
    /// Header metadata received when the stream opened.
    pub headers: Metadata,
    /// The inbound messages.
    pub messages: ResponseStream,
}

impl StreamingResponse {
    /// Creates a streaming response.
    pub fn new(headers: Metadata, messages: ResponseStream) -> Self {
        Self { headers, messages }
    }
}

impl fmt::Debug for StreamingResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingResponse")
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// A connected transport exposing the four call shapes.
///
/// Implementations must be safe to call concurrently; the returned futures
/// own everything they need.
pub trait ResiliencyTransport: Send + Sync + 'static {
    /// One request, one response.
    fn unary(
        &self,
        request: CallRequest,
        options: CallOptions,
    ) -> BoxFuture<'static, Result<CallResponse, TransportError>>;

    /// One request; resolves once the response stream is open.
    fn server_streaming(
        &self,
        request: CallRequest,
        options: CallOptions,
    ) -> BoxFuture<'static, Result<StreamingResponse, TransportError>>;

    /// Sends every request from `requests`, then resolves with the single
    /// response.
    fn client_streaming(
        &self,
        requests: RequestStream,
        options: CallOptions,
    ) -> BoxFuture<'static, Result<CallResponse, TransportError>>;

    /// Sends `requests` while the returned stream yields responses.
    fn bidi_streaming(
        &self,
        requests: RequestStream,
        options: CallOptions,
    ) -> BoxFuture<'static, Result<StreamingResponse, TransportError>>;
}

impl<T: ResiliencyTransport + ?Sized> ResiliencyTransport for Arc<T> {
    fn unary(
        &self,
        request: CallRequest,
        options: CallOptions,
    ) -> BoxFuture<'static, Result<CallResponse, TransportError>> {
        (**self).unary(request, options)
    }

    fn server_streaming(
        &self,
        request: CallRequest,
        options: CallOptions,
    ) -> BoxFuture<'static, Result<StreamingResponse, TransportError>> {
        (**self).server_streaming(request, options)
    }

    fn client_streaming(
        &self,
        requests: RequestStream,
        options: CallOptions,
    ) -> BoxFuture<'static, Result<CallResponse, TransportError>> {
        (**self).client_streaming(requests, options)
    }

    fn bidi_streaming(
        &self,
        requests: RequestStream,
        options: CallOptions,
    ) -> BoxFuture<'static, Result<StreamingResponse, TransportError>> {
        (**self).bidi_streaming(requests, options)
    }
}
