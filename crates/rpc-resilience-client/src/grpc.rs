//! Tonic transport for the resiliency service.
//!
//! Messages are declared with `prost` derives rather than generated from the
//! `.proto` file, so building the crate needs no protobuf compiler.

use crate::message::{CallRequest, CallResponse};
use crate::metadata::Metadata;
use crate::transport::{
    methods, CallOptions, RequestStream, ResiliencyTransport, StreamingResponse,
};
use futures::future::BoxFuture;
use futures::StreamExt;
use prost::Message;
use rpc_resilience_core::{ErrorDetail, OutcomeCode, PreconditionViolation, TransportError};
use tonic::client::Grpc;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::metadata::{Ascii, KeyAndValueRef, MetadataKey, MetadataMap, MetadataValue};
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Status};

/// Wire messages.
pub mod proto {
    use std::collections::BTreeMap;

    /// `resiliency.ResiliencyRequest`
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ResiliencyRequest {
        #[prost(uint32, tag = "1")]
        pub min_delay_second: u32,
        #[prost(uint32, tag = "2")]
        pub max_delay_second: u32,
        #[prost(uint32, repeated, tag = "3")]
        pub status_codes: Vec<u32>,
        #[prost(string, tag = "4")]
        pub payload: String,
    }

    /// `resiliency.ResiliencyResponse`
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ResiliencyResponse {
        #[prost(string, tag = "1")]
        pub dummy_string: String,
    }

    /// `google.rpc.Status`, carried in the `grpc-status-details-bin` trailer.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct RpcStatus {
        #[prost(int32, tag = "1")]
        pub code: i32,
        #[prost(string, tag = "2")]
        pub message: String,
        #[prost(message, repeated, tag = "3")]
        pub details: Vec<Any>,
    }

    /// `google.protobuf.Any`
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Any {
        #[prost(string, tag = "1")]
        pub type_url: String,
        #[prost(bytes = "vec", tag = "2")]
        pub value: Vec<u8>,
    }

    /// `google.rpc.PreconditionFailure`
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct PreconditionFailure {
        #[prost(message, repeated, tag = "1")]
        pub violations: Vec<precondition_failure::Violation>,
    }

    /// Nested messages of [`PreconditionFailure`].
    pub mod precondition_failure {
        /// `google.rpc.PreconditionFailure.Violation`
        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct Violation {
            #[prost(string, tag = "1")]
            pub r#type: String,
            #[prost(string, tag = "2")]
            pub subject: String,
            #[prost(string, tag = "3")]
            pub description: String,
        }
    }

    /// `google.rpc.ErrorInfo`
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ErrorInfo {
        #[prost(string, tag = "1")]
        pub reason: String,
        #[prost(string, tag = "2")]
        pub domain: String,
        #[prost(btree_map = "string, string", tag = "3")]
        pub metadata: BTreeMap<String, String>,
    }
}

const PRECONDITION_FAILURE_TYPE: &str = "google.rpc.PreconditionFailure";
const ERROR_INFO_TYPE: &str = "google.rpc.ErrorInfo";

/// [`ResiliencyTransport`] over a tonic [`Channel`].
#[derive(Debug, Clone)]
pub struct GrpcTransport {
    inner: Grpc<Channel>,
}

impl GrpcTransport {
    /// Wraps an established channel.
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: Grpc::new(channel),
        }
    }

    /// Dials `dst` (e.g. `http://localhost:9090`) without transport security.
    pub async fn connect(dst: impl Into<String>) -> Result<Self, tonic::transport::Error> {
        let channel = Endpoint::from_shared(dst.into())?.connect().await?;
        Ok(Self::new(channel))
    }

    async fn ready(inner: &mut Grpc<Channel>) -> Result<(), TransportError> {
        inner.ready().await.map_err(|e| {
            TransportError::new(OutcomeCode::Unknown, format!("service was not ready: {e}"))
        })
    }
}

fn to_proto(request: CallRequest) -> proto::ResiliencyRequest {
    proto::ResiliencyRequest {
        min_delay_second: request.min_delay_seconds(),
        max_delay_second: request.max_delay_seconds(),
        status_codes: request
            .desired_status_codes()
            .iter()
            .map(|code| code.as_u32())
            .collect(),
        payload: request.payload().to_string(),
    }
}

fn from_proto(response: proto::ResiliencyResponse) -> CallResponse {
    CallResponse::ok(response.dummy_string)
}

/// Builds a tonic request carrying the call's metadata and deadline.
///
/// Metadata that is not valid ASCII gRPC metadata is skipped with a warning.
fn into_request<T>(message: T, options: &CallOptions) -> Request<T> {
    let mut request = Request::new(message);
    for (key, value) in options.metadata.iter() {
        let key = match MetadataKey::<Ascii>::from_bytes(key.as_bytes()) {
            Ok(key) => key,
            Err(_) => {
                tracing::warn!(key, "skipping invalid metadata key");
                continue;
            }
        };
        match value.parse::<MetadataValue<Ascii>>() {
            Ok(value) => {
                request.metadata_mut().insert(key, value);
            }
            Err(_) => tracing::warn!(key = key.as_str(), "skipping invalid metadata value"),
        }
    }
    if let Some(timeout) = options.timeout {
        request.set_timeout(timeout);
    }
    request
}

/// Copies the ASCII entries of a tonic metadata map.
fn metadata_from(map: &MetadataMap) -> Metadata {
    let mut metadata = Metadata::new();
    for entry in map.iter() {
        if let KeyAndValueRef::Ascii(key, value) = entry {
            if let Ok(value) = value.to_str() {
                metadata.insert(key.as_str(), value);
            }
        }
    }
    metadata
}

/// Converts a tonic status, decoding `google.rpc` detail records.
pub fn status_to_error(status: &Status) -> TransportError {
    let code = match OutcomeCode::from_u32_lossy(status.code() as i32 as u32) {
        // A failed call never reports OK.
        OutcomeCode::Ok => OutcomeCode::Unknown,
        code => code,
    };
    let mut error = TransportError::new(code, status.message());
    for detail in decode_details(status.details()) {
        error = error.with_detail(detail);
    }
    error
}

fn decode_details(bytes: &[u8]) -> Vec<ErrorDetail> {
    if bytes.is_empty() {
        return Vec::new();
    }
    let status = match proto::RpcStatus::decode(bytes) {
        Ok(status) => status,
        Err(e) => {
            tracing::debug!(error = %e, "undecodable status details");
            return Vec::new();
        }
    };

    status
        .details
        .iter()
        .filter_map(|any| {
            let type_name = any.type_url.rsplit('/').next().unwrap_or_default();
            match type_name {
                PRECONDITION_FAILURE_TYPE => {
                    proto::PreconditionFailure::decode(any.value.as_slice())
                        .ok()
                        .map(|failure| {
                            ErrorDetail::PreconditionFailure(
                                failure
                                    .violations
                                    .into_iter()
                                    .map(|violation| PreconditionViolation {
                                        field: if violation.subject.is_empty() {
                                            violation.r#type
                                        } else {
                                            violation.subject
                                        },
                                        description: violation.description,
                                    })
                                    .collect(),
                            )
                        })
                }
                ERROR_INFO_TYPE => proto::ErrorInfo::decode(any.value.as_slice())
                    .ok()
                    .map(|info| ErrorDetail::ErrorInfo {
                        domain: info.domain,
                        reason: info.reason,
                        metadata: info.metadata,
                    }),
                other => {
                    tracing::debug!(type_url = other, "ignoring unsupported status detail");
                    None
                }
            }
        })
        .collect()
}

fn response_stream(
    streaming: tonic::Streaming<proto::ResiliencyResponse>,
) -> crate::transport::ResponseStream {
    streaming
        .map(|item| item.map(from_proto).map_err(|status| status_to_error(&status)))
        .boxed()
}

impl ResiliencyTransport for GrpcTransport {
    fn unary(
        &self,
        request: CallRequest,
        options: CallOptions,
    ) -> BoxFuture<'static, Result<CallResponse, TransportError>> {
        let mut inner = self.inner.clone();
        Box::pin(async move {
            Self::ready(&mut inner).await?;
            let codec = tonic_prost::ProstCodec::default();
            let path = PathAndQuery::from_static(methods::UNARY);
            let response = inner
                .unary(into_request(to_proto(request), &options), path, codec)
                .await
                .map_err(|status| status_to_error(&status))?;
            let headers = metadata_from(response.metadata());
            Ok(from_proto(response.into_inner()).with_headers(headers))
        })
    }

    fn server_streaming(
        &self,
        request: CallRequest,
        options: CallOptions,
    ) -> BoxFuture<'static, Result<StreamingResponse, TransportError>> {
        let mut inner = self.inner.clone();
        Box::pin(async move {
            Self::ready(&mut inner).await?;
            let codec = tonic_prost::ProstCodec::default();
            let path = PathAndQuery::from_static(methods::SERVER_STREAMING);
            let response = inner
                .server_streaming(into_request(to_proto(request), &options), path, codec)
                .await
                .map_err(|status| status_to_error(&status))?;
            let headers = metadata_from(response.metadata());
            Ok(StreamingResponse::new(
                headers,
                response_stream(response.into_inner()),
            ))
        })
    }

    fn client_streaming(
        &self,
        requests: RequestStream,
        options: CallOptions,
    ) -> BoxFuture<'static, Result<CallResponse, TransportError>> {
        let mut inner = self.inner.clone();
        Box::pin(async move {
            Self::ready(&mut inner).await?;
            let codec = tonic_prost::ProstCodec::default();
            let path = PathAndQuery::from_static(methods::CLIENT_STREAMING);
            let response = inner
                .client_streaming(into_request(requests.map(to_proto), &options), path, codec)
                .await
                .map_err(|status| status_to_error(&status))?;
            let headers = metadata_from(response.metadata());
            Ok(from_proto(response.into_inner()).with_headers(headers))
        })
    }

    fn bidi_streaming(
        &self,
        requests: RequestStream,
        options: CallOptions,
    ) -> BoxFuture<'static, Result<StreamingResponse, TransportError>> {
        let mut inner = self.inner.clone();
        Box::pin(async move {
            Self::ready(&mut inner).await?;
            let codec = tonic_prost::ProstCodec::default();
            let path = PathAndQuery::from_static(methods::BIDI_STREAMING);
            let response = inner
                .streaming(into_request(requests.map(to_proto), &options), path, codec)
                .await
                .map_err(|status| status_to_error(&status))?;
            let headers = metadata_from(response.metadata());
            Ok(StreamingResponse::new(
                headers,
                response_stream(response.into_inner()),
            ))
        })
    }
}
