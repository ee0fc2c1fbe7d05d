//! Ready-made interceptor stages.

use crate::interceptor::{CallContext, CallShape, Interceptor};
use crate::message::{CallRequest, CallResponse};
use crate::metadata::Metadata;
use rpc_resilience_core::CallError;

/// Logs every call start and every outbound request.
#[derive(Debug, Clone, Default)]
pub struct LoggingInterceptor;

impl Interceptor for LoggingInterceptor {
    fn name(&self) -> &str {
        "logging"
    }

    fn on_call_start(&self, ctx: &mut CallContext) -> Result<(), CallError> {
        if ctx.shape().is_streaming() {
            tracing::info!(method = ctx.method(), shape = %ctx.shape(), "opening stream");
        }
        Ok(())
    }

    fn before_send(
        &self,
        ctx: &CallContext,
        request: CallRequest,
    ) -> Result<CallRequest, CallError> {
        tracing::info!(
            method = ctx.method(),
            shape = %ctx.shape(),
            min_delay = request.min_delay_seconds(),
            max_delay = request.max_delay_seconds(),
            codes = ?request.desired_status_codes(),
            payload = request.payload(),
            "sending request"
        );
        Ok(request)
    }
}

/// Prefixes outbound and inbound payloads with fixed tags.
///
/// Applies only to the shapes it was built for.
#[derive(Debug, Clone)]
pub struct PayloadTagInterceptor {
    outbound: Option<String>,
    inbound: Option<String>,
    shapes: Vec<CallShape>,
}

impl PayloadTagInterceptor {
    /// A stage that tags nothing, for every shape.
    pub fn new() -> Self {
        Self {
            outbound: None,
            inbound: None,
            shapes: CallShape::ALL.to_vec(),
        }
    }

    /// Prefix for outbound request payloads.
    pub fn outbound(mut self, tag: impl Into<String>) -> Self {
        self.outbound = Some(tag.into());
        self
    }

    /// Prefix for inbound response payloads.
    pub fn inbound(mut self, tag: impl Into<String>) -> Self {
        self.inbound = Some(tag.into());
        self
    }

    /// Restricts the stage to `shapes`.
    pub fn only(mut self, shapes: impl IntoIterator<Item = CallShape>) -> Self {
        self.shapes = shapes.into_iter().collect();
        self
    }
}

impl Default for PayloadTagInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl Interceptor for PayloadTagInterceptor {
    fn name(&self) -> &str {
        "payload-tag"
    }

    fn applies_to(&self, shape: CallShape) -> bool {
        self.shapes.contains(&shape)
    }

    fn before_send(
        &self,
        _ctx: &CallContext,
        request: CallRequest,
    ) -> Result<CallRequest, CallError> {
        Ok(match &self.outbound {
            Some(tag) => request.with_payload(format!("{tag}{}", request.payload())),
            None => request,
        })
    }

    fn after_receive(
        &self,
        _ctx: &CallContext,
        response: CallResponse,
    ) -> Result<CallResponse, CallError> {
        Ok(match &self.inbound {
            Some(tag) => response.with_payload(format!("{tag}{}", response.payload())),
            None => response,
        })
    }
}

/// Adds a fixed set of request metadata to every call.
#[derive(Debug, Clone, Default)]
pub struct StaticMetadataInterceptor {
    metadata: Metadata,
}

impl StaticMetadataInterceptor {
    /// Creates a stage adding `metadata`.
    pub fn new(metadata: Metadata) -> Self {
        Self { metadata }
    }

    /// Adds one pair.
    pub fn pair(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key, value);
        self
    }
}

impl Interceptor for StaticMetadataInterceptor {
    fn name(&self) -> &str {
        "static-metadata"
    }

    fn on_call_start(&self, ctx: &mut CallContext) -> Result<(), CallError> {
        for (key, value) in self.metadata.iter() {
            ctx.insert_metadata(key, value);
        }
        Ok(())
    }
}

/// Metadata key carrying the client's wall-clock time.
pub const CLIENT_TIME_KEY: &str = "grpc-client-time";
/// Metadata key carrying the client's operating system.
pub const CLIENT_OS_KEY: &str = "grpc-client-os";
/// Metadata key carrying a fresh identifier per call.
pub const REQUEST_UUID_KEY: &str = "grpc-request-uuid";

/// Describes the calling client: local time, OS, and a random request id.
#[derive(Debug, Clone, Default)]
pub struct RequestMetadataInterceptor;

impl Interceptor for RequestMetadataInterceptor {
    fn name(&self) -> &str {
        "request-metadata"
    }

    fn on_call_start(&self, ctx: &mut CallContext) -> Result<(), CallError> {
        ctx.insert_metadata(
            CLIENT_TIME_KEY,
            chrono::Local::now().format("%H:%M:%S").to_string(),
        );
        ctx.insert_metadata(CLIENT_OS_KEY, std::env::consts::OS);
        ctx.insert_metadata(REQUEST_UUID_KEY, uuid::Uuid::new_v4().to_string());
        Ok(())
    }
}
