//! Request/response interception around every call.
//!
//! An [`InterceptorChain`] holds an ordered list of stages. Outbound requests
//! pass through the stages first to last; inbound responses pass through them
//! last to first, so the stage that touched a request last is the first to see
//! its response.
//!
//! A stage may refuse a call by returning a [`CallError`]; the remaining stages
//! are skipped and the error is returned to the caller.

use crate::message::{CallRequest, CallResponse};
use crate::metadata::Metadata;
use rpc_resilience_core::CallError;
use std::fmt;
use std::sync::Arc;

/// The four call shapes of the resiliency service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallShape {
    /// One request, one response.
    Unary,
    /// One request, a stream of responses.
    ServerStreaming,
    /// A stream of requests, one response.
    ClientStreaming,
    /// Streams in both directions.
    BidiStreaming,
}

impl CallShape {
    /// All shapes.
    pub const ALL: [CallShape; 4] = [
        CallShape::Unary,
        CallShape::ServerStreaming,
        CallShape::ClientStreaming,
        CallShape::BidiStreaming,
    ];

    /// Returns true for the shapes that stream in at least one direction.
    pub fn is_streaming(self) -> bool {
        !matches!(self, CallShape::Unary)
    }

    /// Label used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            CallShape::Unary => "unary",
            CallShape::ServerStreaming => "server_streaming",
            CallShape::ClientStreaming => "client_streaming",
            CallShape::BidiStreaming => "bidi_streaming",
        }
    }
}

impl fmt::Display for CallShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-call state shared by the interceptor stages.
#[derive(Debug, Clone)]
pub struct CallContext {
    method: &'static str,
    shape: CallShape,
    metadata: Metadata,
}

impl CallContext {
    /// Creates the context of a call to `method`.
    pub fn new(method: &'static str, shape: CallShape) -> Self {
        Self {
            method,
            shape,
            metadata: Metadata::new(),
        }
    }

    /// Full method path, e.g. `/resiliency.ResiliencyService/UnaryResiliency`.
    pub fn method(&self) -> &'static str {
        self.method
    }

    /// The call's shape.
    pub fn shape(&self) -> CallShape {
        self.shape
    }

    /// Request metadata accumulated so far.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Adds request metadata. A later insert of the same key wins.
    pub fn insert_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key, value);
    }
}

/// One stage of an [`InterceptorChain`].
///
/// Every hook has a pass-through default, so a stage implements only what it
/// needs. A stage that returns `false` from [`applies_to`](Self::applies_to)
/// for a shape is skipped entirely for calls of that shape.
pub trait Interceptor: Send + Sync {
    /// Name used in logs and in [`CallError::Interceptor`].
    fn name(&self) -> &str;

    /// Whether this stage takes part in calls of `shape`.
    fn applies_to(&self, _shape: CallShape) -> bool {
        true
    }

    /// Runs once per call, before anything is sent. Request metadata is added
    /// here.
    fn on_call_start(&self, _ctx: &mut CallContext) -> Result<(), CallError> {
        Ok(())
    }

    /// Transforms an outbound request.
    fn before_send(
        &self,
        _ctx: &CallContext,
        request: CallRequest,
    ) -> Result<CallRequest, CallError> {
        Ok(request)
    }

    /// Transforms an inbound response.
    fn after_receive(
        &self,
        _ctx: &CallContext,
        response: CallResponse,
    ) -> Result<CallResponse, CallError> {
        Ok(response)
    }
}

/// An ordered set of interceptor stages.
///
/// Cloning is cheap; stages are shared.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    stages: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorChain {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage. Stages run outbound in the order they are added.
    pub fn with<I>(mut self, stage: I) -> Self
    where
        I: Interceptor + 'static,
    {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Appends an already shared stage.
    pub fn with_shared(mut self, stage: Arc<dyn Interceptor>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if the chain has no stages.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    fn active<'a>(
        &'a self,
        shape: CallShape,
    ) -> impl DoubleEndedIterator<Item = &'a Arc<dyn Interceptor>> + 'a {
        self.stages
            .iter()
            .filter(move |stage| stage.applies_to(shape))
    }

    /// Creates the context for a call and lets every stage add its metadata.
    pub fn start_call(
        &self,
        method: &'static str,
        shape: CallShape,
    ) -> Result<CallContext, CallError> {
        let mut ctx = CallContext::new(method, shape);
        for stage in self.active(shape) {
            stage.on_call_start(&mut ctx)?;
        }
        Ok(ctx)
    }

    /// Passes an outbound request through the stages, first to last.
    pub fn before_send(
        &self,
        ctx: &CallContext,
        request: CallRequest,
    ) -> Result<CallRequest, CallError> {
        self.active(ctx.shape())
            .try_fold(request, |request, stage| stage.before_send(ctx, request))
    }

    /// Passes an inbound response through the stages, last to first.
    pub fn after_receive(
        &self,
        ctx: &CallContext,
        response: CallResponse,
    ) -> Result<CallResponse, CallError> {
        self.active(ctx.shape())
            .rev()
            .try_fold(response, |response, stage| stage.after_receive(ctx, response))
    }
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.stages.iter().map(|stage| stage.name()))
            .finish()
    }
}
