//! A transport that replays a fixed script of stream items.

use futures::future::BoxFuture;
use futures::StreamExt;
use rpc_resilience_client::transport::{RequestStream, ResponseStream};
use rpc_resilience_client::{
    CallOptions, CallRequest, CallResponse, Metadata, ResiliencyTransport, StreamingResponse,
};
use rpc_resilience_core::{OutcomeCode, TransportError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Item = Result<CallResponse, TransportError>;

/// Replays `(delay, item)` pairs as the response stream of every streaming
/// call, or never opens at all.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Vec<(Duration, Item)>>,
    hang_on_open: bool,
    received: Arc<Mutex<Vec<String>>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<(Duration, Item)>) -> Self {
        Self {
            script: Arc::new(script),
            ..Self::default()
        }
    }

    /// A peer that accepts the call but never answers the open.
    pub fn hanging() -> Self {
        Self {
            hang_on_open: true,
            ..Self::default()
        }
    }

    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    fn responses(&self) -> ResponseStream {
        let script = (*self.script).clone();
        futures::stream::iter(script)
            .then(|(delay, item)| async move {
                tokio::time::sleep(delay).await;
                item
            })
            .boxed()
    }

    fn drain(&self, mut requests: RequestStream) {
        let received = Arc::clone(&self.received);
        tokio::spawn(async move {
            while let Some(request) = requests.next().await {
                received.lock().unwrap().push(request.payload().to_string());
            }
        });
    }
}

pub fn ok(delay_ms: u64, payload: &str) -> (Duration, Item) {
    (Duration::from_millis(delay_ms), Ok(CallResponse::ok(payload)))
}

pub fn fail(delay_ms: u64, code: OutcomeCode) -> (Duration, Item) {
    (
        Duration::from_millis(delay_ms),
        Err(TransportError::new(code, format!("scripted {code}"))),
    )
}

fn headers() -> Metadata {
    let mut headers = Metadata::new();
    headers.insert("scripted", "true");
    headers
}

impl ResiliencyTransport for ScriptedTransport {
    fn unary(
        &self,
        _request: CallRequest,
        _options: CallOptions,
    ) -> BoxFuture<'static, Result<CallResponse, TransportError>> {
        let mut responses = self.responses();
        let hang = self.hang_on_open;
        Box::pin(async move {
            if hang {
                futures::future::pending::<()>().await;
            }
            responses
                .next()
                .await
                .unwrap_or_else(|| Err(TransportError::new(OutcomeCode::Unknown, "empty script")))
        })
    }

    fn server_streaming(
        &self,
        request: CallRequest,
        _options: CallOptions,
    ) -> BoxFuture<'static, Result<StreamingResponse, TransportError>> {
        let this = self.clone();
        Box::pin(async move {
            if this.hang_on_open {
                futures::future::pending::<()>().await;
            }
            this.received.lock().unwrap().push(request.payload().to_string());
            Ok(StreamingResponse::new(headers(), this.responses()))
        })
    }

    fn client_streaming(
        &self,
        mut requests: RequestStream,
        _options: CallOptions,
    ) -> BoxFuture<'static, Result<CallResponse, TransportError>> {
        let this = self.clone();
        Box::pin(async move {
            if this.hang_on_open {
                let _requests = requests;
                futures::future::pending::<()>().await;
                unreachable!();
            }
            let mut count = 0;
            while let Some(request) = requests.next().await {
                this.received.lock().unwrap().push(request.payload().to_string());
                count += 1;
            }
            Ok(CallResponse::ok(format!("{count}")).with_headers(headers()))
        })
    }

    fn bidi_streaming(
        &self,
        requests: RequestStream,
        _options: CallOptions,
    ) -> BoxFuture<'static, Result<StreamingResponse, TransportError>> {
        let this = self.clone();
        Box::pin(async move {
            if this.hang_on_open {
                // Hold the outbound stream open without reading it.
                let _requests = requests;
                futures::future::pending::<()>().await;
                unreachable!();
            }
            this.drain(requests);
            Ok(StreamingResponse::new(headers(), this.responses()))
        })
    }
}
