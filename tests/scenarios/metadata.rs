use super::init_tracing;
use rpc_resilience_client::stages::{CLIENT_OS_KEY, CLIENT_TIME_KEY, REQUEST_UUID_KEY};
use rpc_resilience_client::transport::methods;
use rpc_resilience_client::{
    CallRequest, RequestMetadataInterceptor, ResiliencyClient, SimulatedTransport,
    StaticMetadataInterceptor,
};
use rpc_resilience_core::OutcomeCode;

fn metadata_client(peer: &SimulatedTransport) -> ResiliencyClient {
    ResiliencyClient::builder(peer.clone())
        .interceptor(
            StaticMetadataInterceptor::default()
                .pair("my-request-metadata-key-1", "my-request-metadata-value-1")
                .pair("my-request-metadata-key-2", "my-request-metadata-value-2"),
        )
        .interceptor(RequestMetadataInterceptor)
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn request_metadata_reaches_the_peer_on_every_shape() {
    init_tracing();
    let peer = SimulatedTransport::default();
    let client = metadata_client(&peer);
    let request = CallRequest::new(0, 0, [OutcomeCode::Ok]);

    client.unary_resiliency(request.clone(), None).await.unwrap();
    let outcome = client
        .bidirectional_resiliency(vec![request.clone(), request], None)
        .await;
    assert!(outcome.is_ok(), "{:?}", outcome.error);

    let observed = peer.observed();
    assert_eq!(observed.len(), 3);
    for seen in &observed {
        let metadata = &seen.metadata;
        assert_eq!(
            metadata.get("my-request-metadata-key-1"),
            Some("my-request-metadata-value-1")
        );
        assert_eq!(
            metadata.get("my-request-metadata-key-2"),
            Some("my-request-metadata-value-2")
        );
        assert_eq!(metadata.get(CLIENT_OS_KEY), Some(std::env::consts::OS));
        assert!(metadata.contains_key(CLIENT_TIME_KEY));
    }

    // One identifier per call, shared by every message of a stream.
    let unary_id = observed[0].metadata.get(REQUEST_UUID_KEY).unwrap();
    let bidi_ids: Vec<_> = observed[1..]
        .iter()
        .map(|seen| seen.metadata.get(REQUEST_UUID_KEY).unwrap())
        .collect();
    assert_eq!(observed[1].method, methods::BIDI_STREAMING);
    assert_eq!(bidi_ids[0], bidi_ids[1]);
    assert_ne!(unary_id, bidi_ids[0]);
}

#[tokio::test(start_paused = true)]
async fn response_headers_are_captured() {
    init_tracing();
    let peer = SimulatedTransport::builder()
        .response_header("my-response-metadata-key", "my-response-metadata-value")
        .build();
    let client = metadata_client(&peer);
    let request = CallRequest::new(0, 0, [OutcomeCode::Ok]);

    let response = client.unary_resiliency(request.clone(), None).await.unwrap();
    assert_eq!(
        response.headers().get("my-response-metadata-key"),
        Some("my-response-metadata-value")
    );

    let outcome = client.server_resiliency(request, None).await;
    assert_eq!(
        outcome.headers.get("my-response-metadata-key"),
        Some("my-response-metadata-value")
    );
}
