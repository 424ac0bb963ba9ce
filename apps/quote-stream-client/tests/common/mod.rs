//! Shared fixtures for client integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use quote_stream_client::infrastructure::memory::{self, MemoryPeer};
use quote_stream_client::{
    Compression, Payload, QuoteClient, QuoteStreamResponse, RequestData, ResponseData,
    ResponseSuccess, ServerMessage, StreamStart, SwapParams, SwapQuoteRequest, TransactionParams,
};

/// Connect a client to an in-memory peer.
pub async fn connect(compression: Compression) -> (QuoteClient, MemoryPeer) {
    let (transport, peer) = memory::pair(compression);
    let client = QuoteClient::from_transport(transport).await.unwrap();
    (client, peer)
}

/// Payload holding a single integer.
pub fn payload(n: u64) -> Payload {
    Payload(rmpv::Value::from(n))
}

/// Payload shaped like a quote update.
pub fn quote(out_amount: u64) -> Payload {
    Payload(rmpv::Value::Map(vec![(
        rmpv::Value::from("outAmount"),
        rmpv::Value::from(out_amount),
    )]))
}

/// A representative stream request.
pub fn swap_quote_request() -> SwapQuoteRequest {
    SwapQuoteRequest::new(
        SwapParams::new(
            "So11111111111111111111111111111111111111112",
            "EPjFWdd5AufqSYqeM2qNF1p4TZ5bTPxxGLfYc7K3vLvC",
            1_000_000,
        ),
        TransactionParams::new("WALLET"),
    )
}

/// Open a stream with the given server-assigned id.
pub async fn open_stream(
    client: &QuoteClient,
    peer: &mut MemoryPeer,
    stream_id: u32,
) -> QuoteStreamResponse {
    let (opened, ()) = tokio::join!(client.new_swap_quote_stream(swap_quote_request()), async {
        let request = peer.recv_request().await.unwrap();
        assert!(matches!(request.data, RequestData::NewSwapQuoteStream(_)));
        peer.send(&ServerMessage::Response(ResponseSuccess {
            request_id: request.id,
            data: ResponseData::NewSwapQuoteStream(payload(u64::from(stream_id))),
            stream: Some(StreamStart {
                id: stream_id,
                data_type: "SwapQuotes".to_string(),
            }),
        }))
        .unwrap();
    });
    opened.unwrap()
}

/// Answer the next request, which must be `StopStream{stream_id}`.
pub async fn confirm_stop(peer: &mut MemoryPeer, stream_id: u32) {
    let request = peer.recv_request().await.unwrap();
    match request.data {
        RequestData::StopStream(stop) => assert_eq!(stop.id, stream_id),
        other => panic!("expected StopStream, got {other:?}"),
    }
    peer.send(&ServerMessage::response(
        request.id,
        ResponseData::StreamStopped(payload(0)),
    ))
    .unwrap();
}
