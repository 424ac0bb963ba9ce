//! WebSocket Transport Integration Tests
//!
//! Runs the client against a local tungstenite server to exercise the
//! subprotocol handshake and binary framing over a real socket.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use futures::{SinkExt, StreamExt};
use quote_stream_client::{
    CLOSE_NORMAL, ClientConfig, ClientError, Compression, EnvelopeCodec, NegotiationError,
    QuoteClient, ResponseData, ServerMessage,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;

use common::payload;

/// Accept one connection, answering the handshake with `selected`, and
/// reply to every request with a `GetInfo` response.
async fn serve_once(selected: Option<&'static str>) -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());

    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();

        let mut offered = Vec::new();
        let callback = |request: &Request, mut response: Response| {
            if let Some(header) = request.headers().get(SEC_WEBSOCKET_PROTOCOL) {
                offered = header
                    .to_str()
                    .unwrap()
                    .split(',')
                    .map(|p| p.trim().to_string())
                    .collect();
            }
            if let Some(protocol) = selected {
                response
                    .headers_mut()
                    .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(protocol));
            }
            Ok::<_, ErrorResponse>(response)
        };

        let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(socket, callback).await else {
            return offered;
        };

        let codec = selected
            .and_then(|p| EnvelopeCodec::negotiate(p).ok())
            .unwrap_or_default();

        while let Some(Ok(message)) = ws.next().await {
            if let Message::Binary(bytes) = message {
                let request = codec.decode_request(&bytes).unwrap();
                let reply = ServerMessage::response(request.id, ResponseData::GetInfo(payload(11)));
                ws.send(Message::binary(codec.encode(&reply).unwrap()))
                    .await
                    .unwrap();
            }
        }
        offered
    });

    (url, server)
}

#[tokio::test]
async fn request_round_trip_over_socket() {
    let (url, server) = serve_once(Some("v1.api.quotes+gzip")).await;
    let config =
        ClientConfig::new(url).with_compression(vec![Compression::Zstd, Compression::Gzip]);

    let client = QuoteClient::connect(&config).await.unwrap();
    assert_eq!(client.codec().compression(), Compression::Gzip);
    assert_eq!(client.get_info().await.unwrap(), payload(11));

    let info = client.close().await;
    assert_eq!(info.code, CLOSE_NORMAL);
    assert!(info.was_clean);

    let offered = server.await.unwrap();
    assert_eq!(offered, vec!["v1.api.quotes+zstd", "v1.api.quotes+gzip"]);
}

#[tokio::test]
async fn server_without_subprotocol_is_rejected() {
    let (url, server) = serve_once(None).await;
    let config = ClientConfig::new(url);

    let err = QuoteClient::connect(&config).await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::InvalidProtocol(NegotiationError::UnknownProtocol(_))
    ));

    let offered = server.await.unwrap();
    assert_eq!(offered.len(), Compression::ALL.len());
}
