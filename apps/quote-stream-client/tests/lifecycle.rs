//! Connection Lifecycle Integration Tests
//!
//! Covers close fan-out, decode and transport failures, idempotent close
//! and subprotocol rejection.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use futures::StreamExt;
use quote_stream_client::infrastructure::memory::{self, PeerFrame};
use quote_stream_client::{
    CLOSE_ABNORMAL, CLOSE_NORMAL, CLOSE_PROTOCOL_ERROR, ClientError, Compression, ConnectionFault,
    ConnectionState, DecodeError, NegotiationError, QuoteClient, TransportError,
};

use common::{connect, open_stream};

#[tokio::test]
async fn server_close_fails_everything() {
    let (client, mut peer) = connect(Compression::None).await;
    let mut stream = open_stream(&client, &mut peer, 1).await.stream;

    let (pending, ()) = tokio::join!(client.get_info(), async {
        peer.recv_request().await.unwrap();
        peer.close(1001, "going away");
    });

    match pending.unwrap_err() {
        ClientError::ConnectionClosed(info) => {
            assert_eq!(info.code, 1001);
            assert_eq!(info.reason, "going away");
            assert!(info.was_clean);
        }
        other => panic!("expected connection closed, got {other:?}"),
    }
    assert!(matches!(
        stream.next().await,
        Some(Err(ClientError::ConnectionClosed(_)))
    ));
    assert!(stream.next().await.is_none());

    assert_eq!(client.state(), ConnectionState::Closed);
    assert_eq!(client.pending_requests(), 0);
    assert_eq!(client.open_streams(), 0);
}

#[tokio::test]
async fn every_observer_sees_the_close() {
    let (client, peer) = connect(Compression::None).await;

    let (first, second, ()) = tokio::join!(client.closed(), client.closed(), async {
        peer.close(CLOSE_NORMAL, "done");
    });

    assert_eq!(first, second);
    assert_eq!(first.code, CLOSE_NORMAL);

    // Late observers resolve immediately
    assert_eq!(client.closed().await, first);
}

#[tokio::test]
async fn operations_after_close_are_rejected() {
    let (client, mut peer) = connect(Compression::None).await;
    client.close().await;

    assert!(matches!(
        client.get_info().await,
        Err(ClientError::NotOpen(ConnectionState::Closed))
    ));
    assert!(matches!(peer.next_frame().await, Some(PeerFrame::Close { .. })));
    assert!(peer.try_next_frame().is_none());
}

#[tokio::test]
async fn close_is_idempotent() {
    let (client, mut peer) = connect(Compression::Zstd).await;

    let (first, second) = tokio::join!(client.close(), client.close());
    assert_eq!(first, second);
    assert_eq!(first.code, CLOSE_NORMAL);
    assert_eq!(client.close().await, first);

    assert_eq!(
        peer.next_frame().await,
        Some(PeerFrame::Close {
            code: CLOSE_NORMAL,
            reason: String::new()
        })
    );
    assert!(peer.try_next_frame().is_none());
}

#[tokio::test]
async fn decode_failure_is_connection_fatal() {
    let (client, mut peer) = connect(Compression::None).await;
    let mut stream = open_stream(&client, &mut peer, 2).await.stream;

    let (first, second, ()) = tokio::join!(client.get_info(), client.get_info(), async {
        peer.recv_request().await.unwrap();
        peer.recv_request().await.unwrap();
        peer.send_raw(rmp_serde::to_vec(&vec![1, 2, 3]).unwrap());
    });

    for result in [first, second] {
        match result.unwrap_err() {
            ClientError::ConnectionError(fault) => {
                assert!(matches!(*fault, ConnectionFault::Decode(DecodeError::Array)));
            }
            other => panic!("expected connection error, got {other:?}"),
        }
    }
    assert!(matches!(
        stream.next().await,
        Some(Err(ClientError::ConnectionError(_)))
    ));

    match peer.next_frame().await {
        Some(PeerFrame::Close { code, .. }) => assert_eq!(code, CLOSE_PROTOCOL_ERROR),
        other => panic!("expected close frame, got {other:?}"),
    }

    let info = client.closed().await;
    assert_eq!(info.code, CLOSE_PROTOCOL_ERROR);
    assert_eq!(client.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn transport_error_is_connection_fatal() {
    let (client, mut peer) = connect(Compression::None).await;

    let (pending, ()) = tokio::join!(client.get_info(), async {
        peer.recv_request().await.unwrap();
        peer.fail(TransportError::backend(std::io::Error::other("reset")));
    });

    match pending.unwrap_err() {
        ClientError::ConnectionError(fault) => {
            assert!(matches!(*fault, ConnectionFault::Transport(_)));
            assert!(fault.to_string().contains("reset"));
        }
        other => panic!("expected connection error, got {other:?}"),
    }
    assert!(matches!(
        peer.next_frame().await,
        Some(PeerFrame::Close { code: CLOSE_PROTOCOL_ERROR, .. })
    ));
}

#[tokio::test]
async fn vanished_peer_is_abnormal_close() {
    let (client, peer) = connect(Compression::None).await;
    drop(peer);

    let info = client.closed().await;
    assert_eq!(info.code, CLOSE_ABNORMAL);
    assert!(!info.was_clean);
    assert_eq!(client.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn missing_subprotocol_is_rejected() {
    let (transport, mut peer) = memory::pair_with_protocol(None);

    let err = QuoteClient::from_transport(transport).await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::InvalidProtocol(NegotiationError::NotNegotiated)
    ));
    assert!(matches!(
        peer.next_frame().await,
        Some(PeerFrame::Close { code: CLOSE_PROTOCOL_ERROR, .. })
    ));
}

#[tokio::test]
async fn foreign_subprotocol_is_rejected() {
    let (transport, _peer) = memory::pair_with_protocol(Some("v2.api.quotes+zstd"));

    assert!(matches!(
        QuoteClient::from_transport(transport).await,
        Err(ClientError::InvalidProtocol(NegotiationError::UnknownProtocol(_)))
    ));
}

#[tokio::test]
async fn dropping_client_closes_connection() {
    let (client, mut peer) = connect(Compression::None).await;
    drop(client);

    assert_eq!(
        peer.next_frame().await,
        Some(PeerFrame::Close {
            code: CLOSE_NORMAL,
            reason: String::new()
        })
    );
}
