//! In-Memory Transport
//!
//! A paired in-process transport. The client half is a regular
//! [`Transport`]; the [`MemoryPeer`] half plays the server: it reads the
//! client's frames and scripts responses, stream pushes, closes and
//! failures.
//!
//! Dropping the peer ends the client's event source without a close frame.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::application::ports::{
    CloseInfo, Transport, TransportError, TransportEvent, TransportSink, TransportSource,
};
use crate::domain::envelope::{Request, ServerMessage};
use crate::infrastructure::codec::{
    CodecError, Compression, DecodeError, EnvelopeCodec, subprotocol_for,
};

/// Frame written by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerFrame {
    /// Binary message.
    Message(Vec<u8>),
    /// Close initiated by the client.
    Close {
        /// Close status code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// Failures reading client requests on the peer side.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// The client closed the transport.
    #[error("client closed with code {code}: {reason}")]
    ClientClosed {
        /// Close status code.
        code: u16,
        /// Close reason.
        reason: String,
    },

    /// The client half was dropped.
    #[error("client disconnected")]
    Disconnected,

    /// The client sent bytes that are not a request.
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Create a connected pair negotiated for `compression`.
#[must_use]
pub fn pair(compression: Compression) -> (Transport, MemoryPeer) {
    pair_with_protocol(Some(&subprotocol_for(compression)))
}

/// Create a connected pair reporting an arbitrary handshake result.
///
/// The peer encodes with the codec named by `protocol`, or identity when
/// the protocol is absent or unsupported.
#[must_use]
pub fn pair_with_protocol(protocol: Option<&str>) -> (Transport, MemoryPeer) {
    let (to_peer, from_client) = mpsc::unbounded_channel();
    let (to_client, events) = mpsc::unbounded_channel();

    let codec = protocol
        .and_then(|p| EnvelopeCodec::negotiate(p).ok())
        .unwrap_or_default();

    let transport = Transport {
        sink: Box::new(MemorySink {
            to_peer,
            to_client: to_client.downgrade(),
            closed: AtomicBool::new(false),
        }),
        source: Box::new(MemorySource { events }),
        protocol: protocol.map(str::to_string),
    };

    let peer = MemoryPeer {
        from_client,
        to_client,
        codec,
    };

    (transport, peer)
}

// =============================================================================
// Client Half
// =============================================================================

struct MemorySink {
    to_peer: mpsc::UnboundedSender<PeerFrame>,
    to_client: mpsc::WeakUnboundedSender<TransportEvent>,
    closed: AtomicBool,
}

#[async_trait]
impl TransportSink for MemorySink {
    async fn send(&self, data: Vec<u8>) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.to_peer
            .send(PeerFrame::Message(data))
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&self, code: u16, reason: String) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let _ = self.to_peer.send(PeerFrame::Close {
            code,
            reason: reason.clone(),
        });
        if let Some(to_client) = self.to_client.upgrade() {
            let _ = to_client.send(TransportEvent::Closed(CloseInfo::new(code, reason, true)));
        }
        Ok(())
    }
}

struct MemorySource {
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

#[async_trait]
impl TransportSource for MemorySource {
    async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }
}

// =============================================================================
// Server Half
// =============================================================================

/// Server side of an in-memory transport.
#[derive(Debug)]
pub struct MemoryPeer {
    from_client: mpsc::UnboundedReceiver<PeerFrame>,
    to_client: mpsc::UnboundedSender<TransportEvent>,
    codec: EnvelopeCodec,
}

impl MemoryPeer {
    /// Codec the peer encodes and decodes with.
    #[must_use]
    pub const fn codec(&self) -> EnvelopeCodec {
        self.codec
    }

    /// Next frame written by the client, or `None` once the client half is
    /// gone.
    pub async fn next_frame(&mut self) -> Option<PeerFrame> {
        self.from_client.recv().await
    }

    /// Frame already written by the client, without waiting.
    pub fn try_next_frame(&mut self) -> Option<PeerFrame> {
        self.from_client.try_recv().ok()
    }

    /// Next request written by the client.
    ///
    /// # Errors
    ///
    /// Returns an error if the client closed, disconnected, or wrote bytes
    /// that do not decode as a request.
    pub async fn recv_request(&mut self) -> Result<Request, PeerError> {
        match self.next_frame().await {
            Some(PeerFrame::Message(bytes)) => Ok(self.codec.decode_request(&bytes)?),
            Some(PeerFrame::Close { code, reason }) => Err(PeerError::ClientClosed { code, reason }),
            None => Err(PeerError::Disconnected),
        }
    }

    /// Encode and deliver a server envelope.
    ///
    /// # Errors
    ///
    /// Returns the codec error if encoding fails.
    pub fn send(&self, message: &ServerMessage) -> Result<(), CodecError> {
        let bytes = self.codec.encode(message)?;
        self.send_raw(bytes);
        Ok(())
    }

    /// Deliver raw bytes as one message.
    pub fn send_raw(&self, bytes: Vec<u8>) {
        let _ = self.to_client.send(TransportEvent::Message(bytes));
    }

    /// Close the transport from the server side.
    pub fn close(&self, code: u16, reason: impl Into<String>) {
        let _ = self
            .to_client
            .send(TransportEvent::Closed(CloseInfo::new(code, reason, true)));
    }

    /// Report a transport failure to the client.
    pub fn fail(&self, error: TransportError) {
        let _ = self.to_client.send(TransportEvent::Error(error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::CLOSE_NORMAL;
    use crate::domain::envelope::RequestData;
    use crate::domain::requests::GetInfoRequest;

    #[tokio::test]
    async fn frames_flow_both_ways() {
        let (mut transport, mut peer) = pair(Compression::Zstd);
        assert_eq!(transport.protocol.as_deref(), Some("v1.api.quotes+zstd"));

        let request = Request {
            id: 0,
            data: RequestData::GetInfo(GetInfoRequest {}),
        };
        let bytes = peer.codec().encode(&request).unwrap();
        transport.sink.send(bytes).await.unwrap();
        assert_eq!(peer.recv_request().await.unwrap(), request);

        peer.send_raw(vec![1, 2, 3]);
        assert!(matches!(
            transport.source.next_event().await,
            Some(TransportEvent::Message(bytes)) if bytes == [1, 2, 3]
        ));
    }

    #[tokio::test]
    async fn client_close_notifies_both_sides_once() {
        let (mut transport, mut peer) = pair(Compression::None);

        transport.sink.close(CLOSE_NORMAL, "bye".to_string()).await.unwrap();
        transport.sink.close(CLOSE_NORMAL, "again".to_string()).await.unwrap();

        assert_eq!(
            peer.next_frame().await,
            Some(PeerFrame::Close {
                code: CLOSE_NORMAL,
                reason: "bye".to_string()
            })
        );
        assert!(peer.try_next_frame().is_none());
        assert!(matches!(
            transport.source.next_event().await,
            Some(TransportEvent::Closed(info)) if info.was_clean && info.reason == "bye"
        ));
        assert!(matches!(
            transport.sink.send(vec![0]).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn dropping_peer_ends_source() {
        let (mut transport, peer) = pair(Compression::None);
        drop(peer);
        assert!(transport.source.next_event().await.is_none());
    }
}
