//! WebSocket Transport
//!
//! [`TransportSink`] and [`TransportSource`] over `tokio-tungstenite`.
//!
//! # Handshake
//!
//! Every configured subprotocol is offered in `Sec-WebSocket-Protocol`, most
//! preferred first. The server's choice is read from the response and handed
//! to the client, which builds its codec from it. An optional bearer token is
//! sent as `Authorization`.
//!
//! # Frames
//!
//! | Frame          | Event                              |
//! |----------------|------------------------------------|
//! | Binary / Text  | `Message`                          |
//! | Close          | `Closed` (clean)                   |
//! | Ping / Pong    | answered by tungstenite, ignored   |
//! | read error     | `Error`, then `Closed` (abnormal)  |

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::application::ports::{
    CloseInfo, Transport, TransportError, TransportEvent, TransportSink, TransportSource,
};
use crate::infrastructure::config::ClientConfig;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Open a WebSocket connection offering the configured subprotocols.
///
/// # Errors
///
/// Returns `Timeout` if the handshake exceeds the configured timeout,
/// `SubprotocolRejected` if the server's subprotocol answer is invalid, and
/// `Backend` for any other handshake failure.
pub async fn connect(config: &ClientConfig) -> Result<Transport, TransportError> {
    let mut request = config
        .url
        .as_str()
        .into_client_request()
        .map_err(TransportError::backend)?;

    let offered = config.subprotocols().join(", ");
    let headers = request.headers_mut();
    headers.insert(
        SEC_WEBSOCKET_PROTOCOL,
        HeaderValue::from_str(&offered).map_err(TransportError::backend)?,
    );
    if let Some(token) = &config.token {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose()))
            .map_err(TransportError::backend)?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }

    tracing::debug!(url = %config.url, offered = %offered, "Opening WebSocket");

    let (stream, response) =
        tokio::time::timeout(config.connect_timeout, tokio_tungstenite::connect_async(request))
            .await
            .map_err(|_| TransportError::Timeout(config.connect_timeout))?
            .map_err(map_handshake_error)?;

    let protocol = response
        .headers()
        .get(SEC_WEBSOCKET_PROTOCOL)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    tracing::debug!(protocol = ?protocol, status = %response.status(), "WebSocket handshake complete");

    let (write, read) = stream.split();
    Ok(Transport {
        sink: Box::new(WebSocketSink {
            write: Mutex::new(write),
        }),
        source: Box::new(WebSocketSource { read, done: false }),
        protocol,
    })
}

fn map_handshake_error(error: WsError) -> TransportError {
    match error {
        WsError::Protocol(ProtocolError::SecWebSocketSubProtocolError(e)) => {
            TransportError::SubprotocolRejected(e.to_string())
        }
        other => map_error(other),
    }
}

fn map_error(error: WsError) -> TransportError {
    match error {
        WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::Closed,
        other => TransportError::backend(other),
    }
}

// =============================================================================
// Sink
// =============================================================================

struct WebSocketSink {
    write: Mutex<SplitSink<WsStream, Message>>,
}

#[async_trait]
impl TransportSink for WebSocketSink {
    async fn send(&self, data: Vec<u8>) -> Result<(), TransportError> {
        self.write
            .lock()
            .await
            .send(Message::Binary(data.into()))
            .await
            .map_err(map_error)
    }

    async fn close(&self, code: u16, reason: String) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.into(),
        };
        self.write
            .lock()
            .await
            .send(Message::Close(Some(frame)))
            .await
            .map_err(map_error)
    }
}

// =============================================================================
// Source
// =============================================================================

struct WebSocketSource {
    read: SplitStream<WsStream>,
    done: bool,
}

#[async_trait]
impl TransportSource for WebSocketSource {
    async fn next_event(&mut self) -> Option<TransportEvent> {
        if self.done {
            return None;
        }

        loop {
            match self.read.next().await {
                Some(Ok(Message::Binary(data))) => return Some(TransportEvent::Message(data.to_vec())),
                Some(Ok(Message::Text(text))) => {
                    return Some(TransportEvent::Message(text.as_str().as_bytes().to_vec()));
                }
                Some(Ok(Message::Close(frame))) => {
                    self.done = true;
                    let info = frame.map_or_else(
                        || CloseInfo::new(u16::from(CloseCode::Status), "", true),
                        |f| CloseInfo::new(u16::from(f.code), f.reason.as_str(), true),
                    );
                    tracing::debug!(code = info.code, reason = %info.reason, "Close frame received");
                    return Some(TransportEvent::Closed(info));
                }
                Some(Ok(_)) => {
                    // Ping/Pong handled by tungstenite
                }
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                    self.done = true;
                    return Some(TransportEvent::Closed(CloseInfo::abnormal(
                        "connection ended without close frame",
                    )));
                }
                Some(Err(e)) => return Some(TransportEvent::Error(TransportError::backend(e))),
            }
        }
    }
}
