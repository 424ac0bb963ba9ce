//! Client Errors
//!
//! Errors are scoped by blast radius:
//!
//! - **Request**: `ErrorResponse`, `Protocol` reach only the affected caller
//! - **Stream**: `Stream` terminates only the affected sequence
//! - **Connection**: `ConnectionClosed`, `ConnectionError` are delivered to
//!   every pending request and open stream, then the connection is done

use std::sync::Arc;

use crate::application::ports::{CloseInfo, TransportError};
use crate::domain::envelope::{ResponseError, ResponseKind};
use crate::infrastructure::codec::{CodecError, DecodeError, NegotiationError};

use super::connection::ConnectionState;

/// Errors returned by client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The handshake did not settle on a supported subprotocol.
    #[error("invalid protocol: {0}")]
    InvalidProtocol(#[from] NegotiationError),

    /// The request could not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The transport failed to connect or to send the request.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The connection closed before the operation completed.
    #[error("connection closed: {0}")]
    ConnectionClosed(CloseInfo),

    /// The connection failed; shared by every affected operation.
    #[error("connection error: {0}")]
    ConnectionError(#[source] Arc<ConnectionFault>),

    /// The connection no longer accepts new operations.
    #[error("connection is {0}")]
    NotOpen(ConnectionState),

    /// The server rejected the request.
    #[error("server rejected request {}: [{}] {}", .0.request_id, .0.code, .0.message)]
    ErrorResponse(ResponseError),

    /// A stream ended with an error.
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// The server broke the request/response contract for one request.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolViolation),
}

impl ClientError {
    /// Whether this error ended the whole connection.
    #[must_use]
    pub const fn is_connection_fatal(&self) -> bool {
        matches!(self, Self::ConnectionClosed(_) | Self::ConnectionError(_))
    }
}

/// Connection-wide failure cause.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionFault {
    /// The transport reported an error.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// An inbound message could not be decoded.
    #[error("failed to decode inbound message: {0}")]
    Decode(#[from] DecodeError),
}

/// A stream ended abnormally.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("stream {stream_id} ended with error {code}: {message}")]
pub struct StreamError {
    /// Stream that ended.
    pub stream_id: u32,
    /// Server error code.
    pub code: i64,
    /// Server error message.
    pub message: String,
}

/// Request-scoped contract violations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolation {
    /// The populated response field does not match the request kind.
    #[error("expected {expected} response, received {actual}")]
    UnexpectedResponse {
        /// Kind the request expects.
        expected: ResponseKind,
        /// Kind the server sent.
        actual: ResponseKind,
    },

    /// The response carried a kind this client does not know.
    #[error("expected {expected} response, received unrecognized {name:?}")]
    UnrecognizedResponse {
        /// Kind the request expects.
        expected: ResponseKind,
        /// Wire name the server sent.
        name: String,
    },

    /// A stream-opening response did not describe the stream.
    #[error("stream-opening response carried no stream start")]
    MissingStreamStart,

    /// The server opened a stream id that is still in use.
    #[error("server reused open stream id {0}")]
    DuplicateStream(u32),
}
