//! Port Interfaces
//!
//! Defines the transport contract the client core consumes, following the
//! Hexagonal Architecture pattern. Adapters in the infrastructure layer
//! (WebSocket, in-memory) implement these traits.
//!
//! ## Driven Ports (Outbound)
//!
//! - `TransportSink`: send a binary message, initiate close
//! - `TransportSource`: receive messages, close and error events
//!
//! A connected transport is handed to the client as a [`Transport`], which
//! also carries the subprotocol the server settled on during the handshake.

use std::fmt;

use async_trait::async_trait;

// =============================================================================
// Close Codes
// =============================================================================

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// Closed because of a local decode or protocol failure.
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;

/// The transport ended without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Outcome of a transport close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// Close status code.
    pub code: u16,
    /// Close reason sent by the closing side.
    pub reason: String,
    /// Whether the close handshake completed.
    pub was_clean: bool,
}

impl CloseInfo {
    /// Create a close outcome.
    #[must_use]
    pub fn new(code: u16, reason: impl Into<String>, was_clean: bool) -> Self {
        Self {
            code,
            reason: reason.into(),
            was_clean,
        }
    }

    /// Outcome for a transport that vanished without a close handshake.
    #[must_use]
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(CLOSE_ABNORMAL, reason, false)
    }
}

impl fmt::Display for CloseInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code {}", self.code)?;
        if !self.reason.is_empty() {
            write!(f, " ({})", self.reason)?;
        }
        if !self.was_clean {
            f.write_str(", unclean")?;
        }
        Ok(())
    }
}

// =============================================================================
// Errors and Events
// =============================================================================

/// Transport-level failures.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The transport is already closed.
    #[error("transport closed")]
    Closed,

    /// The handshake did not complete in time.
    #[error("connect timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The server refused every subprotocol offered.
    #[error("subprotocol rejected: {0}")]
    SubprotocolRejected(String),

    /// Failure reported by the underlying transport implementation.
    #[error("{0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl TransportError {
    /// Wrap an implementation-specific error.
    pub fn backend(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend(Box::new(error))
    }
}

/// Events delivered by a [`TransportSource`].
#[derive(Debug)]
pub enum TransportEvent {
    /// One complete binary message.
    Message(Vec<u8>),
    /// The transport closed. No further events follow.
    Closed(CloseInfo),
    /// The transport failed. A `Closed` event is expected to follow.
    Error(TransportError),
}

// =============================================================================
// Ports
// =============================================================================

/// Outbound half of a transport.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransportSink: Send + Sync {
    /// Send one binary message.
    async fn send(&self, data: Vec<u8>) -> Result<(), TransportError>;

    /// Begin closing the transport with the given status.
    async fn close(&self, code: u16, reason: String) -> Result<(), TransportError>;
}

/// Inbound half of a transport.
#[async_trait]
pub trait TransportSource: Send {
    /// Wait for the next event. Returns `None` once the transport is
    /// exhausted.
    async fn next_event(&mut self) -> Option<TransportEvent>;
}

/// A connected transport, ready to be handed to the client.
pub struct Transport {
    /// Outbound half.
    pub sink: Box<dyn TransportSink>,
    /// Inbound half.
    pub source: Box<dyn TransportSource>,
    /// Subprotocol selected during the handshake, if any.
    pub protocol: Option<String>,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_info_display() {
        let info = CloseInfo::new(CLOSE_NORMAL, "bye", true);
        assert_eq!(info.to_string(), "code 1000 (bye)");

        let info = CloseInfo::abnormal("");
        assert_eq!(info.to_string(), "code 1006, unclean");
    }

    #[test]
    fn backend_error_keeps_message() {
        let err = TransportError::backend(std::io::Error::other("socket reset"));
        assert_eq!(err.to_string(), "socket reset");
    }
}
