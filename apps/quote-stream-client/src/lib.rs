#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Quote Stream Client - Multiplexed Quote Service Connection
//!
//! A client that keeps one persistent WebSocket connection to a quoting
//! service and multiplexes concurrent request/response calls and
//! long-lived server-push quote streams over it.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Wire envelope and request payload types
//!   - `envelope`: Requests, server envelopes, response kinds
//!   - `requests`: Typed request parameters
//!
//! - **Application**: Port definitions
//!   - `ports`: Transport sink/source contract, close codes
//!
//! - **Infrastructure**: Adapters and the client itself
//!   - `codec`: Subprotocol negotiation, `MessagePack` and compression
//!   - `client`: Correlation engine, stream demultiplexer, lifecycle
//!   - `websocket`: `tokio-tungstenite` transport
//!   - `memory`: In-process transport pair
//!   - `config`, `metrics`, `telemetry`: Ambient services
//!
//! # Data Flow
//!
//! ```text
//! caller ──► QuoteClient ──► PendingRequests ──► EnvelopeCodec ──► TransportSink
//!                                                                       │
//! caller ◄── oneshot / QuoteStream ◄── dispatch ◄── EnvelopeCodec ◄── TransportSource
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Envelope and payload types with no I/O.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Adapters and the client.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::envelope::{
    Payload, Request, RequestData, ResponseData, ResponseError, ResponseKind, ResponseSuccess,
    ServerMessage, StreamData, StreamEnd, StreamStart,
};
pub use domain::requests::{
    GetInfoRequest, GetVenuesRequest, ListProvidersRequest, QuoteUpdateParams, StopStreamRequest,
    SwapMode, SwapParams, SwapPriceRequest, SwapQuoteRequest, TransactionParams,
};

// Ports
pub use application::ports::{
    CLOSE_ABNORMAL, CLOSE_NORMAL, CLOSE_PROTOCOL_ERROR, CloseInfo, Transport, TransportError,
    TransportEvent, TransportSink, TransportSource,
};

// Client
pub use infrastructure::client::{
    ClientError, ConnectionFault, ConnectionState, ProtocolViolation, QuoteClient, QuoteStream,
    QuoteStreamResponse, StreamError, StreamStopper,
};

// Codec
pub use infrastructure::codec::{
    BASE_PROTOCOL, CodecError, Compression, DecodeError, EnvelopeCodec, NegotiationError,
};

// Config
pub use infrastructure::config::{AuthToken, ClientConfig, ConfigError, StreamTarget};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
