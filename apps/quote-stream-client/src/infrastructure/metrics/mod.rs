//! Prometheus Metrics Module
//!
//! Records client-side metrics through the `metrics` facade. Recording is
//! a no-op until a recorder is installed with [`init_metrics`].
//!
//! # Metrics Categories
//!
//! - **Requests**: Requests sent by kind, responses by outcome
//! - **Streams**: Items delivered, open stream count
//! - **Connection**: Decode failures, dropped messages, closes by code

use std::net::SocketAddr;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

// =============================================================================
// Exporter
// =============================================================================

/// Install the Prometheus recorder and serve `/metrics` on `port`.
///
/// # Errors
///
/// Returns an error if a recorder is already installed or the listener
/// cannot be started.
pub fn init_metrics(port: u16) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
        .install()?;

    register_metrics();
    Ok(())
}

fn register_metrics() {
    describe_counter!(
        "quote_client_requests_sent_total",
        "Requests written to the transport, by kind"
    );
    describe_counter!(
        "quote_client_responses_total",
        "Responses matched to a request, by outcome"
    );
    describe_counter!(
        "quote_client_stream_items_total",
        "Stream items delivered to consumers"
    );
    describe_counter!(
        "quote_client_messages_dropped_total",
        "Inbound messages dropped, by reason"
    );
    describe_counter!(
        "quote_client_decode_failures_total",
        "Inbound messages that failed to decode"
    );
    describe_counter!(
        "quote_client_connection_closed_total",
        "Connection closes, by close code"
    );
    describe_gauge!(
        "quote_client_pending_requests",
        "Requests awaiting a response"
    );
    describe_gauge!("quote_client_open_streams", "Streams currently open");
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// How a pending request was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// Resolved with the expected payload.
    Resolved,
    /// Rejected by the server.
    Rejected,
    /// Response kind did not match the request.
    ProtocolError,
}

impl ResponseOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Resolved => "resolved",
            Self::Rejected => "rejected",
            Self::ProtocolError => "protocol_error",
        }
    }
}

/// Why an inbound message was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Response or error for a request id with no waiter.
    UnknownRequest,
    /// Stream data or end for a stream id with no handle.
    UnknownStream,
    /// Well-formed envelope with an unrecognized tag.
    UnrecognizedTag,
}

impl DropReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::UnknownRequest => "unknown_request",
            Self::UnknownStream => "unknown_stream",
            Self::UnrecognizedTag => "unrecognized_tag",
        }
    }
}

/// Record a request written to the transport.
pub fn record_request_sent(kind: &'static str) {
    counter!("quote_client_requests_sent_total", "kind" => kind).increment(1);
}

/// Record a settled request.
pub fn record_response(outcome: ResponseOutcome) {
    counter!("quote_client_responses_total", "outcome" => outcome.as_str()).increment(1);
}

/// Record a stream item delivered to a consumer.
pub fn record_stream_item() {
    counter!("quote_client_stream_items_total").increment(1);
}

/// Record a dropped inbound message.
pub fn record_dropped(reason: DropReason) {
    counter!("quote_client_messages_dropped_total", "reason" => reason.as_str()).increment(1);
}

/// Record an inbound decode failure.
pub fn record_decode_failure() {
    counter!("quote_client_decode_failures_total").increment(1);
}

/// Record a connection close.
pub fn record_connection_closed(code: u16) {
    counter!("quote_client_connection_closed_total", "code" => code.to_string()).increment(1);
}

/// Update the tracked request and stream counts.
#[allow(clippy::cast_precision_loss)]
pub fn set_tracked(pending_requests: usize, open_streams: usize) {
    gauge!("quote_client_pending_requests").set(pending_requests as f64);
    gauge!("quote_client_open_streams").set(open_streams as f64);
}

// =============================================================================
// Tests
// =============================================================================
