//! Quote Client Connection
//!
//! Owns the single transport, multiplexes typed requests and server-push
//! streams over it, and fans connection-wide failures out to every pending
//! request and open stream.
//!
//! # Connection States
//!
//! ```text
//!   Open ──► Closing ──► Closed
//!     └────► Errored ──► Closed
//! ```
//!
//! # Concurrency
//!
//! All tracking state sits behind one `parking_lot::Mutex` that is never
//! held across an `.await`. A single reader task drives inbound traffic.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};

use crate::application::ports::{
    CLOSE_NORMAL, CLOSE_PROTOCOL_ERROR, CloseInfo, Transport, TransportError, TransportEvent,
    TransportSink, TransportSource,
};
use crate::domain::envelope::{Payload, Request, RequestData, ServerMessage};
use crate::domain::requests::{
    GetInfoRequest, GetVenuesRequest, ListProvidersRequest, StopStreamRequest, SwapPriceRequest,
    SwapQuoteRequest,
};
use crate::infrastructure::codec::{EnvelopeCodec, NegotiationError};
use crate::infrastructure::config::ClientConfig;
use crate::infrastructure::metrics::{self, DropReason, ResponseOutcome};
use crate::infrastructure::websocket;

use super::correlation::{OpenedStream, PendingRequests, Waiter};
use super::demux::{QuoteStream, StreamRegistry, StreamStopper};
use super::error::{ClientError, ConnectionFault};

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepting requests.
    Open,
    /// A local close was initiated; waiting for the close event.
    Closing,
    /// A transport or decode failure occurred; waiting for the close event.
    Errored,
    /// Terminal.
    Closed,
}

impl ConnectionState {
    /// Lowercase state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Errored => "errored",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a successful `NewSwapQuoteStream` request.
#[derive(Debug)]
pub struct QuoteStreamResponse {
    /// Initial response payload.
    pub response: Payload,
    /// Server-assigned stream id.
    pub stream_id: u32,
    /// Quote updates pushed by the server.
    pub stream: QuoteStream,
}

// =============================================================================
// Shared Core
// =============================================================================

struct Tracking {
    state: ConnectionState,
    requests: PendingRequests,
    streams: StreamRegistry,
}

impl Tracking {
    fn publish(&self) {
        metrics::set_tracked(self.requests.len(), self.streams.len());
    }
}

/// State shared by the client handle, stream handles and the reader task.
pub(crate) struct Inner {
    codec: EnvelopeCodec,
    sink: Box<dyn TransportSink>,
    tracking: Mutex<Tracking>,
    closed_tx: watch::Sender<Option<CloseInfo>>,
}

impl Inner {
    fn new(codec: EnvelopeCodec, sink: Box<dyn TransportSink>) -> Self {
        let (closed_tx, _) = watch::channel(None);
        Self {
            codec,
            sink,
            tracking: Mutex::new(Tracking {
                state: ConnectionState::Open,
                requests: PendingRequests::default(),
                streams: StreamRegistry::default(),
            }),
            closed_tx,
        }
    }

    // -------------------------------------------------------------------------
    // Outbound
    // -------------------------------------------------------------------------

    /// Register `waiter`, then encode and send the request. Send failures
    /// are delivered through the waiter.
    async fn transmit(&self, data: RequestData, waiter: Waiter) {
        let kind = data.name();
        let id = {
            let mut tracking = self.tracking.lock();
            if tracking.state != ConnectionState::Open {
                waiter.reject(ClientError::NotOpen(tracking.state));
                return;
            }
            let id = tracking.requests.register(waiter);
            tracking.publish();
            id
        };

        let sent = match self.codec.encode(&Request { id, data }) {
            Ok(bytes) => self.sink.send(bytes).await.map_err(ClientError::from),
            Err(e) => Err(e.into()),
        };

        match sent {
            Ok(()) => {
                metrics::record_request_sent(kind);
                tracing::debug!(request_id = id, kind, "Request sent");
            }
            Err(e) => {
                tracing::warn!(request_id = id, kind, error = %e, "Failed to send request");
                let mut tracking = self.tracking.lock();
                if let Some(waiter) = tracking.requests.take(id) {
                    waiter.reject(e);
                }
                tracking.publish();
            }
        }
    }

    async fn request(&self, data: RequestData) -> Result<Payload, ClientError> {
        let (completion, rx) = oneshot::channel();
        let waiter = Waiter::Unary {
            expected: data.expected_response(),
            completion,
        };
        self.transmit(data, waiter).await;
        rx.await.unwrap_or_else(|_| Err(abandoned()))
    }

    async fn open_stream(&self, data: RequestData) -> Result<OpenedStream, ClientError> {
        let (completion, rx) = oneshot::channel();
        self.transmit(data, Waiter::Stream { completion }).await;
        rx.await.unwrap_or_else(|_| Err(abandoned()))
    }

    /// Send `StopStream` and end the local stream once the server confirms.
    async fn stop_stream(&self, stream_id: u32) -> Result<Payload, ClientError> {
        let confirmation = self
            .request(RequestData::StopStream(StopStreamRequest { id: stream_id }))
            .await?;

        let mut tracking = self.tracking.lock();
        if tracking.streams.finish(stream_id) {
            tracing::debug!(stream_id, "Stream stopped");
        }
        tracking.publish();
        Ok(confirmation)
    }

    /// Stop a stream unless a stop is already in flight or it has ended.
    pub(crate) async fn stop_stream_once(&self, stream_id: u32) -> Result<(), ClientError> {
        if !self.tracking.lock().streams.begin_stop(stream_id) {
            tracing::debug!(stream_id, "Stream already stopping or ended");
            return Ok(());
        }

        match self.stop_stream(stream_id).await {
            Ok(_) => Ok(()),
            Err(e) => {
                self.tracking.lock().streams.abort_stop(stream_id);
                Err(e)
            }
        }
    }

    /// Whether `stream_id` is still registered.
    pub(crate) fn is_stream_open(&self, stream_id: u32) -> bool {
        self.tracking.lock().streams.contains(stream_id)
    }

    /// Stop a stream from a synchronous context.
    pub(crate) fn spawn_stop(self: &Arc<Self>, stream_id: u32) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(stream_id, "No runtime available, stream not stopped");
            return;
        };

        let inner = Arc::clone(self);
        handle.spawn(async move {
            if let Err(e) = inner.stop_stream_once(stream_id).await {
                tracing::debug!(stream_id, error = %e, "Background stream stop failed");
            }
        });
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    fn state(&self) -> ConnectionState {
        self.tracking.lock().state
    }

    async fn close(&self) -> CloseInfo {
        let initiate = {
            let mut tracking = self.tracking.lock();
            if tracking.state == ConnectionState::Open {
                tracking.state = ConnectionState::Closing;
                true
            } else {
                false
            }
        };

        if initiate {
            tracing::info!("Closing connection");
            if let Err(e) = self.sink.close(CLOSE_NORMAL, String::new()).await {
                tracing::warn!(error = %e, "Transport close failed");
                self.finish(CloseInfo::abnormal(e.to_string()));
            }
        }

        self.closed().await
    }

    async fn closed(&self) -> CloseInfo {
        let mut rx = self.closed_tx.subscribe();
        rx.wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|info| (*info).clone())
            .unwrap_or_else(|| CloseInfo::abnormal("connection dropped"))
    }

    /// Fail everything with a shared cause and close with 1002.
    async fn fail(&self, fault: ConnectionFault) {
        let fault = Arc::new(fault);
        {
            let mut tracking = self.tracking.lock();
            if matches!(
                tracking.state,
                ConnectionState::Errored | ConnectionState::Closed
            ) {
                tracing::debug!(error = %fault, "Ignoring failure on terminating connection");
                return;
            }
            tracking.state = ConnectionState::Errored;
            tracking
                .requests
                .reject_all(|| ClientError::ConnectionError(Arc::clone(&fault)));
            tracking
                .streams
                .fail_all(|| ClientError::ConnectionError(Arc::clone(&fault)));
            tracking.publish();
        }

        tracing::error!(error = %fault, "Connection failed");
        let reason = match *fault {
            ConnectionFault::Decode(_) => "undecodable message",
            ConnectionFault::Transport(_) => "transport failure",
        };
        if let Err(e) = self
            .sink
            .close(CLOSE_PROTOCOL_ERROR, reason.to_string())
            .await
        {
            tracing::warn!(error = %e, "Transport close after failure did not complete");
        }
    }

    /// Record the terminal close and notify observers. Runs at most once.
    fn finish(&self, info: CloseInfo) {
        {
            let mut tracking = self.tracking.lock();
            if tracking.state == ConnectionState::Closed {
                return;
            }
            tracking.state = ConnectionState::Closed;
            tracking
                .requests
                .reject_all(|| ClientError::ConnectionClosed(info.clone()));
            tracking
                .streams
                .fail_all(|| ClientError::ConnectionClosed(info.clone()));
            tracking.publish();
        }

        metrics::record_connection_closed(info.code);
        tracing::info!(
            code = info.code,
            reason = %info.reason,
            was_clean = info.was_clean,
            "Connection closed"
        );
        self.closed_tx.send_replace(Some(info));
    }

    // -------------------------------------------------------------------------
    // Inbound
    // -------------------------------------------------------------------------

    fn dispatch(self: &Arc<Self>, message: ServerMessage) {
        match message {
            ServerMessage::Response(response) => {
                let request_id = response.request_id;
                let orphan = {
                    let mut tracking = self.tracking.lock();
                    let Some(waiter) = tracking.requests.take(request_id) else {
                        tracing::warn!(request_id, "Response for unknown request");
                        metrics::record_dropped(DropReason::UnknownRequest);
                        return;
                    };
                    tracing::debug!(request_id, expected = %waiter.expected(), "Response received");
                    let orphan = waiter.resolve(response, &mut tracking.streams);
                    tracking.publish();
                    orphan
                };

                if let Some(stream_id) = orphan {
                    tracing::debug!(stream_id, "Stopping stream opened for departed caller");
                    self.spawn_stop(stream_id);
                }
            }
            ServerMessage::Error(error) => {
                let mut tracking = self.tracking.lock();
                let Some(waiter) = tracking.requests.take(error.request_id) else {
                    tracing::warn!(
                        request_id = error.request_id,
                        code = error.code,
                        message = %error.message,
                        "Error for unknown request"
                    );
                    metrics::record_dropped(DropReason::UnknownRequest);
                    return;
                };
                tracing::debug!(request_id = error.request_id, code = error.code, "Request rejected");
                metrics::record_response(ResponseOutcome::Rejected);
                waiter.reject(ClientError::ErrorResponse(error));
                tracking.publish();
            }
            ServerMessage::StreamData(data) => {
                if !self.tracking.lock().streams.push(data) {
                    metrics::record_dropped(DropReason::UnknownStream);
                }
            }
            ServerMessage::StreamEnd(end) => {
                let mut tracking = self.tracking.lock();
                if tracking.streams.end(end) {
                    tracking.publish();
                } else {
                    metrics::record_dropped(DropReason::UnknownStream);
                }
            }
            ServerMessage::Unrecognized(tag) => {
                tracing::warn!(tag = %tag, "Dropping envelope with unrecognized tag");
                metrics::record_dropped(DropReason::UnrecognizedTag);
            }
        }
    }
}

fn abandoned() -> ClientError {
    ClientError::ConnectionClosed(CloseInfo::abnormal("request abandoned"))
}

/// Drive inbound traffic until the transport closes.
async fn run_reader(inner: Arc<Inner>, mut source: Box<dyn TransportSource>) {
    loop {
        match source.next_event().await {
            Some(TransportEvent::Message(bytes)) => match inner.codec.decode(&bytes) {
                Ok(message) => inner.dispatch(message),
                Err(e) => {
                    metrics::record_decode_failure();
                    inner.fail(ConnectionFault::Decode(e)).await;
                }
            },
            Some(TransportEvent::Error(e)) => {
                inner.fail(ConnectionFault::Transport(e)).await;
            }
            Some(TransportEvent::Closed(info)) => {
                inner.finish(info);
                break;
            }
            None => {
                inner.finish(CloseInfo::abnormal("transport ended without close"));
                break;
            }
        }
    }
    tracing::debug!("Reader task finished");
}

// =============================================================================
// Client Handle
// =============================================================================

/// Client for the quote service over one persistent connection.
///
/// Requests may be issued concurrently from any number of tasks. Dropping
/// the client closes the connection.
pub struct QuoteClient {
    inner: Arc<Inner>,
}

impl QuoteClient {
    /// Connect over WebSocket, offering every configured subprotocol.
    ///
    /// # Errors
    ///
    /// Returns `InvalidProtocol` if the server does not settle on a
    /// supported subprotocol, or `Transport` if the connection fails.
    pub async fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        tracing::info!(url = %config.url, "Connecting to quote service");

        let transport = websocket::connect(config).await.map_err(|e| match e {
            TransportError::SubprotocolRejected(protocol) => {
                ClientError::InvalidProtocol(NegotiationError::UnknownProtocol(protocol))
            }
            other => ClientError::Transport(other),
        })?;

        Self::from_transport(transport).await
    }

    /// Take ownership of an open transport and start the reader task.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `InvalidProtocol` if the transport's subprotocol is missing
    /// or unsupported. The transport is closed in that case.
    pub async fn from_transport(transport: Transport) -> Result<Self, ClientError> {
        let Transport {
            sink,
            source,
            protocol,
        } = transport;

        let negotiated = protocol
            .as_deref()
            .ok_or(NegotiationError::NotNegotiated)
            .and_then(EnvelopeCodec::negotiate);

        let codec = match negotiated {
            Ok(codec) => codec,
            Err(e) => {
                tracing::error!(protocol = ?protocol, error = %e, "Subprotocol negotiation failed");
                if let Err(close_err) = sink
                    .close(CLOSE_PROTOCOL_ERROR, "unsupported subprotocol".to_string())
                    .await
                {
                    tracing::debug!(error = %close_err, "Closing rejected transport failed");
                }
                return Err(e.into());
            }
        };

        tracing::info!(
            protocol = %codec.subprotocol(),
            compression = %codec.compression(),
            "Connection open"
        );

        let inner = Arc::new(Inner::new(codec, sink));
        tokio::spawn(run_reader(Arc::clone(&inner), source));
        Ok(Self { inner })
    }

    /// Codec negotiated for this connection.
    #[must_use]
    pub fn codec(&self) -> EnvelopeCodec {
        self.inner.codec
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Number of requests awaiting a response.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.inner.tracking.lock().requests.len()
    }

    /// Number of open streams.
    #[must_use]
    pub fn open_streams(&self) -> usize {
        self.inner.tracking.lock().streams.len()
    }

    // -------------------------------------------------------------------------
    // Requests
    // -------------------------------------------------------------------------

    /// Fetch service information.
    ///
    /// # Errors
    ///
    /// Returns the server's error response, a protocol violation, or the
    /// connection error that ended the request.
    pub async fn get_info(&self) -> Result<Payload, ClientError> {
        self.inner
            .request(RequestData::GetInfo(GetInfoRequest {}))
            .await
    }

    /// Open a stream of swap quotes.
    ///
    /// # Errors
    ///
    /// Returns the server's error response, `Protocol` if the response did
    /// not open a stream, or the connection error that ended the request.
    pub async fn new_swap_quote_stream(
        &self,
        request: SwapQuoteRequest,
    ) -> Result<QuoteStreamResponse, ClientError> {
        let opened = self
            .inner
            .open_stream(RequestData::NewSwapQuoteStream(request))
            .await?;

        tracing::info!(stream_id = opened.stream_id, "Quote stream opened");
        let stopper = StreamStopper::new(opened.stream_id, Arc::clone(&self.inner));
        Ok(QuoteStreamResponse {
            response: opened.response,
            stream_id: opened.stream_id,
            stream: QuoteStream::new(opened.items, stopper),
        })
    }

    /// Ask the server to stop a stream and return its confirmation.
    ///
    /// Unlike [`QuoteStream::cancel`], this always sends the request.
    ///
    /// # Errors
    ///
    /// Returns the server's error response or the connection error that
    /// ended the request.
    pub async fn stop_stream(&self, stream_id: u32) -> Result<Payload, ClientError> {
        self.inner.stop_stream(stream_id).await
    }

    /// List trading venues.
    ///
    /// # Errors
    ///
    /// See [`QuoteClient::get_info`].
    pub async fn get_venues(&self, request: GetVenuesRequest) -> Result<Payload, ClientError> {
        self.inner.request(RequestData::GetVenues(request)).await
    }

    /// List quote providers.
    ///
    /// # Errors
    ///
    /// See [`QuoteClient::get_info`].
    pub async fn list_providers(
        &self,
        request: ListProvidersRequest,
    ) -> Result<Payload, ClientError> {
        self.inner.request(RequestData::ListProviders(request)).await
    }

    /// Fetch a single swap price.
    ///
    /// # Errors
    ///
    /// See [`QuoteClient::get_info`].
    pub async fn get_swap_price(&self, request: SwapPriceRequest) -> Result<Payload, ClientError> {
        self.inner.request(RequestData::GetSwapPrice(request)).await
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Close the connection and wait for the close to complete.
    ///
    /// Idempotent: later calls return the same outcome.
    pub async fn close(&self) -> CloseInfo {
        self.inner.close().await
    }

    /// Wait until the connection has closed, for any reason.
    pub async fn closed(&self) -> CloseInfo {
        self.inner.closed().await
    }
}

impl fmt::Debug for QuoteClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuoteClient")
            .field("codec", &self.inner.codec)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Drop for QuoteClient {
    fn drop(&mut self) {
        if self.inner.state() != ConnectionState::Open {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let inner = Arc::clone(&self.inner);
        handle.spawn(async move {
            inner.close().await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::MockTransportSink;
    use async_trait::async_trait;

    struct IdleSource;

    #[async_trait]
    impl TransportSource for IdleSource {
        async fn next_event(&mut self) -> Option<TransportEvent> {
            std::future::pending().await
        }
    }

    fn transport(sink: MockTransportSink, protocol: Option<&str>) -> Transport {
        Transport {
            sink: Box::new(sink),
            source: Box::new(IdleSource),
            protocol: protocol.map(str::to_string),
        }
    }

    #[test]
    fn state_display() {
        assert_eq!(ConnectionState::Open.to_string(), "open");
        assert_eq!(ConnectionState::Errored.to_string(), "errored");
    }

    #[tokio::test]
    async fn send_failure_rejects_the_request() {
        let mut sink = MockTransportSink::new();
        sink.expect_send()
            .times(1)
            .returning(|_| Err(TransportError::Closed));
        sink.expect_close().returning(|_, _| Ok(()));

        let client = QuoteClient::from_transport(transport(sink, Some("v1.api.quotes")))
            .await
            .unwrap();

        let err = client.get_info().await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(TransportError::Closed)));
        assert_eq!(client.pending_requests(), 0);
        assert_eq!(client.state(), ConnectionState::Open);
    }

    #[tokio::test]
    async fn missing_subprotocol_closes_transport() {
        let mut sink = MockTransportSink::new();
        sink.expect_close()
            .withf(|code, _| *code == CLOSE_PROTOCOL_ERROR)
            .times(1)
            .returning(|_, _| Ok(()));

        let err = QuoteClient::from_transport(transport(sink, None))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::InvalidProtocol(NegotiationError::NotNegotiated)
        ));
    }

    #[tokio::test]
    async fn unsupported_compression_is_invalid_protocol() {
        let mut sink = MockTransportSink::new();
        sink.expect_close().times(1).returning(|_, _| Ok(()));

        let err = QuoteClient::from_transport(transport(sink, Some("v1.api.quotes+lz4")))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::InvalidProtocol(NegotiationError::UnsupportedCompression { .. })
        ));
    }

    #[tokio::test]
    async fn failed_transport_close_finishes_locally() {
        let mut sink = MockTransportSink::new();
        sink.expect_close()
            .withf(|code, _| *code == CLOSE_NORMAL)
            .times(1)
            .returning(|_, _| Err(TransportError::Closed));

        let client = QuoteClient::from_transport(transport(sink, Some("v1.api.quotes+gzip")))
            .await
            .unwrap();

        let info = client.close().await;
        assert!(!info.was_clean);
        assert_eq!(client.state(), ConnectionState::Closed);
        assert_eq!(client.close().await, info);
    }
}
