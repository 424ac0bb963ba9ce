//! Stream Demultiplexer
//!
//! Routes server-push envelopes to the consumer sequence registered under
//! their stream id.
//!
//! # Stream Lifecycle
//!
//! ```text
//!   open(id) ──► Active ──► StreamEnd            ──► Ended (graceful)
//!                   │   └─► StreamEnd{errorCode} ──► Ended (StreamError)
//!                   ├─► begin_stop ──► Stopping ──► ack ──► Ended (graceful)
//!                   └─► connection failure      ──► Ended (connection error)
//! ```
//!
//! Items are delivered in the order the transport delivered them; `seq` is
//! not used for reordering.

use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::domain::envelope::{Payload, StreamData, StreamEnd};
use crate::infrastructure::metrics;

use super::connection::Inner;
use super::error::{ClientError, ProtocolViolation, StreamError};

/// One element of a quote sequence. An `Err` is always the last element.
pub(crate) type StreamItem = Result<Payload, ClientError>;

// =============================================================================
// Registry
// =============================================================================

/// Producers for every open stream, plus the stop flags.
#[derive(Debug, Default)]
pub(crate) struct StreamRegistry {
    streams: HashMap<u32, mpsc::UnboundedSender<StreamItem>>,
    stopping: HashSet<u32>,
}

impl StreamRegistry {
    /// Register a producer for a newly opened stream.
    ///
    /// An id that is still open is refused and the existing stream is left
    /// untouched.
    pub(crate) fn open(
        &mut self,
        stream_id: u32,
    ) -> Result<mpsc::UnboundedReceiver<StreamItem>, ProtocolViolation> {
        if self.streams.contains_key(&stream_id) {
            return Err(ProtocolViolation::DuplicateStream(stream_id));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.streams.insert(stream_id, tx);
        tracing::debug!(stream_id, "Stream opened");
        Ok(rx)
    }

    /// Deliver one item. Returns `false` if the stream is unknown.
    pub(crate) fn push(&self, data: StreamData) -> bool {
        let Some(tx) = self.streams.get(&data.stream_id) else {
            tracing::debug!(stream_id = data.stream_id, seq = data.seq, "Data for unknown stream");
            return false;
        };

        if tx.send(Ok(data.payload)).is_ok() {
            metrics::record_stream_item();
        } else {
            tracing::debug!(stream_id = data.stream_id, seq = data.seq, "Consumer gone, item dropped");
        }
        true
    }

    /// Terminate a stream as the server requested. Returns `false` if the
    /// stream is unknown.
    pub(crate) fn end(&mut self, end: StreamEnd) -> bool {
        self.stopping.remove(&end.stream_id);
        let Some(tx) = self.streams.remove(&end.stream_id) else {
            tracing::debug!(stream_id = end.stream_id, "End for unknown stream");
            return false;
        };

        match end.error_code {
            Some(code) => {
                let error = StreamError {
                    stream_id: end.stream_id,
                    code,
                    message: end.error_message.unwrap_or_default(),
                };
                tracing::warn!(stream_id = end.stream_id, code, message = %error.message, "Stream ended with error");
                let _ = tx.send(Err(error.into()));
            }
            None => tracing::debug!(stream_id = end.stream_id, "Stream ended"),
        }
        true
    }

    /// End a stream gracefully after the server confirmed a stop.
    pub(crate) fn finish(&mut self, stream_id: u32) -> bool {
        self.stopping.remove(&stream_id);
        self.streams.remove(&stream_id).is_some()
    }

    /// Set the stop flag. Returns `false` if the stream is unknown or a
    /// stop is already in flight.
    pub(crate) fn begin_stop(&mut self, stream_id: u32) -> bool {
        self.streams.contains_key(&stream_id) && self.stopping.insert(stream_id)
    }

    /// Clear the stop flag after a failed stop so it can be retried.
    pub(crate) fn abort_stop(&mut self, stream_id: u32) {
        self.stopping.remove(&stream_id);
    }

    /// Terminate every stream with a connection-wide error.
    pub(crate) fn fail_all(&mut self, make_error: impl Fn() -> ClientError) {
        self.stopping.clear();
        for (stream_id, tx) in self.streams.drain() {
            tracing::debug!(stream_id, "Terminating stream");
            let _ = tx.send(Err(make_error()));
        }
    }

    /// Whether `stream_id` is open.
    pub(crate) fn contains(&self, stream_id: u32) -> bool {
        self.streams.contains_key(&stream_id)
    }

    /// Number of open streams.
    pub(crate) fn len(&self) -> usize {
        self.streams.len()
    }
}

// =============================================================================
// Consumer Side
// =============================================================================

/// Stops one stream at most once, from any number of clones.
#[derive(Clone)]
pub struct StreamStopper {
    stream_id: u32,
    inner: Arc<Inner>,
}

impl StreamStopper {
    pub(crate) const fn new(stream_id: u32, inner: Arc<Inner>) -> Self {
        Self { stream_id, inner }
    }

    /// Stream this stopper controls.
    #[must_use]
    pub const fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// Ask the server to stop the stream and wait for its confirmation.
    ///
    /// Only the first call sends `StopStream`; later calls, and calls after
    /// the stream ended, complete immediately.
    ///
    /// # Errors
    ///
    /// Returns the error of the stop request. The stop flag is cleared so a
    /// later call may retry.
    pub async fn stop(&self) -> Result<(), ClientError> {
        self.inner.stop_stream_once(self.stream_id).await
    }
}

impl std::fmt::Debug for StreamStopper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamStopper")
            .field("stream_id", &self.stream_id)
            .finish_non_exhaustive()
    }
}

/// Server-push quote sequence.
///
/// Yields payloads in arrival order and ends when the server ends the
/// stream, the stream is stopped, or the connection goes away. An `Err`
/// item is always the last one. Dropping an unfinished stream stops it in
/// the background.
#[derive(Debug)]
pub struct QuoteStream {
    items: mpsc::UnboundedReceiver<StreamItem>,
    stopper: StreamStopper,
    finished: bool,
}

impl QuoteStream {
    pub(crate) const fn new(items: mpsc::UnboundedReceiver<StreamItem>, stopper: StreamStopper) -> Self {
        Self {
            items,
            stopper,
            finished: false,
        }
    }

    /// Server-assigned stream id.
    #[must_use]
    pub const fn stream_id(&self) -> u32 {
        self.stopper.stream_id
    }

    /// Handle that can stop this stream from another task.
    #[must_use]
    pub fn stopper(&self) -> StreamStopper {
        self.stopper.clone()
    }

    /// Stop the stream and wait for the server to confirm.
    ///
    /// Items already received remain readable. Returns immediately when a
    /// stop from another [`StreamStopper`] is still in flight; the stream is
    /// then still stopped on drop if that stop fails.
    ///
    /// # Errors
    ///
    /// Returns the error of the stop request.
    pub async fn cancel(&mut self) -> Result<(), ClientError> {
        self.stopper.stop().await?;
        self.finished = !self.stopper.inner.is_stream_open(self.stopper.stream_id);
        Ok(())
    }
}

impl Stream for QuoteStream {
    type Item = StreamItem;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let polled = this.items.poll_recv(cx);
        if matches!(polled, Poll::Ready(None | Some(Err(_)))) {
            this.finished = true;
        }
        polled
    }
}

impl Drop for QuoteStream {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        Inner::spawn_stop(&self.stopper.inner, self.stopper.stream_id);
    }
}
