//! Request/Response Correlation
//!
//! Tracks one waiter per in-flight request id and settles it exactly once.
//!
//! # Lifecycle
//!
//! ```text
//!   register() ──► Sent ──► take(id) ──► resolve() ──► Resolved
//!                                   └──► reject()  ──► Rejected
//! ```
//!
//! Ids start at 0, increase by one per request and are never reused on a
//! connection. A waiter leaves the map the moment it is taken, so a second
//! response for the same id finds nothing and is dropped by the caller.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};

use crate::domain::envelope::{Payload, ResponseData, ResponseKind, ResponseSuccess};
use crate::infrastructure::metrics::{self, ResponseOutcome};

use super::demux::{StreamItem, StreamRegistry};
use super::error::{ClientError, ProtocolViolation};

/// Completion side of a request future.
pub(crate) type Completion<T> = oneshot::Sender<Result<T, ClientError>>;

/// Result of a successful stream-opening request, before it is wrapped for
/// the consumer.
#[derive(Debug)]
pub(crate) struct OpenedStream {
    pub(crate) response: Payload,
    pub(crate) stream_id: u32,
    pub(crate) items: mpsc::UnboundedReceiver<StreamItem>,
}

/// Pending completion for one request, tagged by what it expects.
#[derive(Debug)]
pub(crate) enum Waiter {
    /// Expects a plain response of the given kind.
    Unary {
        expected: ResponseKind,
        completion: Completion<Payload>,
    },
    /// Expects a `NewSwapQuoteStream` response that opens a stream.
    Stream { completion: Completion<OpenedStream> },
}

impl Waiter {
    /// Response kind this waiter accepts.
    pub(crate) const fn expected(&self) -> ResponseKind {
        match self {
            Self::Unary { expected, .. } => *expected,
            Self::Stream { .. } => ResponseKind::NewSwapQuoteStream,
        }
    }

    /// Settle the waiter with a success envelope.
    ///
    /// Stream-opening responses register the new stream in `streams`.
    /// Returns the id of a stream that was opened for a caller who is no
    /// longer waiting, so it can be stopped.
    pub(crate) fn resolve(
        self,
        response: ResponseSuccess,
        streams: &mut StreamRegistry,
    ) -> Option<u32> {
        let request_id = response.request_id;

        match self {
            Self::Unary {
                expected,
                completion,
            } => {
                let result = if response.data.kind() == Some(expected) {
                    Ok(response.data.into_payload())
                } else {
                    Err(mismatch(expected, &response.data))
                };
                deliver(request_id, completion, result);
                None
            }
            Self::Stream { completion } => {
                let result = match (response.data, response.stream) {
                    (ResponseData::NewSwapQuoteStream(payload), Some(start)) => {
                        match streams.open(start.id) {
                            Ok(items) => Ok(OpenedStream {
                                response: payload,
                                stream_id: start.id,
                                items,
                            }),
                            Err(violation) => Err(violation.into()),
                        }
                    }
                    (ResponseData::NewSwapQuoteStream(_), None) => {
                        Err(ProtocolViolation::MissingStreamStart.into())
                    }
                    (other, _) => Err(mismatch(ResponseKind::NewSwapQuoteStream, &other)),
                };

                let opened = result.as_ref().ok().map(|o| o.stream_id);
                let delivered = deliver(request_id, completion, result);
                opened.filter(|_| !delivered)
            }
        }
    }

    /// Settle the waiter with an error.
    pub(crate) fn reject(self, error: ClientError) {
        match self {
            Self::Unary { completion, .. } => {
                let _ = completion.send(Err(error));
            }
            Self::Stream { completion } => {
                let _ = completion.send(Err(error));
            }
        }
    }
}

/// Error for a response whose populated kind is not `expected`.
fn mismatch(expected: ResponseKind, data: &ResponseData) -> ClientError {
    let violation = match data.kind() {
        Some(actual) => ProtocolViolation::UnexpectedResponse { expected, actual },
        None => ProtocolViolation::UnrecognizedResponse {
            expected,
            name: data.name().to_string(),
        },
    };
    violation.into()
}

/// Send a result to the caller. Returns whether anyone received it.
fn deliver<T>(request_id: u64, completion: Completion<T>, result: Result<T, ClientError>) -> bool {
    metrics::record_response(if result.is_ok() {
        ResponseOutcome::Resolved
    } else {
        ResponseOutcome::ProtocolError
    });

    if let Err(e) = &result {
        tracing::warn!(request_id, error = %e, "Response violated request contract");
    }

    let delivered = completion.send(result).is_ok();
    if !delivered {
        tracing::debug!(request_id, "Caller stopped waiting before response arrived");
    }
    delivered
}

/// In-flight requests keyed by id.
#[derive(Debug, Default)]
pub(crate) struct PendingRequests {
    next_id: u64,
    waiters: HashMap<u64, Waiter>,
}

impl PendingRequests {
    /// Next unused request id.
    pub(crate) const fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Allocate an id and track `waiter` under it.
    pub(crate) fn register(&mut self, waiter: Waiter) -> u64 {
        let id = self.allocate_id();
        self.waiters.insert(id, waiter);
        id
    }

    /// Remove and return the waiter for `id`.
    pub(crate) fn take(&mut self, id: u64) -> Option<Waiter> {
        self.waiters.remove(&id)
    }

    /// Number of requests awaiting a response.
    pub(crate) fn len(&self) -> usize {
        self.waiters.len()
    }

    /// Reject every waiter, leaving the map empty.
    pub(crate) fn reject_all(&mut self, make_error: impl Fn() -> ClientError) {
        for (id, waiter) in self.waiters.drain() {
            tracing::debug!(request_id = id, "Rejecting pending request");
            waiter.reject(make_error());
        }
    }
}
