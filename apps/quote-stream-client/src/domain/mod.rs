//! Domain Layer - Wire envelopes and request parameters.
//!
//! This layer contains the types exchanged with the quote service. Payload
//! contents are opaque; only the envelope shape is interpreted here.

/// Envelope types (requests out, server messages in).
pub mod envelope;

/// Typed request parameters for each request kind.
pub mod requests;
