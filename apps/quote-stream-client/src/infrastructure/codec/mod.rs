//! Envelope Codec Module
//!
//! Provides subprotocol negotiation, encoding and decoding for the quote
//! service connection.
//!
//! # Subprotocol
//!
//! `v1.api.quotes[+<compression>]`, where the optional suffix names the
//! compression applied to every message (`zstd`, `brotli`, `gzip`).
//!
//! # Wire Format
//!
//! Envelopes are `MessagePack` maps with named fields, compressed with the
//! negotiated scheme. Inbound envelopes must be a map with exactly one key;
//! `nil`, arrays and scalars are protocol violations.

mod compression;

pub use compression::{Compression, CompressionError};

use serde::Serialize;

use crate::domain::envelope::{Request, ServerMessage};

/// Base protocol token every subprotocol starts with.
pub const BASE_PROTOCOL: &str = "v1.api.quotes";

/// Envelope tags this client knows how to deserialize.
const KNOWN_TAGS: [&str; 4] = ["Response", "Error", "StreamData", "StreamEnd"];

// =============================================================================
// Errors
// =============================================================================

/// Subprotocol negotiation failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NegotiationError {
    /// The subprotocol is not based on [`BASE_PROTOCOL`].
    #[error("subprotocol {0:?} is not a {BASE_PROTOCOL} protocol")]
    UnknownProtocol(String),

    /// The subprotocol names a compression scheme this client lacks.
    #[error("subprotocol {protocol:?} requests unsupported compression {suffix:?}")]
    UnsupportedCompression {
        /// Full subprotocol string.
        protocol: String,
        /// Offending suffix.
        suffix: String,
    },

    /// The server did not select any subprotocol.
    #[error("server did not select a subprotocol")]
    NotNegotiated,
}

/// Outbound encoding failures, propagated unchanged.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// `MessagePack` serialization failed.
    #[error(transparent)]
    Encode(#[from] rmp_serde::encode::Error),

    /// Compression failed.
    #[error(transparent)]
    Compression(#[from] CompressionError),
}

/// Inbound decoding failures. Any of these is a protocol violation by the
/// peer.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The message could not be decompressed.
    #[error(transparent)]
    Decompress(#[from] CompressionError),

    /// The bytes are not valid `MessagePack`.
    #[error("malformed MessagePack: {0}")]
    Malformed(#[from] rmpv::decode::Error),

    /// The envelope is `nil`.
    #[error("envelope is nil")]
    Null,

    /// The envelope is an array.
    #[error("envelope is an array")]
    Array,

    /// The envelope is a scalar.
    #[error("envelope is a {0}, expected a map")]
    NotAMap(&'static str),

    /// The envelope map does not have exactly one tag.
    #[error("envelope has {0} tags, expected exactly one")]
    TagCount(usize),

    /// The envelope tag is not a string.
    #[error("envelope tag is not a string")]
    NonStringTag,

    /// The envelope body does not match its tag.
    #[error("invalid envelope body: {0}")]
    Body(#[from] rmp_serde::decode::Error),
}

// =============================================================================
// Envelope Codec
// =============================================================================

/// `MessagePack` envelope codec with negotiated compression.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnvelopeCodec {
    compression: Compression,
}

impl EnvelopeCodec {
    /// Create a codec using the given compression.
    #[must_use]
    pub const fn new(compression: Compression) -> Self {
        Self { compression }
    }

    /// Build the codec named by a negotiated subprotocol.
    ///
    /// # Errors
    ///
    /// Returns an error if the protocol is not based on [`BASE_PROTOCOL`] or
    /// names an unsupported compression suffix.
    pub fn negotiate(protocol: &str) -> Result<Self, NegotiationError> {
        let Some(rest) = protocol.strip_prefix(BASE_PROTOCOL) else {
            return Err(NegotiationError::UnknownProtocol(protocol.to_string()));
        };

        if rest.is_empty() {
            return Ok(Self::new(Compression::None));
        }

        let Some(suffix) = rest.strip_prefix('+') else {
            return Err(NegotiationError::UnknownProtocol(protocol.to_string()));
        };

        Compression::from_suffix(suffix).map(Self::new).ok_or_else(|| {
            NegotiationError::UnsupportedCompression {
                protocol: protocol.to_string(),
                suffix: suffix.to_string(),
            }
        })
    }

    /// Compression applied by this codec.
    #[must_use]
    pub const fn compression(&self) -> Compression {
        self.compression
    }

    /// Subprotocol string naming this codec.
    #[must_use]
    pub fn subprotocol(&self) -> String {
        subprotocol_for(self.compression)
    }

    /// Encode a value as a compressed `MessagePack` map.
    ///
    /// # Errors
    ///
    /// Returns the serializer or compressor error unchanged.
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        let raw = rmp_serde::to_vec_named(value)?;
        Ok(self.compression.compress(&raw)?)
    }

    /// Decode an inbound server envelope.
    ///
    /// A well-formed envelope with an unknown tag decodes to
    /// [`ServerMessage::Unrecognized`].
    ///
    /// # Errors
    ///
    /// Returns an error if decompression fails, the bytes are not
    /// `MessagePack`, or the envelope shape is invalid.
    pub fn decode(&self, data: &[u8]) -> Result<ServerMessage, DecodeError> {
        let raw = self.compression.decompress(data)?;
        let tag = envelope_tag(&raw)?;

        if KNOWN_TAGS.contains(&tag.as_str()) {
            Ok(rmp_serde::from_slice(&raw)?)
        } else {
            Ok(ServerMessage::Unrecognized(tag))
        }
    }

    /// Decode an outbound request, as the server would.
    ///
    /// # Errors
    ///
    /// Returns an error if decompression or deserialization fails.
    pub fn decode_request(&self, data: &[u8]) -> Result<Request, DecodeError> {
        let raw = self.compression.decompress(data)?;
        Ok(rmp_serde::from_slice(&raw)?)
    }
}

/// Subprotocol string for a compression scheme.
#[must_use]
pub fn subprotocol_for(compression: Compression) -> String {
    match compression.suffix() {
        Some(suffix) => format!("{BASE_PROTOCOL}+{suffix}"),
        None => BASE_PROTOCOL.to_string(),
    }
}

/// Validate the top-level shape and return the single tag.
fn envelope_tag(raw: &[u8]) -> Result<String, DecodeError> {
    let value = rmpv::decode::read_value(&mut &raw[..])?;

    match value {
        rmpv::Value::Nil => Err(DecodeError::Null),
        rmpv::Value::Array(_) => Err(DecodeError::Array),
        rmpv::Value::Map(entries) => {
            if entries.len() != 1 {
                return Err(DecodeError::TagCount(entries.len()));
            }
            entries
                .into_iter()
                .next()
                .and_then(|(key, _)| match key {
                    rmpv::Value::String(s) => s.into_str(),
                    _ => None,
                })
                .ok_or(DecodeError::NonStringTag)
        }
        other => Err(DecodeError::NotAMap(value_kind(&other))),
    }
}

const fn value_kind(value: &rmpv::Value) -> &'static str {
    match value {
        rmpv::Value::Nil => "nil",
        rmpv::Value::Boolean(_) => "boolean",
        rmpv::Value::Integer(_) => "integer",
        rmpv::Value::F32(_) | rmpv::Value::F64(_) => "float",
        rmpv::Value::String(_) => "string",
        rmpv::Value::Binary(_) => "binary",
        rmpv::Value::Array(_) => "array",
        rmpv::Value::Map(_) => "map",
        rmpv::Value::Ext(..) => "extension",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::envelope::{Payload, RequestData, ResponseData, StreamStart};
    use crate::domain::requests::{GetInfoRequest, SwapParams, SwapQuoteRequest, TransactionParams};
    use test_case::test_case;

    fn info_payload() -> Payload {
        Payload(rmpv::Value::Map(vec![(
            rmpv::Value::from("version"),
            rmpv::Value::from("1.0.0"),
        )]))
    }

    #[test_case("v1.api.quotes", Compression::None ; "identity")]
    #[test_case("v1.api.quotes+zstd", Compression::Zstd ; "zstd")]
    #[test_case("v1.api.quotes+brotli", Compression::Brotli ; "brotli")]
    #[test_case("v1.api.quotes+gzip", Compression::Gzip ; "gzip")]
    fn negotiate_supported(protocol: &str, expected: Compression) {
        let codec = EnvelopeCodec::negotiate(protocol).unwrap();
        assert_eq!(codec.compression(), expected);
        assert_eq!(codec.subprotocol(), protocol);
    }

    #[test_case("v2.api.quotes" ; "wrong base")]
    #[test_case("" ; "empty")]
    #[test_case("v1.api.quotesx" ; "base with trailing garbage")]
    fn negotiate_rejects_unknown_base(protocol: &str) {
        assert!(matches!(
            EnvelopeCodec::negotiate(protocol),
            Err(NegotiationError::UnknownProtocol(_))
        ));
    }

    #[test]
    fn negotiate_rejects_unknown_suffix() {
        let err = EnvelopeCodec::negotiate("v1.api.quotes+lz4").unwrap_err();
        assert_eq!(
            err,
            NegotiationError::UnsupportedCompression {
                protocol: "v1.api.quotes+lz4".to_string(),
                suffix: "lz4".to_string(),
            }
        );
    }

    #[test_case(Compression::None ; "identity")]
    #[test_case(Compression::Zstd ; "zstd")]
    #[test_case(Compression::Brotli ; "brotli")]
    #[test_case(Compression::Gzip ; "gzip")]
    fn request_round_trip(compression: Compression) {
        let codec = EnvelopeCodec::new(compression);
        let request = Request {
            id: 42,
            data: RequestData::NewSwapQuoteStream(SwapQuoteRequest::new(
                SwapParams::new("IN", "OUT", u64::MAX),
                TransactionParams::new("WALLET"),
            )),
        };

        let bytes = codec.encode(&request).unwrap();
        assert_eq!(codec.decode_request(&bytes).unwrap(), request);
    }

    #[test_case(Compression::None ; "identity")]
    #[test_case(Compression::Zstd ; "zstd")]
    #[test_case(Compression::Brotli ; "brotli")]
    #[test_case(Compression::Gzip ; "gzip")]
    fn server_message_round_trip(compression: Compression) {
        let codec = EnvelopeCodec::new(compression);
        let message = ServerMessage::Response(crate::domain::envelope::ResponseSuccess {
            request_id: 7,
            data: ResponseData::NewSwapQuoteStream(info_payload()),
            stream: Some(StreamStart {
                id: 3,
                data_type: "SwapQuotes".to_string(),
            }),
        });

        let bytes = codec.encode(&message).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), message);
    }

    #[test]
    fn large_integers_survive_exactly() {
        let codec = EnvelopeCodec::default();
        let huge = (1_u64 << 53) + 1;
        let message = ServerMessage::stream_data(
            1,
            u64::MAX,
            Payload(rmpv::Value::Map(vec![(
                rmpv::Value::from("outAmount"),
                rmpv::Value::from(huge),
            )])),
        );

        let bytes = codec.encode(&message).unwrap();
        match codec.decode(&bytes).unwrap() {
            ServerMessage::StreamData(data) => {
                assert_eq!(data.seq, u64::MAX);
                assert_eq!(
                    data.payload.get("outAmount").and_then(rmpv::Value::as_u64),
                    Some(huge)
                );
            }
            other => panic!("expected StreamData, got {other:?}"),
        }
    }

    #[test]
    fn get_info_request_is_an_empty_map() {
        let codec = EnvelopeCodec::default();
        let bytes = codec
            .encode(&Request {
                id: 0,
                data: RequestData::GetInfo(GetInfoRequest {}),
            })
            .unwrap();

        let value = rmpv::decode::read_value(&mut bytes.as_slice()).unwrap();
        let data = value
            .as_map()
            .unwrap()
            .iter()
            .find(|(k, _)| k.as_str() == Some("data"))
            .map(|(_, v)| v.clone())
            .unwrap();
        let (tag, body) = &data.as_map().unwrap()[0];
        assert_eq!(tag.as_str(), Some("GetInfo"));
        assert_eq!(body.as_map().map(Vec::len), Some(0));
    }

    #[test]
    fn decode_rejects_nil() {
        let codec = EnvelopeCodec::default();
        let bytes = rmp_serde::to_vec(&()).unwrap();
        assert!(matches!(codec.decode(&bytes), Err(DecodeError::Null)));
    }

    #[test]
    fn decode_rejects_array() {
        let codec = EnvelopeCodec::default();
        let bytes = rmp_serde::to_vec(&vec![1, 2, 3]).unwrap();
        assert!(matches!(codec.decode(&bytes), Err(DecodeError::Array)));
    }

    #[test_case(rmpv::Value::from(12) ; "integer")]
    #[test_case(rmpv::Value::from("Response") ; "string")]
    #[test_case(rmpv::Value::from(true) ; "boolean")]
    fn decode_rejects_scalars(value: rmpv::Value) {
        let codec = EnvelopeCodec::default();
        let mut bytes = Vec::new();
        rmpv::encode::write_value(&mut bytes, &value).unwrap();
        assert!(matches!(codec.decode(&bytes), Err(DecodeError::NotAMap(_))));
    }

    #[test]
    fn decode_rejects_zero_and_multiple_tags() {
        let codec = EnvelopeCodec::default();

        let mut empty = Vec::new();
        rmpv::encode::write_value(&mut empty, &rmpv::Value::Map(vec![])).unwrap();
        assert!(matches!(codec.decode(&empty), Err(DecodeError::TagCount(0))));

        let two = rmpv::Value::Map(vec![
            (rmpv::Value::from("Response"), rmpv::Value::Map(vec![])),
            (rmpv::Value::from("Error"), rmpv::Value::Map(vec![])),
        ]);
        let mut bytes = Vec::new();
        rmpv::encode::write_value(&mut bytes, &two).unwrap();
        assert!(matches!(codec.decode(&bytes), Err(DecodeError::TagCount(2))));
    }

    #[test]
    fn decode_unknown_tag_is_unrecognized() {
        let codec = EnvelopeCodec::default();
        let value = rmpv::Value::Map(vec![(
            rmpv::Value::from("Heartbeat"),
            rmpv::Value::Map(vec![]),
        )]);
        let mut bytes = Vec::new();
        rmpv::encode::write_value(&mut bytes, &value).unwrap();

        assert_eq!(
            codec.decode(&bytes).unwrap(),
            ServerMessage::Unrecognized("Heartbeat".to_string())
        );
    }

    #[test]
    fn decode_rejects_truncated_bytes() {
        let codec = EnvelopeCodec::default();
        // fixmap header announcing one entry, then nothing
        assert!(matches!(codec.decode(&[0x81]), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn decode_with_wrong_compression_fails() {
        let sender = EnvelopeCodec::new(Compression::None);
        let receiver = EnvelopeCodec::new(Compression::Zstd);
        let bytes = sender
            .encode(&ServerMessage::error(1, 400, "bad request"))
            .unwrap();
        assert!(matches!(
            receiver.decode(&bytes),
            Err(DecodeError::Decompress(_))
        ));
    }
}
