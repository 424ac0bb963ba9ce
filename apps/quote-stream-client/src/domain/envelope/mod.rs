//! Quote Service Envelope Types
//!
//! Wire format types for the single WebSocket connection to the quote
//! service. Every message on the wire is one externally tagged envelope:
//! the top-level map has exactly one key naming the variant.
//!
//! # Outbound
//!
//! ```json
//! {"id": 0, "data": {"GetInfo": {}}}
//! ```
//!
//! # Inbound
//!
//! - `Response`: successful reply to a request, optionally opening a stream
//! - `Error`: the server rejected one request
//! - `StreamData`: one item pushed on an open stream
//! - `StreamEnd`: a stream finished, gracefully or with an error
//!
//! ```json
//! {"Response": {"requestId": 0, "data": {"GetInfo": {...}}}}
//! {"StreamData": {"streamId": 3, "seq": 17, "payload": {...}}}
//! ```

use std::fmt;

use serde::de::{self, IgnoredAny, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::domain::requests::{
    GetInfoRequest, GetVenuesRequest, ListProvidersRequest, StopStreamRequest, SwapPriceRequest,
    SwapQuoteRequest,
};

// =============================================================================
// Opaque Payload
// =============================================================================

/// Opaque payload carried by an envelope.
///
/// The client never interprets payload fields. `MessagePack` integers are
/// kept as exact 64-bit values, so amounts above 2^53 survive untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(pub rmpv::Value);

impl Payload {
    /// Borrow the raw `MessagePack` value.
    #[must_use]
    pub const fn as_value(&self) -> &rmpv::Value {
        &self.0
    }

    /// Consume the payload, returning the raw value.
    #[must_use]
    pub fn into_value(self) -> rmpv::Value {
        self.0
    }

    /// Look up a top-level field when the payload is a map with string keys.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&rmpv::Value> {
        self.0
            .as_map()?
            .iter()
            .find(|(k, _)| k.as_str() == Some(key))
            .map(|(_, v)| v)
    }
}

impl From<rmpv::Value> for Payload {
    fn from(value: rmpv::Value) -> Self {
        Self(value)
    }
}

// =============================================================================
// Outbound Requests
// =============================================================================

/// A request sent to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Connection-unique request id, assigned by the client.
    pub id: u64,
    /// The request kind and its parameters.
    pub data: RequestData,
}

/// Request kinds understood by the quote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RequestData {
    /// Server information (no parameters).
    GetInfo(GetInfoRequest),
    /// Open a server-push stream of swap quotes.
    NewSwapQuoteStream(SwapQuoteRequest),
    /// Stop a previously opened stream.
    StopStream(StopStreamRequest),
    /// List known venues.
    GetVenues(GetVenuesRequest),
    /// List quote providers.
    ListProviders(ListProvidersRequest),
    /// Price a single swap.
    GetSwapPrice(SwapPriceRequest),
}

impl RequestData {
    /// The response kind a conforming server answers this request with.
    #[must_use]
    pub const fn expected_response(&self) -> ResponseKind {
        match self {
            Self::GetInfo(_) => ResponseKind::GetInfo,
            Self::NewSwapQuoteStream(_) => ResponseKind::NewSwapQuoteStream,
            Self::StopStream(_) => ResponseKind::StreamStopped,
            Self::GetVenues(_) => ResponseKind::GetVenues,
            Self::ListProviders(_) => ResponseKind::ListProviders,
            Self::GetSwapPrice(_) => ResponseKind::GetSwapPrice,
        }
    }

    /// Wire name of the request kind.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::GetInfo(_) => "GetInfo",
            Self::NewSwapQuoteStream(_) => "NewSwapQuoteStream",
            Self::StopStream(_) => "StopStream",
            Self::GetVenues(_) => "GetVenues",
            Self::ListProviders(_) => "ListProviders",
            Self::GetSwapPrice(_) => "GetSwapPrice",
        }
    }
}

// =============================================================================
// Inbound Server Messages
// =============================================================================

/// A message received from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Successful response to a request.
    Response(ResponseSuccess),
    /// The server rejected a request.
    Error(ResponseError),
    /// One item on an open stream.
    StreamData(StreamData),
    /// A stream finished.
    StreamEnd(StreamEnd),
    /// A well-formed envelope whose tag this client does not know.
    ///
    /// Never produced by serde; the codec builds it so callers can log and
    /// drop messages from newer servers.
    #[serde(skip)]
    Unrecognized(String),
}

impl ServerMessage {
    /// Build a successful response envelope.
    #[must_use]
    pub const fn response(request_id: u64, data: ResponseData) -> Self {
        Self::Response(ResponseSuccess {
            request_id,
            data,
            stream: None,
        })
    }

    /// Build an error response envelope.
    #[must_use]
    pub fn error(request_id: u64, code: i64, message: impl Into<String>) -> Self {
        Self::Error(ResponseError {
            request_id,
            code,
            message: message.into(),
        })
    }

    /// Build a stream data envelope.
    #[must_use]
    pub const fn stream_data(stream_id: u32, seq: u64, payload: Payload) -> Self {
        Self::StreamData(StreamData {
            stream_id,
            seq,
            payload,
        })
    }

    /// Build a stream end envelope. `error` carries `(code, message)`.
    #[must_use]
    pub fn stream_end(stream_id: u32, error: Option<(i64, String)>) -> Self {
        let (error_code, error_message) = error.map_or((None, None), |(c, m)| (Some(c), Some(m)));
        Self::StreamEnd(StreamEnd {
            stream_id,
            error_code,
            error_message,
        })
    }
}

/// Successful response to one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSuccess {
    /// Id of the request this answers.
    pub request_id: u64,
    /// The populated response field.
    pub data: ResponseData,
    /// Present when the response opened a stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<StreamStart>,
}

/// Response payloads, tagged by kind.
///
/// Encoded as a single-entry map from kind name to payload. A kind this
/// client does not know decodes to [`ResponseData::Unrecognized`] so the
/// owning request can be rejected on its own.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseData {
    /// Server information.
    GetInfo(Payload),
    /// Initial response of a quote stream.
    NewSwapQuoteStream(Payload),
    /// Confirmation that a stream was stopped.
    StreamStopped(Payload),
    /// Venue listing.
    GetVenues(Payload),
    /// Provider listing.
    ListProviders(Payload),
    /// Single swap price.
    GetSwapPrice(Payload),
    /// A response kind this client does not know, with its wire name.
    Unrecognized(String, Payload),
}

impl ResponseData {
    /// Wrap `payload` as the given response kind.
    #[must_use]
    pub const fn from_kind(kind: ResponseKind, payload: Payload) -> Self {
        match kind {
            ResponseKind::GetInfo => Self::GetInfo(payload),
            ResponseKind::NewSwapQuoteStream => Self::NewSwapQuoteStream(payload),
            ResponseKind::StreamStopped => Self::StreamStopped(payload),
            ResponseKind::GetVenues => Self::GetVenues(payload),
            ResponseKind::ListProviders => Self::ListProviders(payload),
            ResponseKind::GetSwapPrice => Self::GetSwapPrice(payload),
        }
    }

    /// Which response kind is populated, or `None` if it is unrecognized.
    #[must_use]
    pub const fn kind(&self) -> Option<ResponseKind> {
        match self {
            Self::GetInfo(_) => Some(ResponseKind::GetInfo),
            Self::NewSwapQuoteStream(_) => Some(ResponseKind::NewSwapQuoteStream),
            Self::StreamStopped(_) => Some(ResponseKind::StreamStopped),
            Self::GetVenues(_) => Some(ResponseKind::GetVenues),
            Self::ListProviders(_) => Some(ResponseKind::ListProviders),
            Self::GetSwapPrice(_) => Some(ResponseKind::GetSwapPrice),
            Self::Unrecognized(..) => None,
        }
    }

    /// Wire name of the populated kind.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Unrecognized(name, _) => name.as_str(),
            known => known.kind().map_or("", ResponseKind::as_str),
        }
    }

    /// Borrow the payload.
    #[must_use]
    pub const fn payload(&self) -> &Payload {
        match self {
            Self::GetInfo(p)
            | Self::NewSwapQuoteStream(p)
            | Self::StreamStopped(p)
            | Self::GetVenues(p)
            | Self::ListProviders(p)
            | Self::GetSwapPrice(p)
            | Self::Unrecognized(_, p) => p,
        }
    }

    /// Consume the response, returning its payload.
    #[must_use]
    pub fn into_payload(self) -> Payload {
        match self {
            Self::GetInfo(p)
            | Self::NewSwapQuoteStream(p)
            | Self::StreamStopped(p)
            | Self::GetVenues(p)
            | Self::ListProviders(p)
            | Self::GetSwapPrice(p)
            | Self::Unrecognized(_, p) => p,
        }
    }
}

impl Serialize for ResponseData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(self.name(), self.payload())?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for ResponseData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(ResponseDataVisitor)
    }
}

struct ResponseDataVisitor;

impl<'de> Visitor<'de> for ResponseDataVisitor {
    type Value = ResponseData;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map holding exactly one response kind")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let Some(name) = map.next_key::<String>()? else {
            return Err(de::Error::invalid_length(0, &self));
        };
        let payload: Payload = map.next_value()?;
        if map.next_key::<IgnoredAny>()?.is_some() {
            return Err(de::Error::custom("response data holds more than one kind"));
        }

        Ok(match ResponseKind::from_name(&name) {
            Some(kind) => ResponseData::from_kind(kind, payload),
            None => ResponseData::Unrecognized(name, payload),
        })
    }
}

/// Response kind discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseKind {
    /// `GetInfo`
    GetInfo,
    /// `NewSwapQuoteStream`
    NewSwapQuoteStream,
    /// `StreamStopped`
    StreamStopped,
    /// `GetVenues`
    GetVenues,
    /// `ListProviders`
    ListProviders,
    /// `GetSwapPrice`
    GetSwapPrice,
}

impl ResponseKind {
    /// Wire name of the response kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GetInfo => "GetInfo",
            Self::NewSwapQuoteStream => "NewSwapQuoteStream",
            Self::StreamStopped => "StreamStopped",
            Self::GetVenues => "GetVenues",
            Self::ListProviders => "ListProviders",
            Self::GetSwapPrice => "GetSwapPrice",
        }
    }

    /// Parse a wire name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "GetInfo" => Some(Self::GetInfo),
            "NewSwapQuoteStream" => Some(Self::NewSwapQuoteStream),
            "StreamStopped" => Some(Self::StreamStopped),
            "GetVenues" => Some(Self::GetVenues),
            "ListProviders" => Some(Self::ListProviders),
            "GetSwapPrice" => Some(Self::GetSwapPrice),
            _ => None,
        }
    }
}

impl fmt::Display for ResponseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stream descriptor attached to a stream-opening response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStart {
    /// Server-assigned stream id.
    pub id: u32,
    /// Kind of data the stream carries (e.g. `"SwapQuotes"`).
    pub data_type: String,
}

/// The server rejected a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseError {
    /// Id of the rejected request.
    pub request_id: u64,
    /// Numeric error code.
    pub code: i64,
    /// Human readable message.
    pub message: String,
}

/// One item pushed on a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamData {
    /// Stream the item belongs to.
    pub stream_id: u32,
    /// Server sequence number. Informational only; items are delivered in
    /// arrival order.
    pub seq: u64,
    /// Item payload.
    pub payload: Payload,
}

/// End of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEnd {
    /// Stream that ended.
    pub stream_id: u32,
    /// Set when the stream ended abnormally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<i64>,
    /// Message accompanying `error_code`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: Vec<(&str, rmpv::Value)>) -> rmpv::Value {
        rmpv::Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (rmpv::Value::from(k), v))
                .collect(),
        )
    }

    #[test]
    fn payload_get_reads_string_keys() {
        let payload = Payload(map(vec![("version", rmpv::Value::from("1.2.0"))]));
        assert_eq!(
            payload.get("version").and_then(rmpv::Value::as_str),
            Some("1.2.0")
        );
        assert!(payload.get("missing").is_none());
    }

    #[test]
    fn payload_get_on_non_map_is_none() {
        let payload = Payload(rmpv::Value::from(7));
        assert!(payload.get("anything").is_none());
    }

    #[test]
    fn request_expected_response_maps_stop_to_stopped() {
        let data = RequestData::StopStream(StopStreamRequest { id: 4 });
        assert_eq!(data.expected_response(), ResponseKind::StreamStopped);
        assert_eq!(data.name(), "StopStream");
    }

    #[test]
    fn response_data_kind_and_payload() {
        let data = ResponseData::GetVenues(Payload(rmpv::Value::from(true)));
        assert_eq!(data.kind(), Some(ResponseKind::GetVenues));
        assert_eq!(data.name(), "GetVenues");
        assert_eq!(data.into_payload(), Payload(rmpv::Value::from(true)));
    }

    #[test]
    fn stream_end_builder_splits_error() {
        let msg = ServerMessage::stream_end(3, Some((9, "bad".to_string())));
        match msg {
            ServerMessage::StreamEnd(end) => {
                assert_eq!(end.stream_id, 3);
                assert_eq!(end.error_code, Some(9));
                assert_eq!(end.error_message.as_deref(), Some("bad"));
            }
            _ => panic!("expected StreamEnd"),
        }
    }

    fn decode_response(value: &rmpv::Value) -> ResponseSuccess {
        let mut bytes = Vec::new();
        rmpv::encode::write_value(&mut bytes, value).unwrap();
        rmp_serde::from_slice(&bytes).unwrap()
    }

    #[test]
    fn unknown_response_kind_is_kept_by_name() {
        let response = decode_response(&map(vec![
            ("requestId", rmpv::Value::from(4)),
            ("data", map(vec![("GetInfoV2", map(vec![]))])),
        ]));

        assert_eq!(response.request_id, 4);
        assert_eq!(response.data.kind(), None);
        assert_eq!(response.data.name(), "GetInfoV2");
        assert_eq!(response.data.into_payload(), Payload(map(vec![])));
    }

    #[test]
    fn response_data_rejects_empty_and_multi_kind_maps() {
        for data in [
            map(vec![]),
            map(vec![("GetInfo", map(vec![])), ("GetVenues", map(vec![]))]),
        ] {
            let mut bytes = Vec::new();
            rmpv::encode::write_value(
                &mut bytes,
                &map(vec![("requestId", rmpv::Value::from(1)), ("data", data)]),
            )
            .unwrap();
            assert!(rmp_serde::from_slice::<ResponseSuccess>(&bytes).is_err());
        }
    }

    #[test]
    fn response_data_encodes_as_single_entry_map() {
        let bytes = rmp_serde::to_vec_named(&ResponseData::Unrecognized(
            "GetInfoV2".to_string(),
            Payload(rmpv::Value::from(1)),
        ))
        .unwrap();
        let value = rmpv::decode::read_value(&mut bytes.as_slice()).unwrap();
        assert_eq!(value, map(vec![("GetInfoV2", rmpv::Value::from(1))]));
    }

    #[test]
    fn error_codes_may_be_negative() {
        let response: ResponseError = {
            let mut bytes = Vec::new();
            rmpv::encode::write_value(
                &mut bytes,
                &map(vec![
                    ("requestId", rmpv::Value::from(2)),
                    ("code", rmpv::Value::from(-32_601)),
                    ("message", rmpv::Value::from("no such method")),
                ]),
            )
            .unwrap();
            rmp_serde::from_slice(&bytes).unwrap()
        };
        assert_eq!(response.code, -32_601);
    }

    #[test]
    fn response_kind_display() {
        assert_eq!(ResponseKind::NewSwapQuoteStream.to_string(), "NewSwapQuoteStream");
    }
}
