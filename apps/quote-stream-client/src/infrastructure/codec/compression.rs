//! Compression Strategies
//!
//! The compression scheme is picked once, from the negotiated subprotocol
//! suffix, and applied to every message in both directions.
//!
//! | Suffix   | Algorithm | Profile                  |
//! |----------|-----------|--------------------------|
//! | (none)   | identity  |                          |
//! | `zstd`   | Zstandard | fast, general purpose    |
//! | `brotli` | Brotli    | high ratio               |
//! | `gzip`   | gzip      | streaming friendly       |

use std::fmt;
use std::io::{Read, Write};

/// Zstandard level used for outbound messages.
const ZSTD_LEVEL: i32 = 3;

/// Brotli quality used for outbound messages (0-11).
const BROTLI_QUALITY: i32 = 5;

/// Compression failures. The underlying I/O error is kept as the source.
#[derive(Debug, thiserror::Error)]
pub enum CompressionError {
    /// Compressing an outbound message failed.
    #[error("{algorithm} compression failed: {source}")]
    Compress {
        /// Algorithm name.
        algorithm: &'static str,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },

    /// Decompressing an inbound message failed.
    #[error("{algorithm} decompression failed: {source}")]
    Decompress {
        /// Algorithm name.
        algorithm: &'static str,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },
}

/// Compression applied to every message on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Compression {
    /// Messages are sent as-is.
    #[default]
    None,
    /// Zstandard.
    Zstd,
    /// Brotli.
    Brotli,
    /// gzip.
    Gzip,
}

impl Compression {
    /// Every supported scheme, most preferred first.
    pub const ALL: [Self; 4] = [Self::Zstd, Self::Brotli, Self::Gzip, Self::None];

    /// Subprotocol suffix naming this scheme (`None` for identity).
    #[must_use]
    pub const fn suffix(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Zstd => Some("zstd"),
            Self::Brotli => Some("brotli"),
            Self::Gzip => Some("gzip"),
        }
    }

    /// Parse a subprotocol suffix.
    #[must_use]
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "zstd" => Some(Self::Zstd),
            "brotli" => Some(Self::Brotli),
            "gzip" => Some(Self::Gzip),
            _ => None,
        }
    }

    /// Human readable name, `"none"` for identity.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self.suffix() {
            Some(suffix) => suffix,
            None => "none",
        }
    }

    /// Compress an outbound message.
    ///
    /// # Errors
    ///
    /// Returns an error if the compressor fails.
    pub fn compress(self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let result = match self {
            Self::None => return Ok(data.to_vec()),
            Self::Zstd => zstd::stream::encode_all(data, ZSTD_LEVEL),
            Self::Brotli => {
                let params = brotli::enc::BrotliEncoderParams {
                    quality: BROTLI_QUALITY,
                    ..Default::default()
                };
                let mut out = Vec::new();
                brotli::BrotliCompress(&mut &data[..], &mut out, &params).map(|_| out)
            }
            Self::Gzip => {
                let mut encoder =
                    flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(data).and_then(|()| encoder.finish())
            }
        };

        result.map_err(|source| CompressionError::Compress {
            algorithm: self.name(),
            source,
        })
    }

    /// Decompress an inbound message.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not valid for this scheme.
    pub fn decompress(self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let result = match self {
            Self::None => return Ok(data.to_vec()),
            Self::Zstd => zstd::stream::decode_all(data),
            Self::Brotli => {
                let mut out = Vec::new();
                brotli::BrotliDecompress(&mut &data[..], &mut out).map(|()| out)
            }
            Self::Gzip => {
                let mut out = Vec::new();
                flate2::read::GzDecoder::new(data)
                    .read_to_end(&mut out)
                    .map(|_| out)
            }
        };

        result.map_err(|source| CompressionError::Decompress {
            algorithm: self.name(),
            source,
        })
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
