//! Client Configuration Settings
//!
//! Configuration types for the quote client, loaded from environment
//! variables.

use std::time::Duration;

use crate::infrastructure::codec::{Compression, subprotocol_for};

/// Default compression preference, most preferred first.
const DEFAULT_COMPRESSION: &str = "zstd,brotli,gzip,none";

/// Default WebSocket handshake timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bearer token sent during the handshake.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    /// Wrap a token.
    #[must_use]
    pub const fn new(token: String) -> Self {
        Self(token)
    }

    /// Get the raw token.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuthToken([REDACTED])")
    }
}

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint.
    pub url: String,
    /// Optional bearer token.
    pub token: Option<AuthToken>,
    /// Compression schemes offered during negotiation, most preferred first.
    pub compression: Vec<Compression>,
    /// Handshake timeout.
    pub connect_timeout: Duration,
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
}

impl ClientConfig {
    /// Create a configuration with defaults for everything but the URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
            compression: Compression::ALL.to_vec(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            metrics_port: 0,
        }
    }

    /// Set the bearer token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(AuthToken::new(token.into()));
        self
    }

    /// Set the compression preference.
    #[must_use]
    pub fn with_compression(mut self, compression: Vec<Compression>) -> Self {
        self.compression = compression;
        self
    }

    /// Set the handshake timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `QUOTE_CLIENT_URL` is missing or empty, or the
    /// compression list names an unknown scheme.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// See [`ClientConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let url = required(&lookup, "QUOTE_CLIENT_URL")?;

        let token = lookup("QUOTE_CLIENT_TOKEN")
            .filter(|t| !t.is_empty())
            .map(AuthToken::new);

        let compression = parse_compression_list(
            &lookup("QUOTE_CLIENT_COMPRESSION").unwrap_or_else(|| DEFAULT_COMPRESSION.to_string()),
        )?;

        Ok(Self {
            url,
            token,
            compression,
            connect_timeout: parse_duration_secs(
                &lookup,
                "QUOTE_CLIENT_CONNECT_TIMEOUT_SECS",
                DEFAULT_CONNECT_TIMEOUT,
            ),
            metrics_port: parse_u16(&lookup, "QUOTE_CLIENT_METRICS_PORT", 0),
        })
    }

    /// Subprotocols offered during the handshake, in preference order.
    #[must_use]
    pub fn subprotocols(&self) -> Vec<String> {
        self.compression.iter().copied().map(subprotocol_for).collect()
    }
}

/// Quote stream the binary opens after connecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTarget {
    /// Mint sold.
    pub input_mint: String,
    /// Mint bought.
    pub output_mint: String,
    /// Amount in base units of the input mint.
    pub amount: u64,
    /// Wallet that would sign the swap.
    pub user: String,
}

impl StreamTarget {
    /// Load the stream target from environment variables.
    ///
    /// Returns `None` when `QUOTE_CLIENT_INPUT_MINT` is unset.
    ///
    /// # Errors
    ///
    /// Returns an error if the target is partially configured or the amount
    /// is not an integer.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load the stream target from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// See [`StreamTarget::from_env`].
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Option<Self>, ConfigError> {
        if lookup("QUOTE_CLIENT_INPUT_MINT").is_none() {
            return Ok(None);
        }

        let amount_key = "QUOTE_CLIENT_AMOUNT";
        let amount = required(&lookup, amount_key)?;
        let amount = amount.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
            key: amount_key.to_string(),
            value: amount,
        })?;

        Ok(Some(Self {
            input_mint: required(&lookup, "QUOTE_CLIENT_INPUT_MINT")?,
            output_mint: required(&lookup, "QUOTE_CLIENT_OUTPUT_MINT")?,
            amount,
            user: required(&lookup, "QUOTE_CLIENT_USER")?,
        }))
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be parsed.
    #[error("environment variable {key} has invalid value {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
    /// Compression list names an unsupported scheme.
    #[error("unknown compression scheme {0:?}")]
    UnknownCompression(String),
}

/// Parse a comma-separated compression preference list.
///
/// # Errors
///
/// Returns an error for unknown names.
pub fn parse_compression_list(list: &str) -> Result<Vec<Compression>, ConfigError> {
    let mut parsed = Vec::new();
    for name in list.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        let compression = if name.eq_ignore_ascii_case("none") {
            Compression::None
        } else {
            Compression::from_suffix(&name.to_ascii_lowercase())
                .ok_or_else(|| ConfigError::UnknownCompression(name.to_string()))?
        };
        if !parsed.contains(&compression) {
            parsed.push(compression);
        }
    }

    if parsed.is_empty() {
        parsed.push(Compression::None);
    }
    Ok(parsed)
}

fn required(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String, ConfigError> {
    let value = lookup(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
    if value.is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }
    Ok(value)
}

fn parse_u16(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u16) -> u16 {
    lookup(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_duration_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}
