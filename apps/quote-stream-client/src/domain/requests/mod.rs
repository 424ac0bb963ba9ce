//! Request Parameters
//!
//! Parameter types for each request kind. Fields are forwarded to the
//! server as-is; the client does not validate their business meaning.
//!
//! # Wire Format
//!
//! Field names are camelCase and optional fields are omitted when unset:
//!
//! ```json
//! {"swap": {"inputMint": "...", "outputMint": "...", "amount": 1000000},
//!  "transaction": {"userPublicKey": "..."},
//!  "update": {"intervalMs": 500}}
//! ```

use serde::{Deserialize, Serialize};

/// Parameters of `GetInfo` (none).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetInfoRequest {}

/// Which side of the swap `amount` fixes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwapMode {
    /// `amount` is the exact input.
    #[default]
    ExactIn,
    /// `amount` is the exact output.
    ExactOut,
}

/// Swap being quoted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapParams {
    /// Mint of the input token.
    pub input_mint: String,
    /// Mint of the output token.
    pub output_mint: String,
    /// Raw token amount.
    pub amount: u64,
    /// Exact-in or exact-out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swap_mode: Option<SwapMode>,
    /// Allowed slippage in basis points.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slippage_bps: Option<u16>,
    /// Restrict routing to these venues.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dexes: Option<Vec<String>>,
    /// Never route through these venues.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_dexes: Option<Vec<String>>,
    /// Only single-hop routes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub only_direct_routes: Option<bool>,
    /// Restrict quoting to these providers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub providers: Option<Vec<String>>,
}

impl SwapParams {
    /// Create swap parameters with only the required fields set.
    #[must_use]
    pub fn new(input_mint: impl Into<String>, output_mint: impl Into<String>, amount: u64) -> Self {
        Self {
            input_mint: input_mint.into(),
            output_mint: output_mint.into(),
            amount,
            swap_mode: None,
            slippage_bps: None,
            dexes: None,
            exclude_dexes: None,
            only_direct_routes: None,
            providers: None,
        }
    }

    /// Set the swap mode.
    #[must_use]
    pub const fn with_swap_mode(mut self, mode: SwapMode) -> Self {
        self.swap_mode = Some(mode);
        self
    }

    /// Set the allowed slippage.
    #[must_use]
    pub const fn with_slippage_bps(mut self, bps: u16) -> Self {
        self.slippage_bps = Some(bps);
        self
    }

    /// Restrict routing to the given venues.
    #[must_use]
    pub fn with_dexes(mut self, dexes: Vec<String>) -> Self {
        self.dexes = Some(dexes);
        self
    }

    /// Exclude the given venues.
    #[must_use]
    pub fn with_exclude_dexes(mut self, dexes: Vec<String>) -> Self {
        self.exclude_dexes = Some(dexes);
        self
    }
}

/// Transaction-building parameters for a quote stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionParams {
    /// Wallet that will sign the swap.
    pub user_public_key: String,
    /// Close the input token account after the swap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_input_token_account: Option<bool>,
    /// Create the output token account if missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_output_token_account: Option<bool>,
    /// Account receiving the integrator fee.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_account: Option<String>,
    /// Integrator fee in basis points.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_bps: Option<u16>,
}

impl TransactionParams {
    /// Create transaction parameters for the given wallet.
    #[must_use]
    pub fn new(user_public_key: impl Into<String>) -> Self {
        Self {
            user_public_key: user_public_key.into(),
            close_input_token_account: None,
            create_output_token_account: None,
            fee_account: None,
            fee_bps: None,
        }
    }
}

/// How often the server should push updated quotes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteUpdateParams {
    /// Minimum interval between updates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,
    /// Number of quotes per update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_quotes: Option<u32>,
}

/// Parameters of `NewSwapQuoteStream`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapQuoteRequest {
    /// Swap being quoted.
    pub swap: SwapParams,
    /// Transaction-building parameters.
    pub transaction: TransactionParams,
    /// Update cadence; server defaults when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<QuoteUpdateParams>,
}

impl SwapQuoteRequest {
    /// Create a stream request with the server's default update cadence.
    #[must_use]
    pub const fn new(swap: SwapParams, transaction: TransactionParams) -> Self {
        Self {
            swap,
            transaction,
            update: None,
        }
    }

    /// Set the update cadence.
    #[must_use]
    pub fn with_update(mut self, update: QuoteUpdateParams) -> Self {
        self.update = Some(update);
        self
    }
}

/// Parameters of `StopStream`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopStreamRequest {
    /// Stream to stop.
    pub id: u32,
}

/// Parameters of `GetVenues`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetVenuesRequest {
    /// Include on-chain program ids in the listing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_program_ids: Option<bool>,
}

/// Parameters of `ListProviders`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListProvidersRequest {
    /// Include provider icon URLs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_icons: Option<bool>,
}

/// Parameters of `GetSwapPrice`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapPriceRequest {
    /// Mint of the input token.
    pub input_mint: String,
    /// Mint of the output token.
    pub output_mint: String,
    /// Raw input amount.
    pub amount: u64,
    /// Restrict pricing to these venues.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dexes: Option<Vec<String>>,
    /// Never price through these venues.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_dexes: Option<Vec<String>>,
}

impl SwapPriceRequest {
    /// Create a price request with only the required fields set.
    #[must_use]
    pub fn new(input_mint: impl Into<String>, output_mint: impl Into<String>, amount: u64) -> Self {
        Self {
            input_mint: input_mint.into(),
            output_mint: output_mint.into(),
            amount,
            dexes: None,
            exclude_dexes: None,
        }
    }
}
