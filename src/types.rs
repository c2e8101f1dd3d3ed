//! Core types shared between the ingestion side and the evaluation pipeline.

use serde::{Deserialize, Serialize};

/// Base58 account address kept as a string so the pipeline stays independent
/// of any particular Solana SDK version.
pub type Pubkey = String;

/// Wrapped SOL mint, the reference asset for route and liquidity queries.
pub const WRAPPED_SOL_MINT: &str = "So11111111111111111111111111111111111111112";

/// A newly launched token emitted by the ingestion layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTokenEvent {
    /// The mint address of the token
    pub mint: Pubkey,
    /// The creator of the token
    pub creator: Pubkey,
    /// Bonding-curve or pool account, when the source already knows it
    pub pool: Option<Pubkey>,
    /// Creation timestamp (ms since epoch)
    pub timestamp: i64,
    /// Metadata carried by the launch event, if any
    pub metadata: Option<TokenMetadata>,
}

/// Off-chain token metadata used by the pre-bond heuristics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub name: Option<String>,
    pub symbol: Option<String>,
    /// Image URI from the metadata JSON
    pub image: Option<String>,
    /// Age of the creator wallet at launch time, in seconds
    pub creator_age_secs: Option<u64>,
}

/// A single buy observed on a token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub mint: Pubkey,
    pub wallet: Pubkey,
    /// Amount in SOL
    pub amount: f64,
}
