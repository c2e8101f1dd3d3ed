//! Contracts for the services the pipeline consumes.
//!
//! Implementations live outside the core (see `pipeline::sources` for the
//! RPC and Jupiter adapters). Every call is bounded by the evaluator's
//! collaborator timeout; errors are mapped to conservative check results.

use crate::pipeline::types::Candidate;
use crate::types::{Pubkey, TokenMetadata};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Liquidity figures returned by a quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// Liquidity depth in SOL
    pub liquidity: f64,
    /// Price impact as a fraction
    pub price_impact: f64,
}

/// DEX routing and quoting service.
#[async_trait]
pub trait Router: Send + Sync {
    /// Whether any path exists. A route that is not indexed yet is `Ok(false)`.
    async fn has_route(&self, from: &str, to: &str) -> Result<bool>;

    /// Simulated liquidity for swapping `amount` of `from` into `to`.
    async fn quote(&self, from: &str, to: &str, amount: u64) -> Result<Option<Quote>>;
}

/// Mint account authorities as read from the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintInfo {
    pub mint_authority: Option<Pubkey>,
    pub freeze_authority: Option<Pubkey>,
}

/// Read access to parsed on-chain accounts.
#[async_trait]
pub trait LedgerReader: Send + Sync {
    async fn get_parsed_mint_info(&self, mint: &str) -> Result<MintInfo>;
}

/// Token metadata lookup for the pre-bond heuristics.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn fetch_metadata(&self, mint: &str) -> Result<TokenMetadata>;
}

/// Detects the AMM pool created when a bonding curve completes.
#[async_trait]
pub trait PoolLocator: Send + Sync {
    async fn find_pool(&self, mint: &str) -> Result<Option<Pubkey>>;
}

/// Optional listed-stage check such as social presence or holder spread.
#[async_trait]
pub trait SupplementalCheck: Send + Sync {
    fn name(&self) -> &str;

    async fn check(&self, candidate: &Candidate) -> Result<bool>;
}

/// Sink for per-check pass/fail outcomes. Failures here never abort an
/// evaluation.
#[async_trait]
pub trait CheckRecorder: Send + Sync {
    async fn record_check_outcome(&self, check: &str, passed: bool) -> Result<()>;
}
