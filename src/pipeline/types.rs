//! Core types for the stage-aware evaluation pipeline.

use crate::types::{Pubkey, TokenMetadata};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle stage of a tracked token.
///
/// Variants are declared in progression order so the derived `Ord` matches
/// the lifecycle; `Dropped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenStage {
    /// Still trading on the bonding curve
    PreBond,
    /// Bonding curve completed, waiting for the AMM pool
    BondedOnPump,
    /// Pool detected on Raydium
    RaydiumListed,
    /// Rejected; no further evaluation
    Dropped,
}

impl TokenStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStage::PreBond => "PRE_BOND",
            TokenStage::BondedOnPump => "BONDED_ON_PUMP",
            TokenStage::RaydiumListed => "RAYDIUM_LISTED",
            TokenStage::Dropped => "DROPPED",
        }
    }

    /// The stage reached after all checks of this stage pass.
    pub fn next(&self) -> Option<TokenStage> {
        match self {
            TokenStage::PreBond => Some(TokenStage::BondedOnPump),
            TokenStage::BondedOnPump => Some(TokenStage::RaydiumListed),
            TokenStage::RaydiumListed | TokenStage::Dropped => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TokenStage::Dropped)
    }
}

impl fmt::Display for TokenStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a check rejected a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    NoRoute,
    LowLiquidity,
    HighLiquidity,
    RouteCheckFailed,
    MintAuthorityPresent,
    FreezeAuthorityPresent,
    AuthorityCheckFailed,
    SuspiciousCreator,
    LowPreBondScore,
    MetadataUnavailable,
    LowWalletDiversity,
    ExcessiveVelocity,
    UniformAmounts,
    NoActivity,
    PoolCheckFailed,
    MaxWaitExceeded,
    StageTimeout,
    SupplementalCheckFailed(String),
}

impl FailureReason {
    pub fn as_str(&self) -> &str {
        match self {
            FailureReason::NoRoute => "NO_ROUTE",
            FailureReason::LowLiquidity => "LOW_LIQUIDITY",
            FailureReason::HighLiquidity => "HIGH_LIQUIDITY",
            FailureReason::RouteCheckFailed => "ROUTE_CHECK_FAILED",
            FailureReason::MintAuthorityPresent => "MINT_AUTHORITY_PRESENT",
            FailureReason::FreezeAuthorityPresent => "FREEZE_AUTHORITY_PRESENT",
            FailureReason::AuthorityCheckFailed => "AUTHORITY_CHECK_FAILED",
            FailureReason::SuspiciousCreator => "SUSPICIOUS_CREATOR",
            FailureReason::LowPreBondScore => "LOW_PRE_BOND_SCORE",
            FailureReason::MetadataUnavailable => "METADATA_UNAVAILABLE",
            FailureReason::LowWalletDiversity => "LOW_WALLET_DIVERSITY",
            FailureReason::ExcessiveVelocity => "EXCESSIVE_VELOCITY",
            FailureReason::UniformAmounts => "UNIFORM_AMOUNTS",
            FailureReason::NoActivity => "NO_ACTIVITY",
            FailureReason::PoolCheckFailed => "POOL_CHECK_FAILED",
            FailureReason::MaxWaitExceeded => "MAX_WAIT_EXCEEDED",
            FailureReason::StageTimeout => "STAGE_TIMEOUT",
            FailureReason::SupplementalCheckFailed(_) => "SUPPLEMENTAL_CHECK_FAILED",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::SupplementalCheckFailed(name) => {
                write!(f, "SUPPLEMENTAL_CHECK_FAILED({})", name)
            }
            other => f.write_str(other.as_str()),
        }
    }
}

/// Risk classification attached to every check result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Outcome of the route and liquidity check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteCheckResult {
    pub has_route: bool,
    /// Simulated liquidity depth in SOL
    pub liquidity: Option<f64>,
    /// Price impact of the probe quote, as a fraction
    pub price_impact: Option<f64>,
    pub risk_level: RiskLevel,
    pub failures: Vec<FailureReason>,
}

impl RouteCheckResult {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }

    pub(crate) fn failed(reason: FailureReason, has_route: bool) -> Self {
        Self {
            has_route,
            liquidity: None,
            price_impact: None,
            risk_level: RiskLevel::High,
            failures: vec![reason],
        }
    }
}

/// Outcome of the mint/freeze authority check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthoritiesCheckResult {
    pub has_mint_authority: bool,
    pub has_freeze_authority: bool,
    pub risk_level: RiskLevel,
    /// Set when the result is the conservative fallback for a failed lookup
    pub error: Option<String>,
}

impl AuthoritiesCheckResult {
    pub fn from_authorities(has_mint_authority: bool, has_freeze_authority: bool) -> Self {
        let risk_level = match (has_mint_authority, has_freeze_authority) {
            (true, true) => RiskLevel::High,
            (false, false) => RiskLevel::Low,
            _ => RiskLevel::Medium,
        };
        Self {
            has_mint_authority,
            has_freeze_authority,
            risk_level,
            error: None,
        }
    }

    /// Absence of proof is treated as proof of risk.
    pub fn conservative(error: impl Into<String>) -> Self {
        Self {
            has_mint_authority: true,
            has_freeze_authority: true,
            risk_level: RiskLevel::High,
            error: Some(error.into()),
        }
    }

    pub fn failure_reasons(&self) -> Vec<FailureReason> {
        if self.error.is_some() {
            return vec![FailureReason::AuthorityCheckFailed];
        }
        let mut reasons = Vec::new();
        if self.has_mint_authority {
            reasons.push(FailureReason::MintAuthorityPresent);
        }
        if self.has_freeze_authority {
            reasons.push(FailureReason::FreezeAuthorityPresent);
        }
        reasons
    }
}

/// Route data captured once a candidate reaches the listed stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSnapshot {
    pub has_route: bool,
    pub liquidity: Option<f64>,
    pub price_impact: Option<f64>,
}

/// Retry bookkeeping for the current stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryState {
    /// Failed evaluations in the current stage
    pub attempts: u32,
    pub max_attempts: u32,
    /// How long the candidate may stay in the current stage
    pub retry_window_ms: i64,
    pub stage_entered_at: i64,
    /// Pool-detection polls while bonded; these do not count as attempts
    pub pool_polls: u32,
}

/// A tracked token, owned by the evaluator's registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub mint: Pubkey,
    pub creator: Pubkey,
    pub pool: Option<Pubkey>,
    pub created_at: i64,
    pub discovered_at: i64,
    stage: TokenStage,
    pub metadata: Option<TokenMetadata>,

    pub pre_bond_score: Option<f64>,
    pub first_bonded_at: Option<i64>,
    pub last_checked_at: Option<i64>,
    pub route: Option<RouteSnapshot>,

    pub retry: RetryState,

    pub last_failure_reason: Option<FailureReason>,
    failure_history: Vec<FailureReason>,

    /// Registry generation; results computed for an older generation are stale
    pub generation: u64,
}

impl Candidate {
    pub fn new(
        mint: Pubkey,
        creator: Pubkey,
        created_at: i64,
        discovered_at: i64,
        max_attempts: u32,
        retry_window_ms: i64,
    ) -> Self {
        Self {
            mint,
            creator,
            pool: None,
            created_at,
            discovered_at,
            stage: TokenStage::PreBond,
            metadata: None,
            pre_bond_score: None,
            first_bonded_at: None,
            last_checked_at: None,
            route: None,
            retry: RetryState {
                attempts: 0,
                max_attempts,
                retry_window_ms,
                stage_entered_at: discovered_at,
                pool_polls: 0,
            },
            last_failure_reason: None,
            failure_history: Vec::new(),
            generation: 0,
        }
    }

    pub fn stage(&self) -> TokenStage {
        self.stage
    }

    pub fn failure_history(&self) -> &[FailureReason] {
        &self.failure_history
    }

    pub fn record_failure(&mut self, reason: FailureReason) {
        self.last_failure_reason = Some(reason.clone());
        self.failure_history.push(reason);
    }

    /// Moves the candidate to `next`, resetting per-stage retry state.
    ///
    /// Stages only move forward; a regression is an invariant violation.
    pub fn enter_stage(&mut self, next: TokenStage, now: i64, retry_window_ms: i64) -> Result<()> {
        if next <= self.stage {
            bail!(
                "stage regression for {}: {} -> {}",
                self.mint,
                self.stage,
                next
            );
        }
        self.stage = next;
        self.retry.attempts = 0;
        self.retry.pool_polls = 0;
        self.retry.stage_entered_at = now;
        self.retry.retry_window_ms = retry_window_ms;
        if next == TokenStage::BondedOnPump {
            self.first_bonded_at = Some(now);
        }
        Ok(())
    }

    pub fn is_dropped(&self) -> bool {
        self.stage.is_terminal()
    }
}

/// Result of one evaluation, consumed by downstream trading and alerting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTransitionResult {
    pub mint: Pubkey,
    pub success: bool,
    /// Set when the candidate moved to a new stage (including `Dropped`)
    pub new_stage: Option<TokenStage>,
    pub reason: Option<FailureReason>,
    pub should_drop: bool,
    pub retry_after_ms: Option<u64>,
    /// True when a listed candidate passed every check
    pub cleared_for_trading: bool,
    /// Full failure history, reported on drops and retries
    pub failure_history: Vec<FailureReason>,
}
