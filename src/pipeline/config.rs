//! Pipeline configuration.
//!
//! Every threshold used by the checks lives here with its production default.
//! The rapid-deployment and velocity thresholds have no calibration behind
//! them yet and are expected to be tuned from observed launches.

use crate::pipeline::types::RiskLevel;
use crate::types::WRAPPED_SOL_MINT;
use anyhow::{bail, Context, Result};
use nonempty::NonEmpty;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Retry delays indexed by attempt number, capped at the last entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<u64>", into = "Vec<u64>")]
pub struct BackoffSchedule {
    delays_ms: NonEmpty<u64>,
}

impl BackoffSchedule {
    pub fn new(delays_ms: NonEmpty<u64>) -> Self {
        Self { delays_ms }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.delays_ms
            .get(index)
            .copied()
            .unwrap_or(*self.delays_ms.last())
    }
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self::new(nonempty::nonempty![2_000, 3_000, 5_000, 8_000, 13_000])
    }
}

impl TryFrom<Vec<u64>> for BackoffSchedule {
    type Error = String;

    fn try_from(delays: Vec<u64>) -> std::result::Result<Self, Self::Error> {
        NonEmpty::from_vec(delays)
            .map(Self::new)
            .ok_or_else(|| "backoff schedule must contain at least one delay".to_string())
    }
}

impl From<BackoffSchedule> for Vec<u64> {
    fn from(schedule: BackoffSchedule) -> Self {
        schedule.delays_ms.into_iter().collect()
    }
}

/// Creator behavior analyzer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreatorConfig {
    /// Entries idle longer than this are evicted
    pub ttl_ms: i64,
    /// More launches than this within the retention marks rapid deployment
    pub rapid_deployment_threshold: u32,
    pub rapid_deployment_penalty: f64,
    /// Risk above this marks the creator suspicious
    pub suspicious_risk_threshold: f64,
    pub expected_address_len: usize,
    pub base_quality: f64,
    pub invalid_address_quality: f64,
    pub fallback_quality: f64,
    pub low_entropy_threshold: f64,
    pub low_entropy_penalty: f64,
    pub high_entropy_threshold: f64,
    pub high_entropy_bonus: f64,
    pub established_bonus: f64,
}

impl Default for CreatorConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 24 * 60 * 60 * 1000,
            rapid_deployment_threshold: 3,
            rapid_deployment_penalty: 0.4,
            suspicious_risk_threshold: 0.3,
            expected_address_len: 44,
            base_quality: 0.5,
            invalid_address_quality: 0.1,
            fallback_quality: 0.3,
            low_entropy_threshold: 3.5,
            low_entropy_penalty: 0.2,
            high_entropy_threshold: 4.5,
            high_entropy_bonus: 0.1,
            established_bonus: 0.05,
        }
    }
}

/// Velocity tracker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VelocityConfig {
    /// Trailing window for buy events
    pub window_ms: i64,
    /// Entries first seen longer ago than this are evicted
    pub ttl_ms: i64,
    pub min_unique_wallet_ratio: f64,
    /// Diversity is only judged above this many events
    pub min_events_for_diversity: usize,
    pub max_events_per_minute: f64,
    pub min_amount_cv: f64,
    pub min_events_for_uniformity: usize,
    /// No trades for this long after first sight marks the token dead
    pub inactivity_ms: i64,
}

impl Default for VelocityConfig {
    fn default() -> Self {
        Self {
            window_ms: 10 * 60 * 1000,
            ttl_ms: 60 * 60 * 1000,
            min_unique_wallet_ratio: 0.3,
            min_events_for_diversity: 5,
            max_events_per_minute: 15.0,
            min_amount_cv: 0.1,
            min_events_for_uniformity: 3,
            inactivity_ms: 5 * 60 * 1000,
        }
    }
}

/// Route and liquidity thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteCheckConfig {
    /// Minimum simulated liquidity in SOL
    pub min_liquidity: f64,
    /// Liquidity above this is treated as a wash-trading signal
    pub max_liquidity: Option<f64>,
    /// Asset routes are quoted from
    pub reference_asset: String,
    /// Probe size for liquidity quotes, in lamports of the reference asset
    pub probe_amount: u64,
}

impl Default for RouteCheckConfig {
    fn default() -> Self {
        Self {
            min_liquidity: 10.0,
            max_liquidity: None,
            reference_asset: WRAPPED_SOL_MINT.to_string(),
            probe_amount: 100_000_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorityCheckConfig {
    /// How long a clean (no authority) result is reused
    pub cache_ttl_secs: u64,
    pub max_cache_entries: u64,
}

impl Default for AuthorityCheckConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 600,
            max_cache_entries: 10_000,
        }
    }
}

/// Stage evaluator policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    pub max_attempts: u32,
    pub backoff: BackoffSchedule,
    /// How long a bonded token may wait for its pool
    pub max_wait_time_ms: i64,
    pub pre_bond_window_ms: i64,
    pub listed_window_ms: i64,
    pub min_pre_bond_score: f64,
    pub min_creator_age_secs: u64,
    /// Highest authority risk a listed token may carry
    pub max_authority_risk: RiskLevel,
    /// Upper bound on every collaborator call
    pub collaborator_timeout_ms: u64,
    /// Wallet used as quoting context; liquidity is only simulated when set
    pub wallet: Option<String>,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: BackoffSchedule::default(),
            max_wait_time_ms: 10 * 60 * 1000,
            pre_bond_window_ms: 60 * 60 * 1000,
            listed_window_ms: 5 * 60 * 1000,
            min_pre_bond_score: 0.5,
            min_creator_age_secs: 60 * 60,
            max_authority_risk: RiskLevel::Low,
            collaborator_timeout_ms: 5_000,
            wallet: None,
        }
    }
}

/// Cache sweep cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub creator_interval_ms: u64,
    pub velocity_interval_ms: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            creator_interval_ms: 60_000,
            velocity_interval_ms: 60_000,
        }
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub creator: CreatorConfig,
    pub velocity: VelocityConfig,
    pub route: RouteCheckConfig,
    pub authority: AuthorityCheckConfig,
    pub evaluator: EvaluatorConfig,
    pub sweep: SweepConfig,
}

impl PipelineConfig {
    /// Load a JSON config file; missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: PipelineConfig = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.evaluator.max_attempts == 0 {
            bail!("evaluator.max_attempts must be at least 1");
        }
        if self.evaluator.collaborator_timeout_ms == 0 {
            bail!("evaluator.collaborator_timeout_ms must be positive");
        }
        if self.velocity.window_ms <= 0 || self.velocity.ttl_ms <= 0 {
            bail!("velocity window and ttl must be positive");
        }
        if self.creator.ttl_ms <= 0 {
            bail!("creator.ttl_ms must be positive");
        }
        if self.route.min_liquidity < 0.0 {
            bail!("route.min_liquidity must not be negative");
        }
        if let Some(max) = self.route.max_liquidity {
            if max < self.route.min_liquidity {
                bail!(
                    "route.max_liquidity ({}) is below route.min_liquidity ({})",
                    max,
                    self.route.min_liquidity
                );
            }
        }
        if self.sweep.creator_interval_ms == 0 || self.sweep.velocity_interval_ms == 0 {
            bail!("sweep intervals must be positive");
        }
        Ok(())
    }
}
