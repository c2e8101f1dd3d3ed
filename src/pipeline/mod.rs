//! Stage-aware risk evaluation pipeline.
//!
//! Tokens enter through [`StageEvaluator::on_new_token`] and move
//! `PRE_BOND → BONDED_ON_PUMP → RAYDIUM_LISTED` as the checks for each stage
//! pass, or are dropped with their failure history.

pub mod authority_check;
pub mod clock;
pub mod collaborators;
pub mod config;
pub mod creator_analyzer;
pub mod ledger;
pub mod metrics;
pub mod route_check;
pub mod sources;
pub mod stage_evaluator;
pub mod sweeper;
pub mod transitions;
pub mod types;
pub mod velocity_tracker;

pub use authority_check::AuthorityChecker;
pub use clock::{Clock, ManualClock, SystemClock};
pub use collaborators::{
    CheckRecorder, LedgerReader, MetadataSource, MintInfo, PoolLocator, Quote, Router, SupplementalCheck,
};
pub use config::{
    AuthorityCheckConfig, BackoffSchedule, CreatorConfig, EvaluatorConfig, PipelineConfig, RouteCheckConfig,
    SweepConfig, VelocityConfig,
};
pub use creator_analyzer::{CreatorAnalyzer, CreatorAssessment, CreatorCacheStats};
pub use ledger::{SqliteTransitionLedger, TransitionLedger, TransitionRecord};
pub use metrics::{CheckCounts, CheckMetricsCollector, TracingRecorder};
pub use route_check::RouteChecker;
pub use stage_evaluator::{Collaborators, StageEvaluator};
pub use sweeper::{CacheSweeper, Sweepable};
pub use types::{
    AuthoritiesCheckResult, Candidate, FailureReason, RiskLevel, RouteCheckResult, StageTransitionResult,
    TokenStage,
};
pub use velocity_tracker::{VelocityAnalysis, VelocityCacheStats, VelocityTracker, VelocityWarning};

use anyhow::{anyhow, Result};
use std::sync::Arc;

/// Builder for a [`StageEvaluator`].
pub struct PipelineBuilder {
    config: PipelineConfig,
    clock: Option<Arc<dyn Clock>>,
    router: Option<Arc<dyn Router>>,
    ledger: Option<Arc<dyn LedgerReader>>,
    metadata: Option<Arc<dyn MetadataSource>>,
    pools: Option<Arc<dyn PoolLocator>>,
    supplemental: Vec<Arc<dyn SupplementalCheck>>,
    recorder: Option<Arc<dyn CheckRecorder>>,
    transition_ledger: Option<Arc<dyn TransitionLedger>>,
}

impl PipelineBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
            clock: None,
            router: None,
            ledger: None,
            metadata: None,
            pools: None,
            supplemental: Vec::new(),
            recorder: None,
            transition_ledger: None,
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the maximum failed attempts per stage.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.config.evaluator.max_attempts = max_attempts;
        self
    }

    /// Set the retry backoff schedule.
    pub fn with_backoff(mut self, backoff: BackoffSchedule) -> Self {
        self.config.evaluator.backoff = backoff;
        self
    }

    /// Set the wallet used as quoting context for liquidity simulation.
    pub fn with_wallet(mut self, wallet: impl Into<String>) -> Self {
        self.config.evaluator.wallet = Some(wallet.into());
        self
    }

    /// Time source; defaults to the system clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_router(mut self, router: Arc<dyn Router>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn with_ledger_reader(mut self, ledger: Arc<dyn LedgerReader>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_metadata_source(mut self, metadata: Arc<dyn MetadataSource>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_pool_locator(mut self, pools: Arc<dyn PoolLocator>) -> Self {
        self.pools = Some(pools);
        self
    }

    /// Add a listed-stage check. Checks run in insertion order.
    pub fn with_supplemental_check(mut self, check: Arc<dyn SupplementalCheck>) -> Self {
        self.supplemental.push(check);
        self
    }

    /// Check outcome sink; defaults to [`TracingRecorder`].
    pub fn with_recorder(mut self, recorder: Arc<dyn CheckRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn with_transition_ledger(mut self, ledger: Arc<dyn TransitionLedger>) -> Self {
        self.transition_ledger = Some(ledger);
        self
    }

    /// Build the configuration without wiring collaborators.
    pub fn build_config(self) -> PipelineConfig {
        self.config
    }

    pub fn build(self) -> Result<StageEvaluator> {
        let collaborators = Collaborators {
            router: self.router.ok_or_else(|| anyhow!("a Router is required"))?,
            ledger: self.ledger.ok_or_else(|| anyhow!("a LedgerReader is required"))?,
            metadata: self
                .metadata
                .ok_or_else(|| anyhow!("a MetadataSource is required"))?,
            pools: self.pools.ok_or_else(|| anyhow!("a PoolLocator is required"))?,
            supplemental: self.supplemental,
            recorder: self.recorder.unwrap_or_else(|| Arc::new(TracingRecorder)),
            transition_ledger: self.transition_ledger,
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        StageEvaluator::new(self.config, collaborators, clock)
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
