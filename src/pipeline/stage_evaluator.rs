//! Stage evaluator: owns the candidate registry and runs the checks for each
//! candidate's current stage.
//!
//! An evaluation snapshots the candidate, runs the stage checks without
//! holding the registry lock, then re-locks and applies the outcome through
//! [`transitions::apply`]. Results for a candidate that was removed (or
//! removed and re-added under a new generation) in the meantime are
//! discarded.

use crate::pipeline::authority_check::AuthorityChecker;
use crate::pipeline::clock::Clock;
use crate::pipeline::collaborators::{
    CheckRecorder, LedgerReader, MetadataSource, PoolLocator, Router, SupplementalCheck,
};
use crate::pipeline::config::PipelineConfig;
use crate::pipeline::creator_analyzer::CreatorAnalyzer;
use crate::pipeline::ledger::{TransitionLedger, TransitionRecord};
use crate::pipeline::route_check::RouteChecker;
use crate::pipeline::sweeper::CacheSweeper;
use crate::pipeline::transitions::{self, StageOutcome, StageReport};
use crate::pipeline::types::{Candidate, FailureReason, RouteSnapshot, StageTransitionResult, TokenStage};
use crate::pipeline::velocity_tracker::VelocityTracker;
use crate::types::{NewTokenEvent, Pubkey, TokenMetadata, TradeEvent};
use anyhow::{bail, ensure, Result};
use dashmap::DashSet;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

pub const PRE_BOND_CHECK: &str = "pre_bond_heuristics";
pub const CREATOR_CHECK: &str = "creator_behavior";
pub const POOL_CHECK: &str = "pool_detection";
pub const VELOCITY_CHECK: &str = "velocity";
pub const ROUTE_CHECK: &str = "route_liquidity";
pub const AUTHORITY_CHECK: &str = "authorities";

/// Longest token name still considered well-formed.
const MAX_NAME_LEN: usize = 32;

/// External services the evaluator depends on.
pub struct Collaborators {
    pub router: Arc<dyn Router>,
    pub ledger: Arc<dyn LedgerReader>,
    pub metadata: Arc<dyn MetadataSource>,
    pub pools: Arc<dyn PoolLocator>,
    pub supplemental: Vec<Arc<dyn SupplementalCheck>>,
    pub recorder: Arc<dyn CheckRecorder>,
    pub transition_ledger: Option<Arc<dyn TransitionLedger>>,
}

/// Pre-bond heuristic score in `[0, 1]`.
///
/// Weights: name and symbol 0.25, image 0.25, creator age 0.2, creator
/// quality 0.3.
pub fn pre_bond_score(metadata: &TokenMetadata, creator_quality: f64, min_creator_age_secs: u64) -> f64 {
    let name_ok = match (metadata.name.as_deref(), metadata.symbol.as_deref()) {
        (Some(name), Some(symbol)) => {
            !name.trim().is_empty() && !symbol.trim().is_empty() && name.chars().count() <= MAX_NAME_LEN
        }
        _ => false,
    };
    let image_ok = metadata
        .image
        .as_deref()
        .is_some_and(|uri| uri.starts_with("https://") || uri.starts_with("ipfs://"));
    let age_ok = metadata
        .creator_age_secs
        .is_some_and(|age| age >= min_creator_age_secs);

    let mut score = 0.3 * creator_quality.clamp(0.0, 1.0);
    if name_ok {
        score += 0.25;
    }
    if image_ok {
        score += 0.25;
    }
    if age_ok {
        score += 0.2;
    }
    score.clamp(0.0, 1.0)
}

/// Removes the mint from the in-flight set when the evaluation ends,
/// including when the evaluating future is dropped.
struct InFlightGuard<'a> {
    in_flight: &'a DashSet<Pubkey>,
    mint: Pubkey,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(in_flight: &'a DashSet<Pubkey>, mint: &str) -> Option<Self> {
        in_flight.insert(mint.to_string()).then(|| Self {
            in_flight,
            mint: mint.to_string(),
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.mint);
    }
}

pub struct StageEvaluator {
    config: PipelineConfig,
    clock: Arc<dyn Clock>,
    call_timeout: Duration,

    creator: Arc<CreatorAnalyzer>,
    velocity: Arc<VelocityTracker>,
    route_checker: RouteChecker,
    authority_checker: AuthorityChecker,

    metadata: Arc<dyn MetadataSource>,
    pools: Arc<dyn PoolLocator>,
    supplemental: Vec<Arc<dyn SupplementalCheck>>,
    recorder: Arc<dyn CheckRecorder>,
    transition_ledger: Option<Arc<dyn TransitionLedger>>,

    registry: Mutex<HashMap<Pubkey, Candidate>>,
    in_flight: DashSet<Pubkey>,
    next_generation: AtomicU64,
}

impl StageEvaluator {
    pub fn new(config: PipelineConfig, collaborators: Collaborators, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let call_timeout = Duration::from_millis(config.evaluator.collaborator_timeout_ms);
        let creator = Arc::new(CreatorAnalyzer::new(config.creator.clone(), clock.clone()));
        let velocity = Arc::new(VelocityTracker::new(config.velocity.clone(), clock.clone()));
        let route_checker = RouteChecker::new(collaborators.router, call_timeout);
        let authority_checker = AuthorityChecker::new(collaborators.ledger, call_timeout, &config.authority);

        Ok(Self {
            config,
            clock,
            call_timeout,
            creator,
            velocity,
            route_checker,
            authority_checker,
            metadata: collaborators.metadata,
            pools: collaborators.pools,
            supplemental: collaborators.supplemental,
            recorder: collaborators.recorder,
            transition_ledger: collaborators.transition_ledger,
            registry: Mutex::new(HashMap::new()),
            in_flight: DashSet::new(),
            next_generation: AtomicU64::new(0),
        })
    }

    /// Start tracking a newly discovered token. Returns `false` if the mint
    /// is already tracked.
    #[instrument(skip(self, event), fields(mint = %event.mint, creator = %event.creator))]
    pub async fn on_new_token(&self, event: NewTokenEvent) -> bool {
        let now = self.clock.now_ms();
        let mut registry = self.registry.lock().await;
        if registry.contains_key(&event.mint) {
            debug!("Token {} is already tracked", event.mint);
            return false;
        }

        let mut candidate = Candidate::new(
            event.mint.clone(),
            event.creator.clone(),
            event.timestamp,
            now,
            self.config.evaluator.max_attempts,
            transitions::stage_window_ms(TokenStage::PreBond, &self.config.evaluator),
        );
        candidate.pool = event.pool;
        candidate.metadata = event.metadata;
        candidate.generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;

        let creator_accepted = self.creator.record_and_score(&event.creator, &event.mint);
        info!(
            "Tracking {} (creator {}, accepted: {}, generation {})",
            event.mint, event.creator, creator_accepted, candidate.generation
        );

        registry.insert(event.mint, candidate);
        true
    }

    /// Record an observed buy for velocity analysis.
    pub fn on_trade(&self, trade: TradeEvent) {
        self.velocity.record(&trade.mint, &trade.wallet, trade.amount);
    }

    /// Run the checks for the candidate's current stage and apply the
    /// outcome.
    ///
    /// Returns `Ok(None)` when another evaluation of the same mint is in
    /// flight or when the result went stale before it could be applied.
    /// Unknown mints and invariant violations are errors.
    #[instrument(skip(self), fields(mint = %mint))]
    pub async fn evaluate(&self, mint: &str) -> Result<Option<StageTransitionResult>> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, mint) else {
            debug!("Evaluation of {} already in flight", mint);
            return Ok(None);
        };

        let snapshot = match self.registry.lock().await.get(mint) {
            Some(candidate) => candidate.clone(),
            None => bail!("candidate {} is not tracked", mint),
        };
        ensure!(!snapshot.is_dropped(), "candidate {} was already dropped", mint);

        let now = self.clock.now_ms();
        let report = match transitions::check_expiry(&snapshot, now) {
            Some(reason) => {
                info!("{} outstayed its {} window: {}", mint, snapshot.stage(), reason);
                StageReport::new(StageOutcome::Expired(reason))
            }
            None => self.run_stage_checks(&snapshot).await,
        };

        let (result, from_stage) = {
            let mut registry = self.registry.lock().await;
            let Some(candidate) = registry
                .get_mut(mint)
                .filter(|candidate| candidate.generation == snapshot.generation)
            else {
                debug!(
                    "Discarding stale result for {} (generation {})",
                    mint, snapshot.generation
                );
                return Ok(None);
            };

            let from_stage = candidate.stage();
            let result = transitions::apply(candidate, report, now, &self.config.evaluator)?;
            if result.should_drop {
                registry.remove(mint);
            }
            (result, from_stage)
        };

        if result.should_drop {
            warn!(
                "Dropped {} in {}: {:?} (history: {:?})",
                mint, from_stage, result.reason, result.failure_history
            );
        } else if result.cleared_for_trading {
            info!("{} cleared for trading", mint);
        } else if let Some(stage) = result.new_stage {
            info!("{} advanced {} -> {}", mint, from_stage, stage);
        } else {
            debug!(
                "{} retry in {:?} ms ({:?})",
                mint, result.retry_after_ms, result.reason
            );
        }

        if let Some(ledger) = &self.transition_ledger {
            let record = TransitionRecord::from_result(&result, from_stage, snapshot.generation, now);
            match timeout(self.call_timeout, ledger.record(&record)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!("Failed to record transition for {}: {:#}", mint, e),
                Err(_) => warn!(
                    "Recording transition for {} timed out after {:?}",
                    mint, self.call_timeout
                ),
            }
        }

        Ok(Some(result))
    }

    async fn run_stage_checks(&self, candidate: &Candidate) -> StageReport {
        match candidate.stage() {
            TokenStage::PreBond => self.pre_bond_checks(candidate).await,
            TokenStage::BondedOnPump => self.bonded_checks(candidate).await,
            TokenStage::RaydiumListed => self.listed_checks(candidate).await,
            // Dropped candidates never leave `evaluate`'s guard
            TokenStage::Dropped => StageReport::new(StageOutcome::Expired(FailureReason::StageTimeout)),
        }
    }

    async fn pre_bond_checks(&self, candidate: &Candidate) -> StageReport {
        let mint = candidate.mint.as_str();
        let mut failures = Vec::new();

        let metadata = match &candidate.metadata {
            Some(metadata) => Some(metadata.clone()),
            None => match timeout(self.call_timeout, self.metadata.fetch_metadata(mint)).await {
                Ok(Ok(metadata)) => Some(metadata),
                Ok(Err(e)) => {
                    debug!("Metadata unavailable for {}: {:#}", mint, e);
                    None
                }
                Err(_) => {
                    debug!("Metadata lookup timed out for {} after {:?}", mint, self.call_timeout);
                    None
                }
            },
        };

        let score = metadata.as_ref().map(|metadata| {
            pre_bond_score(
                metadata,
                self.creator.quality_score(&candidate.creator),
                self.config.evaluator.min_creator_age_secs,
            )
        });
        match score {
            Some(score) => {
                let passed = score >= self.config.evaluator.min_pre_bond_score;
                self.record_decision(mint, PRE_BOND_CHECK, passed).await;
                if !passed {
                    failures.push(FailureReason::LowPreBondScore);
                }
            }
            None => {
                self.record_decision(mint, PRE_BOND_CHECK, false).await;
                failures.push(FailureReason::MetadataUnavailable);
            }
        }

        self.creator_check(candidate, &mut failures).await;

        let mut report = StageReport::from_failures(failures, StageOutcome::Passed);
        report.metadata = metadata;
        report.pre_bond_score = score;
        report
    }

    async fn bonded_checks(&self, candidate: &Candidate) -> StageReport {
        let mint = candidate.mint.as_str();
        let mut failures = Vec::new();

        self.creator_check(candidate, &mut failures).await;

        let velocity = self.velocity.analyze(mint);
        self.record_decision(mint, VELOCITY_CHECK, velocity.is_healthy).await;
        failures.extend(velocity.warnings.iter().map(|warning| warning.failure_reason()));

        let pool = match timeout(self.call_timeout, self.pools.find_pool(mint)).await {
            Ok(Ok(pool)) => pool,
            Ok(Err(e)) => {
                debug!("Pool lookup failed for {}: {:#}", mint, e);
                failures.push(FailureReason::PoolCheckFailed);
                None
            }
            Err(_) => {
                debug!("Pool lookup timed out for {} after {:?}", mint, self.call_timeout);
                failures.push(FailureReason::PoolCheckFailed);
                None
            }
        };
        self.record_decision(mint, POOL_CHECK, pool.is_some()).await;

        let pass_outcome = if pool.is_some() {
            StageOutcome::Passed
        } else {
            StageOutcome::AwaitingPool
        };
        let mut report = StageReport::from_failures(failures, pass_outcome);
        report.pool = pool;
        report
    }

    async fn listed_checks(&self, candidate: &Candidate) -> StageReport {
        let mint = candidate.mint.as_str();
        let mut failures = Vec::new();

        let (route, authorities) = tokio::join!(
            self.route_checker.check_route(
                mint,
                &self.config.route,
                self.config.evaluator.wallet.as_deref()
            ),
            self.authority_checker.check_authorities(mint),
        );

        self.record_decision(mint, ROUTE_CHECK, route.passed()).await;
        failures.extend(route.failures.iter().cloned());

        let authorities_ok = authorities.risk_level <= self.config.evaluator.max_authority_risk;
        self.record_decision(mint, AUTHORITY_CHECK, authorities_ok).await;
        if !authorities_ok {
            failures.extend(authorities.failure_reasons());
        }

        for check in &self.supplemental {
            let name = check.name();
            let passed = match timeout(self.call_timeout, check.check(candidate)).await {
                Ok(Ok(passed)) => passed,
                Ok(Err(e)) => {
                    debug!("Supplemental check {} failed for {}: {:#}", name, mint, e);
                    false
                }
                Err(_) => {
                    debug!("Supplemental check {} timed out for {}", name, mint);
                    false
                }
            };
            self.record_decision(mint, name, passed).await;
            if !passed {
                failures.push(FailureReason::SupplementalCheckFailed(name.to_string()));
            }
        }

        let mut report = StageReport::from_failures(failures, StageOutcome::Passed);
        report.route = Some(RouteSnapshot {
            has_route: route.has_route,
            liquidity: route.liquidity,
            price_impact: route.price_impact,
        });
        report
    }

    async fn creator_check(&self, candidate: &Candidate, failures: &mut Vec<FailureReason>) {
        let assessment = self.creator.assess(&candidate.creator);
        self.record_decision(&candidate.mint, CREATOR_CHECK, assessment.accept).await;
        if !assessment.accept {
            failures.push(FailureReason::SuspiciousCreator);
        }
    }

    async fn record_decision(&self, mint: &str, check: &str, passed: bool) {
        info!(mint = %mint, check = check, passed = passed, "check decision");
        match timeout(self.call_timeout, self.recorder.record_check_outcome(check, passed)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Check recorder failed for {}: {:#}", check, e),
            Err(_) => debug!("Check recorder timed out for {}", check),
        }
    }

    /// Stop tracking `mint`. An in-flight evaluation of it will be discarded.
    pub async fn remove(&self, mint: &str) -> Option<Candidate> {
        let removed = self.registry.lock().await.remove(mint);
        if removed.is_some() {
            info!("Stopped tracking {}", mint);
        }
        removed
    }

    pub async fn candidate(&self, mint: &str) -> Option<Candidate> {
        self.registry.lock().await.get(mint).cloned()
    }

    pub async fn tracked_mints(&self) -> Vec<Pubkey> {
        self.registry.lock().await.keys().cloned().collect()
    }

    pub async fn tracked_count(&self) -> usize {
        self.registry.lock().await.len()
    }

    pub fn creator_analyzer(&self) -> &Arc<CreatorAnalyzer> {
        &self.creator
    }

    pub fn velocity_tracker(&self) -> &Arc<VelocityTracker> {
        &self.velocity
    }

    pub fn authority_checker(&self) -> &AuthorityChecker {
        &self.authority_checker
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Start the creator and velocity cache sweepers.
    pub fn spawn_sweepers(&self) -> Vec<CacheSweeper> {
        vec![
            CacheSweeper::spawn(
                self.creator.clone(),
                Duration::from_millis(self.config.sweep.creator_interval_ms),
            ),
            CacheSweeper::spawn(
                self.velocity.clone(),
                Duration::from_millis(self.config.sweep.velocity_interval_ms),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(image: Option<&str>, creator_age_secs: Option<u64>) -> TokenMetadata {
        TokenMetadata {
            name: Some("Moon Cat".to_string()),
            symbol: Some("MCAT".to_string()),
            image: image.map(str::to_string),
            creator_age_secs,
        }
    }

    #[test]
    fn test_pre_bond_score_components() {
        let full = pre_bond_score(&metadata(Some("ipfs://Qm123"), Some(7_200)), 0.65, 3_600);
        assert!((full - 0.895).abs() < 1e-9);

        let young_no_image = pre_bond_score(&metadata(None, Some(60)), 0.65, 3_600);
        assert!((young_no_image - 0.445).abs() < 1e-9);

        let plain_http = pre_bond_score(&metadata(Some("http://example.com/a.png"), None), 0.0, 3_600);
        assert!((plain_http - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_pre_bond_score_rejects_blank_or_long_names() {
        let mut blank = metadata(Some("https://cdn/x.png"), Some(7_200));
        blank.symbol = Some("  ".to_string());
        assert!((pre_bond_score(&blank, 0.0, 3_600) - 0.45).abs() < 1e-9);

        let mut long = metadata(None, None);
        long.name = Some("x".repeat(MAX_NAME_LEN + 1));
        assert_eq!(pre_bond_score(&long, 0.0, 3_600), 0.0);
    }

    #[test]
    fn test_in_flight_guard_is_exclusive() {
        let set = DashSet::new();
        let first = InFlightGuard::acquire(&set, "mint");
        assert!(first.is_some());
        assert!(InFlightGuard::acquire(&set, "mint").is_none());
        assert!(InFlightGuard::acquire(&set, "other").is_some());
        drop(first);
        assert!(InFlightGuard::acquire(&set, "mint").is_some());
    }
}
