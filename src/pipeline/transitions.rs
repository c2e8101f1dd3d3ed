//! The lifecycle state machine.
//!
//! `apply` folds the outcome of one round of stage checks into a candidate.
//! It is a pure function of the candidate, the report, `now` and the
//! evaluator policy: no I/O, no randomness, no sleeping. Retry delays are
//! returned as data for the caller to schedule.

use crate::pipeline::config::EvaluatorConfig;
use crate::pipeline::types::{Candidate, FailureReason, RouteSnapshot, StageTransitionResult, TokenStage};
use crate::types::{Pubkey, TokenMetadata};
use anyhow::{bail, Result};
use nonempty::NonEmpty;

/// Verdict of one round of stage checks.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    /// Every check required by the stage passed
    Passed,
    /// Bonded and healthy, but the pool is not there yet
    AwaitingPool,
    Failed(NonEmpty<FailureReason>),
    /// The stage window ran out before the candidate qualified
    Expired(FailureReason),
}

/// Check outcome plus the stage-scoped data gathered along the way.
#[derive(Debug, Clone, PartialEq)]
pub struct StageReport {
    pub outcome: StageOutcome,
    pub metadata: Option<TokenMetadata>,
    pub pre_bond_score: Option<f64>,
    pub pool: Option<Pubkey>,
    pub route: Option<RouteSnapshot>,
}

impl StageReport {
    pub fn new(outcome: StageOutcome) -> Self {
        Self {
            outcome,
            metadata: None,
            pre_bond_score: None,
            pool: None,
            route: None,
        }
    }

    /// Builds the report from collected failures: none means `pass_outcome`.
    pub fn from_failures(failures: Vec<FailureReason>, pass_outcome: StageOutcome) -> Self {
        match NonEmpty::from_vec(failures) {
            Some(failures) => Self::new(StageOutcome::Failed(failures)),
            None => Self::new(pass_outcome),
        }
    }
}

/// How long a candidate may stay in `stage`.
pub fn stage_window_ms(stage: TokenStage, config: &EvaluatorConfig) -> i64 {
    match stage {
        TokenStage::PreBond => config.pre_bond_window_ms,
        TokenStage::BondedOnPump => config.max_wait_time_ms,
        TokenStage::RaydiumListed => config.listed_window_ms,
        TokenStage::Dropped => 0,
    }
}

/// The expiry reason if the candidate outstayed its stage window.
pub fn check_expiry(candidate: &Candidate, now: i64) -> Option<FailureReason> {
    let in_stage = now - candidate.retry.stage_entered_at;
    if in_stage <= candidate.retry.retry_window_ms {
        return None;
    }
    match candidate.stage() {
        TokenStage::BondedOnPump => Some(FailureReason::MaxWaitExceeded),
        _ => Some(FailureReason::StageTimeout),
    }
}

/// Apply `report` to `candidate`.
pub fn apply(
    candidate: &mut Candidate,
    report: StageReport,
    now: i64,
    config: &EvaluatorConfig,
) -> Result<StageTransitionResult> {
    if candidate.is_dropped() {
        bail!("candidate {} was already dropped", candidate.mint);
    }

    candidate.last_checked_at = Some(now);
    if report.metadata.is_some() {
        candidate.metadata = report.metadata;
    }
    if report.pre_bond_score.is_some() {
        candidate.pre_bond_score = report.pre_bond_score;
    }
    if report.route.is_some() {
        candidate.route = report.route;
    }

    let mut result = StageTransitionResult {
        mint: candidate.mint.clone(),
        success: false,
        new_stage: None,
        reason: None,
        should_drop: false,
        retry_after_ms: None,
        cleared_for_trading: false,
        failure_history: Vec::new(),
    };

    match report.outcome {
        StageOutcome::Passed => {
            if report.pool.is_some() {
                candidate.pool = report.pool;
            }
            result.success = true;
            match candidate.stage().next() {
                Some(next) => {
                    candidate.enter_stage(next, now, stage_window_ms(next, config))?;
                    result.new_stage = Some(next);
                }
                None => result.cleared_for_trading = true,
            }
        }
        StageOutcome::AwaitingPool => {
            candidate.retry.pool_polls += 1;
            result.retry_after_ms = Some(config.backoff.delay_for(candidate.retry.pool_polls));
        }
        StageOutcome::Failed(reasons) => {
            result.reason = Some(reasons.head.clone());
            for reason in reasons {
                candidate.record_failure(reason);
            }
            candidate.retry.attempts += 1;

            if candidate.retry.attempts >= candidate.retry.max_attempts {
                drop_candidate(candidate, now, &mut result)?;
            } else {
                result.retry_after_ms = Some(config.backoff.delay_for(candidate.retry.attempts));
            }
        }
        StageOutcome::Expired(reason) => {
            result.reason = Some(reason.clone());
            candidate.record_failure(reason);
            drop_candidate(candidate, now, &mut result)?;
        }
    }

    result.failure_history = candidate.failure_history().to_vec();
    Ok(result)
}

fn drop_candidate(candidate: &mut Candidate, now: i64, result: &mut StageTransitionResult) -> Result<()> {
    candidate.enter_stage(TokenStage::Dropped, now, 0)?;
    result.should_drop = true;
    result.new_stage = Some(TokenStage::Dropped);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nonempty::nonempty;

    fn config() -> EvaluatorConfig {
        EvaluatorConfig {
            max_attempts: 3,
            ..EvaluatorConfig::default()
        }
    }

    fn candidate() -> Candidate {
        let config = config();
        Candidate::new(
            "mint".to_string(),
            "creator".to_string(),
            0,
            1_000,
            config.max_attempts,
            config.pre_bond_window_ms,
        )
    }

    fn failed(reason: FailureReason) -> StageReport {
        StageReport::new(StageOutcome::Failed(nonempty![reason]))
    }

    #[test]
    fn test_pass_advances_one_stage_and_resets_attempts() {
        let mut candidate = candidate();
        apply(&mut candidate, failed(FailureReason::LowPreBondScore), 2_000, &config()).unwrap();
        assert_eq!(candidate.retry.attempts, 1);

        let result = apply(&mut candidate, StageReport::new(StageOutcome::Passed), 3_000, &config()).unwrap();
        assert!(result.success);
        assert_eq!(result.new_stage, Some(TokenStage::BondedOnPump));
        assert_eq!(candidate.stage(), TokenStage::BondedOnPump);
        assert_eq!(candidate.retry.attempts, 0);
        assert_eq!(candidate.first_bonded_at, Some(3_000));
        assert_eq!(candidate.retry.retry_window_ms, config().max_wait_time_ms);
        // History survives the stage change
        assert_eq!(candidate.failure_history(), &[FailureReason::LowPreBondScore]);
    }

    #[test]
    fn test_listed_pass_clears_for_trading() {
        let mut candidate = candidate();
        candidate.enter_stage(TokenStage::RaydiumListed, 1_000, 60_000).unwrap();
        let result = apply(&mut candidate, StageReport::new(StageOutcome::Passed), 2_000, &config()).unwrap();
        assert!(result.success);
        assert!(result.cleared_for_trading);
        assert_eq!(result.new_stage, None);
        assert_eq!(candidate.stage(), TokenStage::RaydiumListed);
    }

    #[test]
    fn test_failures_use_backoff_then_drop_at_max_attempts() {
        let mut candidate = candidate();

        let first = apply(&mut candidate, failed(FailureReason::NoRoute), 2_000, &config()).unwrap();
        assert_eq!(first.retry_after_ms, Some(2_000));
        assert!(!first.should_drop);

        let second = apply(&mut candidate, failed(FailureReason::NoRoute), 3_000, &config()).unwrap();
        assert_eq!(second.retry_after_ms, Some(3_000));

        let third = apply(&mut candidate, failed(FailureReason::LowLiquidity), 4_000, &config()).unwrap();
        assert!(third.should_drop);
        assert_eq!(third.new_stage, Some(TokenStage::Dropped));
        assert_eq!(third.reason, Some(FailureReason::LowLiquidity));
        assert_eq!(third.retry_after_ms, None);
        assert_eq!(
            third.failure_history,
            vec![FailureReason::NoRoute, FailureReason::NoRoute, FailureReason::LowLiquidity]
        );

        // Nothing can be applied to a dropped candidate
        assert!(apply(&mut candidate, StageReport::new(StageOutcome::Passed), 5_000, &config()).is_err());
    }

    #[test]
    fn test_multiple_reasons_count_as_one_attempt() {
        let mut candidate = candidate();
        let report = StageReport::new(StageOutcome::Failed(nonempty![
            FailureReason::MintAuthorityPresent,
            FailureReason::FreezeAuthorityPresent
        ]));
        let result = apply(&mut candidate, report, 2_000, &config()).unwrap();
        assert_eq!(candidate.retry.attempts, 1);
        assert_eq!(result.reason, Some(FailureReason::MintAuthorityPresent));
        assert_eq!(result.failure_history.len(), 2);
    }

    #[test]
    fn test_awaiting_pool_polls_without_attempts() {
        let mut candidate = candidate();
        candidate.enter_stage(TokenStage::BondedOnPump, 1_000, 60_000).unwrap();

        let delays: Vec<u64> = (0..7)
            .map(|i| {
                apply(&mut candidate, StageReport::new(StageOutcome::AwaitingPool), 2_000 + i, &config())
                    .unwrap()
                    .retry_after_ms
                    .unwrap()
            })
            .collect();

        assert_eq!(delays, vec![2_000, 3_000, 5_000, 8_000, 13_000, 13_000, 13_000]);
        assert_eq!(candidate.retry.attempts, 0);
        assert!(candidate.failure_history().is_empty());
        assert_eq!(candidate.stage(), TokenStage::BondedOnPump);
    }

    #[test]
    fn test_expiry() {
        let mut candidate = candidate();
        candidate.enter_stage(TokenStage::BondedOnPump, 1_000, 60_000).unwrap();
        assert_eq!(check_expiry(&candidate, 61_000), None);
        assert_eq!(check_expiry(&candidate, 61_001), Some(FailureReason::MaxWaitExceeded));

        let result = apply(
            &mut candidate,
            StageReport::new(StageOutcome::Expired(FailureReason::MaxWaitExceeded)),
            61_001,
            &config(),
        )
        .unwrap();
        assert!(result.should_drop);
        assert_eq!(result.failure_history, vec![FailureReason::MaxWaitExceeded]);
    }

    #[test]
    fn test_apply_is_deterministic() {
        let base = candidate();
        let report = failed(FailureReason::SuspiciousCreator);

        let mut a = base.clone();
        let mut b = base.clone();
        let ra = apply(&mut a, report.clone(), 5_000, &config()).unwrap();
        let rb = apply(&mut b, report, 5_000, &config()).unwrap();
        assert_eq!(ra, rb);
        assert_eq!(a.retry, b.retry);
    }

    #[test]
    fn test_scratch_data_recorded() {
        let mut candidate = candidate();
        let mut report = StageReport::new(StageOutcome::Passed);
        report.pre_bond_score = Some(0.8);
        apply(&mut candidate, report, 2_000, &config()).unwrap();
        assert_eq!(candidate.pre_bond_score, Some(0.8));
        assert_eq!(candidate.last_checked_at, Some(2_000));
        assert!(candidate.route.is_none());
    }
}
