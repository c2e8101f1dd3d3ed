//! Trade velocity tracking.
//!
//! Records buys per mint over a trailing window and flags arrival patterns
//! typical of bots and coordinated buying. The window is trimmed on every
//! record; whole entries are evicted by the sweep once they are older than the
//! configured TTL.

use crate::pipeline::clock::Clock;
use crate::pipeline::config::VelocityConfig;
use crate::pipeline::sweeper::Sweepable;
use crate::pipeline::types::FailureReason;
use crate::types::Pubkey;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuyEvent {
    pub timestamp: i64,
    pub wallet: Pubkey,
    pub amount: f64,
}

/// Trade history of one mint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VelocityData {
    pub first_seen: i64,
    /// Buys inside the trailing window, oldest first
    pub buy_events: VecDeque<BuyEvent>,
    /// Exactly the wallets present in `buy_events`
    pub unique_wallets: HashSet<Pubkey>,
    /// All-time volume, not windowed
    pub total_volume: f64,
}

impl VelocityData {
    fn new(now: i64) -> Self {
        Self {
            first_seen: now,
            buy_events: VecDeque::new(),
            unique_wallets: HashSet::new(),
            total_volume: 0.0,
        }
    }

    fn trim(&mut self, cutoff: i64) {
        self.buy_events.retain(|event| event.timestamp >= cutoff);
        self.unique_wallets = self
            .buy_events
            .iter()
            .map(|event| event.wallet.clone())
            .collect();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VelocityWarning {
    /// Few wallets behind many buys
    LowWalletDiversity,
    ExcessiveVelocity,
    /// Near-identical buy sizes
    UniformAmounts,
    /// No buys long after launch
    NoActivity,
}

impl VelocityWarning {
    pub fn as_str(&self) -> &'static str {
        match self {
            VelocityWarning::LowWalletDiversity => "low_wallet_diversity",
            VelocityWarning::ExcessiveVelocity => "excessive_velocity",
            VelocityWarning::UniformAmounts => "uniform_amounts",
            VelocityWarning::NoActivity => "no_activity",
        }
    }

    pub fn failure_reason(&self) -> FailureReason {
        match self {
            VelocityWarning::LowWalletDiversity => FailureReason::LowWalletDiversity,
            VelocityWarning::ExcessiveVelocity => FailureReason::ExcessiveVelocity,
            VelocityWarning::UniformAmounts => FailureReason::UniformAmounts,
            VelocityWarning::NoActivity => FailureReason::NoActivity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VelocityMetrics {
    pub events_per_minute: f64,
    pub unique_wallet_ratio: f64,
    pub average_amount: f64,
    pub total_volume: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VelocityAnalysis {
    pub is_healthy: bool,
    pub metrics: VelocityMetrics,
    pub warnings: Vec<VelocityWarning>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VelocityCacheStats {
    pub entries: usize,
    pub oldest_first_seen: Option<i64>,
    /// Buys currently held across all windows
    pub total_events: usize,
}

/// Per-mint velocity cache.
pub struct VelocityTracker {
    entries: DashMap<Pubkey, VelocityData>,
    config: VelocityConfig,
    clock: Arc<dyn Clock>,
}

impl VelocityTracker {
    pub fn new(config: VelocityConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            clock,
        }
    }

    /// Record a buy of `amount` SOL by `wallet`.
    pub fn record(&self, mint: &str, wallet: &str, amount: f64) {
        if !amount.is_finite() || amount < 0.0 {
            debug!("Ignoring malformed buy amount {} for {}", amount, mint);
            return;
        }

        let now = self.clock.now_ms();
        let cutoff = now - self.config.window_ms;

        let mut data = self
            .entries
            .entry(mint.to_string())
            .or_insert_with(|| VelocityData::new(now));

        data.buy_events.push_back(BuyEvent {
            timestamp: now,
            wallet: wallet.to_string(),
            amount,
        });
        data.total_volume += amount;
        data.trim(cutoff);
    }

    /// Analyze the trailing window for `mint`. Does not modify recorded
    /// events, so repeated calls at the same instant agree.
    #[instrument(skip(self), fields(mint = %mint))]
    pub fn analyze(&self, mint: &str) -> VelocityAnalysis {
        let now = self.clock.now_ms();
        let cutoff = now - self.config.window_ms;

        let data = self
            .entries
            .entry(mint.to_string())
            .or_insert_with(|| VelocityData::new(now));

        let window: Vec<&BuyEvent> = data
            .buy_events
            .iter()
            .filter(|event| event.timestamp >= cutoff)
            .collect();
        let count = window.len();
        let wallets: HashSet<&str> = window.iter().map(|event| event.wallet.as_str()).collect();

        let window_minutes = self.config.window_ms as f64 / 60_000.0;
        let events_per_minute = count as f64 / window_minutes;
        let unique_wallet_ratio = if count == 0 {
            1.0
        } else {
            wallets.len() as f64 / count as f64
        };
        let amounts: Vec<f64> = window.iter().map(|event| event.amount).collect();
        let average_amount = mean(&amounts);

        let mut warnings = Vec::new();
        if count > self.config.min_events_for_diversity
            && unique_wallet_ratio < self.config.min_unique_wallet_ratio
        {
            warnings.push(VelocityWarning::LowWalletDiversity);
        }
        if events_per_minute > self.config.max_events_per_minute {
            warnings.push(VelocityWarning::ExcessiveVelocity);
        }
        // A zero mean has no meaningful dispersion and counts as healthy
        if count >= self.config.min_events_for_uniformity
            && average_amount > 0.0
            && coefficient_of_variation(&amounts) < self.config.min_amount_cv
        {
            warnings.push(VelocityWarning::UniformAmounts);
        }
        if count == 0 && now - data.first_seen > self.config.inactivity_ms {
            warnings.push(VelocityWarning::NoActivity);
        }

        if !warnings.is_empty() {
            warn!("Velocity warnings for {}: {:?}", mint, warnings);
        }

        VelocityAnalysis {
            is_healthy: warnings.is_empty(),
            metrics: VelocityMetrics {
                events_per_minute,
                unique_wallet_ratio,
                average_amount,
                total_volume: data.total_volume,
            },
            warnings,
        }
    }

    pub fn get(&self, mint: &str) -> Option<VelocityData> {
        self.entries.get(mint).map(|data| data.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> VelocityCacheStats {
        let mut stats = VelocityCacheStats {
            entries: 0,
            oldest_first_seen: None,
            total_events: 0,
        };
        for data in self.entries.iter() {
            stats.entries += 1;
            stats.total_events += data.buy_events.len();
            stats.oldest_first_seen = Some(match stats.oldest_first_seen {
                Some(oldest) => oldest.min(data.first_seen),
                None => data.first_seen,
            });
        }
        stats
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl Sweepable for VelocityTracker {
    fn name(&self) -> &'static str {
        "velocity_cache"
    }

    fn sweep(&self) -> usize {
        let cutoff = self.clock.now_ms() - self.config.ttl_ms;
        let before = self.entries.len();
        self.entries.retain(|_, data| data.first_seen >= cutoff);
        before.saturating_sub(self.entries.len())
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation over mean; zero when the mean is zero.
pub fn coefficient_of_variation(values: &[f64]) -> f64 {
    let mean = mean(values);
    if mean == 0.0 {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt() / mean
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::clock::ManualClock;

    const MINUTE_MS: i64 = 60_000;

    fn tracker_with_clock() -> (VelocityTracker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let tracker = VelocityTracker::new(VelocityConfig::default(), clock.clone());
        (tracker, clock)
    }

    #[test]
    fn test_empty_mint_is_healthy() {
        let (tracker, _) = tracker_with_clock();
        let analysis = tracker.analyze("mint");
        assert!(analysis.is_healthy);
        assert_eq!(analysis.metrics.unique_wallet_ratio, 1.0);
        assert_eq!(analysis.metrics.average_amount, 0.0);
        // Lookup creates the entry
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_window_trimmed_on_record() {
        let (tracker, clock) = tracker_with_clock();
        tracker.record("mint", "w1", 1.0);
        clock.advance(6 * MINUTE_MS);
        tracker.record("mint", "w2", 2.0);
        clock.advance(5 * MINUTE_MS);
        tracker.record("mint", "w3", 3.0);

        let now = clock.now_ms();
        let data = tracker.get("mint").unwrap();
        assert_eq!(data.buy_events.len(), 2);
        assert!(data
            .buy_events
            .iter()
            .all(|event| event.timestamp >= now - 10 * MINUTE_MS));
        let expected: HashSet<Pubkey> = ["w2", "w3"].iter().map(|w| w.to_string()).collect();
        assert_eq!(data.unique_wallets, expected);
        assert_eq!(data.total_volume, 6.0);
    }

    #[test]
    fn test_two_of_six_wallets_is_not_low_diversity() {
        let (tracker, clock) = tracker_with_clock();
        for amount in [0.5, 1.0, 1.5, 2.0, 2.5] {
            tracker.record("mint", "bot", amount);
            clock.advance(5_000);
        }
        tracker.record("mint", "other", 3.0);

        let analysis = tracker.analyze("mint");
        assert!((analysis.metrics.unique_wallet_ratio - 2.0 / 6.0).abs() < 1e-12);
        assert!(!analysis.warnings.contains(&VelocityWarning::LowWalletDiversity));
        assert!(analysis.is_healthy);
        assert!((analysis.metrics.events_per_minute - 0.6).abs() < 1e-12);
        assert!((analysis.metrics.average_amount - 1.75).abs() < 1e-12);
    }

    #[test]
    fn test_low_wallet_diversity() {
        let (tracker, _) = tracker_with_clock();
        for amount in [0.5, 1.0, 1.5, 2.0, 2.5, 3.0] {
            tracker.record("mint", "bot", amount);
        }
        tracker.record("mint", "other", 4.0);

        let analysis = tracker.analyze("mint");
        assert!(analysis.warnings.contains(&VelocityWarning::LowWalletDiversity));
        assert!(!analysis.is_healthy);
    }

    #[test]
    fn test_excessive_velocity() {
        let (tracker, _) = tracker_with_clock();
        for i in 0..151 {
            tracker.record("mint", &format!("w{}", i), 1.0 + i as f64);
        }
        let analysis = tracker.analyze("mint");
        assert!(analysis.metrics.events_per_minute > 15.0);
        assert_eq!(analysis.warnings, vec![VelocityWarning::ExcessiveVelocity]);
    }

    #[test]
    fn test_uniform_amounts() {
        let (tracker, _) = tracker_with_clock();
        for wallet in ["a", "b", "c"] {
            tracker.record("mint", wallet, 0.5);
        }
        let analysis = tracker.analyze("mint");
        assert_eq!(analysis.warnings, vec![VelocityWarning::UniformAmounts]);
    }

    #[test]
    fn test_no_activity_after_inactivity_period() {
        let (tracker, clock) = tracker_with_clock();
        assert!(tracker.analyze("mint").is_healthy);

        clock.advance(5 * MINUTE_MS);
        assert!(tracker.analyze("mint").is_healthy);

        clock.advance(1);
        let analysis = tracker.analyze("mint");
        assert_eq!(analysis.warnings, vec![VelocityWarning::NoActivity]);
    }

    #[test]
    fn test_analyze_is_idempotent() {
        let (tracker, clock) = tracker_with_clock();
        tracker.record("mint", "a", 1.0);
        clock.advance(1_000);
        tracker.record("mint", "b", 2.5);
        assert_eq!(tracker.analyze("mint"), tracker.analyze("mint"));
    }

    #[test]
    fn test_total_volume_survives_window() {
        let (tracker, clock) = tracker_with_clock();
        tracker.record("mint", "a", 4.0);
        clock.advance(11 * MINUTE_MS);
        tracker.record("mint", "b", 1.0);
        let analysis = tracker.analyze("mint");
        assert_eq!(analysis.metrics.total_volume, 5.0);
        assert_eq!(analysis.metrics.average_amount, 1.0);
    }

    #[test]
    fn test_malformed_amount_ignored() {
        let (tracker, _) = tracker_with_clock();
        tracker.record("mint", "a", f64::NAN);
        tracker.record("mint", "a", -1.0);
        assert!(tracker.get("mint").is_none());
    }

    #[test]
    fn test_sweep_evicts_by_first_seen() {
        let (tracker, clock) = tracker_with_clock();
        tracker.record("old", "a", 1.0);
        clock.advance(30 * MINUTE_MS);
        tracker.record("new", "a", 1.0);
        clock.advance(30 * MINUTE_MS);
        // Still active, but first seen an hour ago
        tracker.record("old", "b", 1.0);
        clock.advance(1);

        assert_eq!(tracker.sweep(), 1);
        assert!(tracker.get("old").is_none());
        assert!(tracker.get("new").is_some());
    }

    #[test]
    fn test_stats() {
        let (tracker, clock) = tracker_with_clock();
        let start = clock.now_ms();
        tracker.record("a", "w", 1.0);
        tracker.record("a", "w2", 2.0);
        clock.advance(100);
        tracker.record("b", "w", 1.0);

        let stats = tracker.stats();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.total_events, 3);
        assert_eq!(stats.oldest_first_seen, Some(start));
    }

    #[test]
    fn test_zero_amounts_are_not_uniform() {
        let (tracker, _) = tracker_with_clock();
        for i in 0..4 {
            tracker.record("mint", &format!("w{}", i), 0.0);
        }
        assert!(tracker.analyze("mint").is_healthy);
    }

    #[test]
    fn test_coefficient_of_variation() {
        assert_eq!(coefficient_of_variation(&[]), 0.0);
        assert_eq!(coefficient_of_variation(&[0.0, 0.0]), 0.0);
        assert_eq!(coefficient_of_variation(&[2.0, 2.0, 2.0]), 0.0);
        assert!((coefficient_of_variation(&[1.0, 3.0]) - 0.5).abs() < 1e-12);
    }
}
