//! Creator behavior analysis.
//!
//! Keeps a bounded, per-creator record of launch activity and scores creators
//! for serial-deployment patterns. Entries idle for longer than the configured
//! TTL are removed by [`Sweepable::sweep`].

use crate::pipeline::clock::Clock;
use crate::pipeline::config::CreatorConfig;
use crate::pipeline::sweeper::Sweepable;
use crate::types::Pubkey;
use anyhow::{ensure, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

pub const RAPID_DEPLOYMENT: &str = "rapid_deployment";

/// Launch history of one creator address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatorBehavior {
    pub first_seen: i64,
    pub last_activity: i64,
    pub token_count: u32,
    pub patterns: BTreeSet<String>,
    /// Cumulative; only pattern detection raises it and nothing lowers it
    pub risk_score: f64,
}

impl CreatorBehavior {
    fn new(now: i64) -> Self {
        Self {
            first_seen: now,
            last_activity: now,
            token_count: 0,
            patterns: BTreeSet::new(),
            risk_score: 0.0,
        }
    }
}

/// Read-only verdict on a creator, used by the stage checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatorAssessment {
    pub accept: bool,
    pub risk_score: f64,
    pub quality_score: f64,
    pub token_count: u32,
    pub patterns: Vec<String>,
}

/// Snapshot for monitoring dashboards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatorCacheStats {
    pub entries: usize,
    pub oldest_first_seen: Option<i64>,
    pub average_risk_score: f64,
    pub suspicious_creators: usize,
}

/// Per-creator behavior cache. Each key is mutated under its shard lock, so
/// concurrent launches from the same creator never lose an update.
pub struct CreatorAnalyzer {
    entries: DashMap<Pubkey, CreatorBehavior>,
    config: CreatorConfig,
    clock: Arc<dyn Clock>,
}

impl CreatorAnalyzer {
    pub fn new(config: CreatorConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            clock,
        }
    }

    /// Count a launch by `creator` and report whether the creator is still
    /// acceptable.
    #[instrument(skip(self), fields(creator = %creator, mint = %mint))]
    pub fn record_and_score(&self, creator: &str, mint: &str) -> bool {
        let now = self.clock.now_ms();

        let (token_count, risk_score) = {
            let mut behavior = self
                .entries
                .entry(creator.to_string())
                .or_insert_with(|| CreatorBehavior::new(now));

            behavior.token_count += 1;
            behavior.last_activity = now;

            if behavior.token_count > self.config.rapid_deployment_threshold {
                behavior.patterns.insert(RAPID_DEPLOYMENT.to_string());
                behavior.risk_score += self.config.rapid_deployment_penalty;
            }

            (behavior.token_count, behavior.risk_score)
        };

        let suspicious = risk_score > self.config.suspicious_risk_threshold;
        if suspicious {
            warn!(
                "Suspicious creator {}: {} launches, risk {:.2}",
                creator, token_count, risk_score
            );
        } else {
            debug!("Creator {} launch #{} recorded", creator, token_count);
        }

        !suspicious
    }

    /// Assess a creator without counting a launch.
    pub fn assess(&self, creator: &str) -> CreatorAssessment {
        let (risk_score, token_count, patterns) = self
            .entries
            .get(creator)
            .map(|b| (b.risk_score, b.token_count, b.patterns.iter().cloned().collect()))
            .unwrap_or((0.0, 0, Vec::new()));

        CreatorAssessment {
            accept: risk_score <= self.config.suspicious_risk_threshold,
            risk_score,
            quality_score: self.quality_score(creator),
            token_count,
            patterns,
        }
    }

    /// Quality of a creator address in `[0, 1]`.
    pub fn quality_score(&self, creator: &str) -> f64 {
        match self.compute_quality(creator) {
            Ok(score) => score,
            Err(e) => {
                debug!("Quality scoring failed for {}: {}", creator, e);
                self.config.fallback_quality
            }
        }
    }

    fn compute_quality(&self, creator: &str) -> Result<f64> {
        if creator.chars().count() != self.config.expected_address_len {
            return Ok(self.config.invalid_address_quality);
        }

        let entropy = shannon_entropy(creator);
        ensure!(entropy.is_finite(), "non-finite entropy for {}", creator);

        let mut score = self.config.base_quality;
        if entropy < self.config.low_entropy_threshold {
            score -= self.config.low_entropy_penalty;
        } else if entropy > self.config.high_entropy_threshold {
            score += self.config.high_entropy_bonus;
        }

        let (risk_score, token_count) = self
            .entries
            .get(creator)
            .map(|b| (b.risk_score, b.token_count))
            .unwrap_or((0.0, 0));
        score -= risk_score;

        // Established but not prolific
        if (1..=2).contains(&token_count) {
            score += self.config.established_bonus;
        }

        ensure!(score.is_finite(), "non-finite quality score for {}", creator);
        Ok(score.clamp(0.0, 1.0))
    }

    pub fn get(&self, creator: &str) -> Option<CreatorBehavior> {
        self.entries.get(creator).map(|b| b.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CreatorCacheStats {
        let mut oldest_first_seen: Option<i64> = None;
        let mut total_risk = 0.0;
        let mut suspicious_creators = 0;
        let mut entries = 0;

        for behavior in self.entries.iter() {
            entries += 1;
            total_risk += behavior.risk_score;
            if behavior.risk_score > self.config.suspicious_risk_threshold {
                suspicious_creators += 1;
            }
            oldest_first_seen = Some(match oldest_first_seen {
                Some(oldest) => oldest.min(behavior.first_seen),
                None => behavior.first_seen,
            });
        }

        CreatorCacheStats {
            entries,
            oldest_first_seen,
            average_risk_score: if entries > 0 { total_risk / entries as f64 } else { 0.0 },
            suspicious_creators,
        }
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl Sweepable for CreatorAnalyzer {
    fn name(&self) -> &'static str {
        "creator_cache"
    }

    fn sweep(&self) -> usize {
        let cutoff = self.clock.now_ms() - self.config.ttl_ms;
        let before = self.entries.len();
        self.entries.retain(|_, behavior| behavior.last_activity >= cutoff);
        before.saturating_sub(self.entries.len())
    }
}

/// Shannon entropy (bits per character) of the character distribution.
pub fn shannon_entropy(value: &str) -> f64 {
    let mut frequencies: HashMap<char, usize> = HashMap::new();
    let mut total = 0usize;
    for c in value.chars() {
        *frequencies.entry(c).or_insert(0) += 1;
        total += 1;
    }
    if total == 0 {
        return 0.0;
    }

    frequencies
        .values()
        .map(|&count| {
            let p = count as f64 / total as f64;
            -p * p.log2()
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::clock::ManualClock;

    const CREATOR: &str = "7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU";
    const HOUR_MS: i64 = 60 * 60 * 1000;

    fn analyzer_with_clock() -> (CreatorAnalyzer, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let analyzer = CreatorAnalyzer::new(CreatorConfig::default(), clock.clone());
        (analyzer, clock)
    }

    #[test]
    fn test_first_launches_are_accepted() {
        let (analyzer, _) = analyzer_with_clock();
        for i in 0..3 {
            assert!(analyzer.record_and_score(CREATOR, &format!("mint{}", i)));
        }
        let behavior = analyzer.get(CREATOR).unwrap();
        assert_eq!(behavior.token_count, 3);
        assert_eq!(behavior.risk_score, 0.0);
        assert!(behavior.patterns.is_empty());
    }

    #[test]
    fn test_fourth_launch_triggers_rapid_deployment_once() {
        let (analyzer, _) = analyzer_with_clock();
        for i in 0..3 {
            analyzer.record_and_score(CREATOR, &format!("mint{}", i));
        }

        assert!(!analyzer.record_and_score(CREATOR, "mint3"));
        let behavior = analyzer.get(CREATOR).unwrap();
        assert_eq!(behavior.token_count, 4);
        assert!((behavior.risk_score - 0.4).abs() < 1e-9);
        assert!(behavior.patterns.contains(RAPID_DEPLOYMENT));

        // Reading does not apply the penalty again
        let assessment = analyzer.assess(CREATOR);
        assert!(!assessment.accept);
        assert!((assessment.risk_score - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_risk_score_never_decreases() {
        let (analyzer, clock) = analyzer_with_clock();
        let mut last = 0.0;
        for i in 0..8 {
            analyzer.record_and_score(CREATOR, &format!("mint{}", i));
            clock.advance(1_000);
            let risk = analyzer.get(CREATOR).unwrap().risk_score;
            assert!(risk >= last);
            last = risk;
        }
        assert!((last - 5.0 * 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_quality_invalid_length_is_fixed() {
        let (analyzer, _) = analyzer_with_clock();
        assert_eq!(analyzer.quality_score("short"), 0.1);
        assert_eq!(analyzer.quality_score(&format!("{}X", CREATOR)), 0.1);

        // Risk history does not change the answer for malformed addresses
        for i in 0..6 {
            analyzer.record_and_score("short", &format!("mint{}", i));
        }
        assert_eq!(analyzer.quality_score("short"), 0.1);
    }

    #[test]
    fn test_quality_components() {
        let (analyzer, _) = analyzer_with_clock();

        // High entropy, unknown creator
        assert!((analyzer.quality_score(CREATOR) - 0.6).abs() < 1e-9);

        // One prior launch earns the established bonus
        analyzer.record_and_score(CREATOR, "mint0");
        assert!((analyzer.quality_score(CREATOR) - 0.65).abs() < 1e-9);

        // Low entropy address
        let flat = "A".repeat(44);
        assert!((analyzer.quality_score(&flat) - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_quality_subtracts_risk_and_clamps() {
        let (analyzer, _) = analyzer_with_clock();
        for i in 0..6 {
            analyzer.record_and_score(CREATOR, &format!("mint{}", i));
        }
        // 0.5 + 0.1 - 1.2 clamps to zero
        assert_eq!(analyzer.quality_score(CREATOR), 0.0);
    }

    #[test]
    fn test_entropy() {
        assert_eq!(shannon_entropy(""), 0.0);
        assert_eq!(shannon_entropy("aaaa"), 0.0);
        assert!((shannon_entropy("ab") - 1.0).abs() < 1e-12);
        assert!((shannon_entropy("abcd") - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_sweep_evicts_idle_creators() {
        let (analyzer, clock) = analyzer_with_clock();
        analyzer.record_and_score(CREATOR, "mint0");
        clock.advance(HOUR_MS);
        analyzer.record_and_score("other", "mint1");

        clock.advance(23 * HOUR_MS + 1);
        assert_eq!(analyzer.sweep(), 1);
        assert!(analyzer.get(CREATOR).is_none());
        assert!(analyzer.get("other").is_some());
    }

    #[test]
    fn test_stats() {
        let (analyzer, clock) = analyzer_with_clock();
        assert_eq!(analyzer.stats().oldest_first_seen, None);

        let start = clock.now_ms();
        for i in 0..4 {
            analyzer.record_and_score(CREATOR, &format!("mint{}", i));
        }
        clock.advance(10);
        analyzer.record_and_score("other", "mintx");

        let stats = analyzer.stats();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.oldest_first_seen, Some(start));
        assert_eq!(stats.suspicious_creators, 1);
        assert!((stats.average_risk_score - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_concurrent_launches_are_not_lost() {
        let (analyzer, _) = analyzer_with_clock();
        let analyzer = Arc::new(analyzer);

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let analyzer = analyzer.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        analyzer.record_and_score(CREATOR, &format!("mint{}-{}", t, i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let behavior = analyzer.get(CREATOR).unwrap();
        assert_eq!(behavior.token_count, 200);
        assert!((behavior.risk_score - 197.0 * 0.4).abs() < 1e-6);
    }
}
