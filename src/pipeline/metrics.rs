//! Check outcome recording.
//!
//! `CheckMetricsCollector` keeps pass/fail counters per check for monitoring;
//! `TracingRecorder` just emits structured log events.

use crate::pipeline::collaborators::CheckRecorder;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Pass/fail tally for one check.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckCounts {
    pub passed: u64,
    pub failed: u64,
}

impl CheckCounts {
    pub fn total(&self) -> u64 {
        self.passed + self.failed
    }

    pub fn pass_rate(&self) -> f64 {
        if self.total() == 0 {
            return 0.0;
        }
        self.passed as f64 / self.total() as f64
    }
}

/// In-memory per-check counters.
#[derive(Debug, Default, Clone)]
pub struct CheckMetricsCollector {
    counts: Arc<RwLock<HashMap<String, CheckCounts>>>,
}

impl CheckMetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn counts(&self, check: &str) -> CheckCounts {
        self.counts
            .read()
            .await
            .get(check)
            .copied()
            .unwrap_or_default()
    }

    pub async fn snapshot(&self) -> HashMap<String, CheckCounts> {
        self.counts.read().await.clone()
    }

    pub async fn reset(&self) {
        self.counts.write().await.clear();
    }
}

#[async_trait]
impl CheckRecorder for CheckMetricsCollector {
    async fn record_check_outcome(&self, check: &str, passed: bool) -> Result<()> {
        let mut counts = self.counts.write().await;
        let entry = counts.entry(check.to_string()).or_default();
        if passed {
            entry.passed += 1;
        } else {
            entry.failed += 1;
        }
        Ok(())
    }
}

/// Recorder that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRecorder;

#[async_trait]
impl CheckRecorder for TracingRecorder {
    async fn record_check_outcome(&self, check: &str, passed: bool) -> Result<()> {
        info!(check = check, passed = passed, "check outcome");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counts_per_check() {
        let metrics = CheckMetricsCollector::new();
        metrics.record_check_outcome("route", true).await.unwrap();
        metrics.record_check_outcome("route", false).await.unwrap();
        metrics.record_check_outcome("route", true).await.unwrap();
        metrics.record_check_outcome("authority", false).await.unwrap();

        let route = metrics.counts("route").await;
        assert_eq!(route, CheckCounts { passed: 2, failed: 1 });
        assert!((route.pass_rate() - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(metrics.counts("authority").await.failed, 1);
        assert_eq!(metrics.counts("unknown").await.total(), 0);
        assert_eq!(metrics.snapshot().await.len(), 2);

        metrics.reset().await;
        assert!(metrics.snapshot().await.is_empty());
    }
}
