//! Mint and freeze authority check.
//!
//! Reads the mint account through the ledger collaborator. Any failure to
//! obtain or parse it yields the conservative "both authorities present"
//! result. Revoked authorities can never be set again, so clean results are
//! cached for a while to spare ledger reads.

use crate::pipeline::collaborators::LedgerReader;
use crate::pipeline::config::AuthorityCheckConfig;
use crate::pipeline::types::{AuthoritiesCheckResult, RiskLevel};
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, instrument};

pub struct AuthorityChecker {
    ledger: Arc<dyn LedgerReader>,
    call_timeout: Duration,
    clean_mints: Cache<String, AuthoritiesCheckResult>,
}

impl AuthorityChecker {
    pub fn new(ledger: Arc<dyn LedgerReader>, call_timeout: Duration, config: &AuthorityCheckConfig) -> Self {
        let clean_mints = Cache::builder()
            .max_capacity(config.max_cache_entries)
            .time_to_live(Duration::from_secs(config.cache_ttl_secs))
            .build();

        Self {
            ledger,
            call_timeout,
            clean_mints,
        }
    }

    #[instrument(skip(self), fields(mint = %mint))]
    pub async fn check_authorities(&self, mint: &str) -> AuthoritiesCheckResult {
        if let Some(cached) = self.clean_mints.get(mint).await {
            debug!("Authority cache hit for {}", mint);
            return cached;
        }

        let info = match timeout(self.call_timeout, self.ledger.get_parsed_mint_info(mint)).await {
            Ok(Ok(info)) => info,
            Ok(Err(e)) => {
                debug!("Mint info unavailable for {}: {:#}", mint, e);
                return AuthoritiesCheckResult::conservative(format!("{:#}", e));
            }
            Err(_) => {
                debug!("Mint info lookup timed out for {} after {:?}", mint, self.call_timeout);
                return AuthoritiesCheckResult::conservative("mint info lookup timed out");
            }
        };

        let result = AuthoritiesCheckResult::from_authorities(
            info.mint_authority.is_some(),
            info.freeze_authority.is_some(),
        );
        info!(
            "Authorities for {}: mint={}, freeze={}, risk {:?}",
            mint, result.has_mint_authority, result.has_freeze_authority, result.risk_level
        );

        if result.risk_level == RiskLevel::Low {
            self.clean_mints.insert(mint.to_string(), result.clone()).await;
        }
        result
    }

    pub fn cached_entries(&self) -> u64 {
        self.clean_mints.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::collaborators::MintInfo;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeLedger {
        info: Option<MintInfo>,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl FakeLedger {
        fn new(info: Option<MintInfo>) -> Self {
            Self {
                info,
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl LedgerReader for FakeLedger {
        async fn get_parsed_mint_info(&self, _mint: &str) -> Result<MintInfo> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match &self.info {
                Some(info) => Ok(info.clone()),
                None => bail!("account data could not be parsed"),
            }
        }
    }

    fn mint_info(mint_authority: bool, freeze_authority: bool) -> Option<MintInfo> {
        Some(MintInfo {
            mint_authority: mint_authority.then(|| "authority".to_string()),
            freeze_authority: freeze_authority.then(|| "freezer".to_string()),
        })
    }

    fn checker(ledger: Arc<FakeLedger>) -> AuthorityChecker {
        AuthorityChecker::new(ledger, Duration::from_millis(200), &AuthorityCheckConfig::default())
    }

    #[tokio::test]
    async fn test_risk_by_authority_count() {
        let both = checker(Arc::new(FakeLedger::new(mint_info(true, true))))
            .check_authorities("mint")
            .await;
        assert_eq!(both.risk_level, RiskLevel::High);

        let freeze_only = checker(Arc::new(FakeLedger::new(mint_info(false, true))))
            .check_authorities("mint")
            .await;
        assert_eq!(freeze_only.risk_level, RiskLevel::Medium);
        assert!(!freeze_only.has_mint_authority);

        let none = checker(Arc::new(FakeLedger::new(mint_info(false, false))))
            .check_authorities("mint")
            .await;
        assert_eq!(none.risk_level, RiskLevel::Low);
        assert!(none.error.is_none());
    }

    #[tokio::test]
    async fn test_parse_failure_defaults_to_high() {
        let result = checker(Arc::new(FakeLedger::new(None)))
            .check_authorities("mint")
            .await;
        assert!(result.has_mint_authority);
        assert!(result.has_freeze_authority);
        assert_eq!(result.risk_level, RiskLevel::High);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_timeout_defaults_to_high() {
        let ledger = Arc::new(FakeLedger {
            delay: Duration::from_secs(5),
            ..FakeLedger::new(mint_info(false, false))
        });
        let result = AuthorityChecker::new(ledger, Duration::from_millis(20), &AuthorityCheckConfig::default())
            .check_authorities("mint")
            .await;
        assert_eq!(result.risk_level, RiskLevel::High);
    }

    #[tokio::test]
    async fn test_only_clean_results_are_cached() {
        let clean = Arc::new(FakeLedger::new(mint_info(false, false)));
        let checker_clean = checker(clean.clone());
        checker_clean.check_authorities("mint").await;
        checker_clean.check_authorities("mint").await;
        assert_eq!(clean.calls.load(Ordering::SeqCst), 1);

        let risky = Arc::new(FakeLedger::new(mint_info(true, false)));
        let checker_risky = checker(risky.clone());
        checker_risky.check_authorities("mint").await;
        checker_risky.check_authorities("mint").await;
        assert_eq!(risky.calls.load(Ordering::SeqCst), 2);
    }
}
