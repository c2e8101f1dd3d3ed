//! Route and liquidity check.
//!
//! Confirms a swap path exists from the reference asset and, when a wallet
//! context is available, that simulated liquidity sits inside the configured
//! bounds. Router failures and timeouts become `ROUTE_CHECK_FAILED`.

use crate::pipeline::collaborators::Router;
use crate::pipeline::config::RouteCheckConfig;
use crate::pipeline::types::{FailureReason, RiskLevel, RouteCheckResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, instrument};

pub struct RouteChecker {
    router: Arc<dyn Router>,
    call_timeout: Duration,
}

impl RouteChecker {
    pub fn new(router: Arc<dyn Router>, call_timeout: Duration) -> Self {
        Self {
            router,
            call_timeout,
        }
    }

    #[instrument(skip(self, config), fields(mint = %mint))]
    pub async fn check_route(
        &self,
        mint: &str,
        config: &RouteCheckConfig,
        wallet: Option<&str>,
    ) -> RouteCheckResult {
        let reference = config.reference_asset.as_str();

        let has_route = match timeout(self.call_timeout, self.router.has_route(reference, mint)).await {
            Ok(Ok(has_route)) => has_route,
            Ok(Err(e)) => {
                debug!("Route lookup failed for {}: {:#}", mint, e);
                return RouteCheckResult::failed(FailureReason::RouteCheckFailed, false);
            }
            Err(_) => {
                debug!("Route lookup timed out for {} after {:?}", mint, self.call_timeout);
                return RouteCheckResult::failed(FailureReason::RouteCheckFailed, false);
            }
        };

        if !has_route {
            info!("No route from {} to {}", reference, mint);
            return RouteCheckResult::failed(FailureReason::NoRoute, false);
        }

        let Some(wallet) = wallet else {
            debug!("No wallet context, skipping liquidity simulation for {}", mint);
            return RouteCheckResult {
                has_route: true,
                liquidity: None,
                price_impact: None,
                risk_level: RiskLevel::Low,
                failures: Vec::new(),
            };
        };

        let quote = match timeout(
            self.call_timeout,
            self.router.quote(reference, mint, config.probe_amount),
        )
        .await
        {
            Ok(Ok(quote)) => quote,
            Ok(Err(e)) => {
                debug!("Quote failed for {} (wallet {}): {:#}", mint, wallet, e);
                return RouteCheckResult::failed(FailureReason::RouteCheckFailed, true);
            }
            Err(_) => {
                debug!("Quote timed out for {} after {:?}", mint, self.call_timeout);
                return RouteCheckResult::failed(FailureReason::RouteCheckFailed, true);
            }
        };

        let Some(quote) = quote else {
            info!("No liquidity data for {}", mint);
            return RouteCheckResult::failed(FailureReason::LowLiquidity, true);
        };

        let (risk_level, failures) = if quote.liquidity < config.min_liquidity {
            (RiskLevel::High, vec![FailureReason::LowLiquidity])
        } else if config.max_liquidity.is_some_and(|max| quote.liquidity > max) {
            // Outsized depth on a fresh listing points at wash trading
            (RiskLevel::Medium, vec![FailureReason::HighLiquidity])
        } else {
            (RiskLevel::Low, Vec::new())
        };

        info!(
            "Route check for {}: liquidity {:.2} SOL, impact {:.4}, risk {:?}",
            mint, quote.liquidity, quote.price_impact, risk_level
        );

        RouteCheckResult {
            has_route: true,
            liquidity: Some(quote.liquidity),
            price_impact: Some(quote.price_impact),
            risk_level,
            failures,
        }
    }
}
