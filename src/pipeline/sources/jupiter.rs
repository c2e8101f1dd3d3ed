//! Routing collaborator backed by the Jupiter v6 quote API.
//!
//! Jupiter does not report pool depth, so liquidity is estimated from the
//! price impact of the probe swap: depth ≈ input size / impact.

use crate::pipeline::collaborators::{Quote, Router};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;
use solana_sdk::native_token::LAMPORTS_PER_SOL;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::{debug, instrument};

pub const DEFAULT_QUOTE_API: &str = "https://quote-api.jup.ag/v6";

/// Error codes meaning "no path (yet)" rather than a service failure.
const NO_ROUTE_CODES: &[&str] = &["COULD_NOT_FIND_ANY_ROUTE", "TOKEN_NOT_TRADABLE"];

/// Floor for the impact used in the depth estimate.
const MIN_PRICE_IMPACT: f64 = 1e-4;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteResponse {
    in_amount: String,
    price_impact_pct: String,
    #[serde(default)]
    route_plan: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteError {
    error: String,
    #[serde(default)]
    error_code: Option<String>,
}

pub struct JupiterRouter {
    http: Client,
    base_url: String,
    limiter: DefaultDirectRateLimiter,
    probe_amount: u64,
    slippage_bps: u16,
    request_timeout: Duration,
}

impl JupiterRouter {
    pub fn new(requests_per_second: u32, probe_amount: u64) -> Self {
        Self::with_base_url(DEFAULT_QUOTE_API, requests_per_second, probe_amount)
    }

    pub fn with_base_url(base_url: impl Into<String>, requests_per_second: u32, probe_amount: u64) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));
        Self {
            http: Client::new(),
            base_url: base_url.into(),
            limiter: RateLimiter::direct(quota),
            probe_amount,
            slippage_bps: 50,
            request_timeout: Duration::from_secs(10),
        }
    }

    async fn fetch_quote(&self, from: &str, to: &str, amount: u64) -> Result<Option<QuoteResponse>> {
        self.limiter.until_ready().await;

        let amount = amount.to_string();
        let slippage = self.slippage_bps.to_string();
        let response = self
            .http
            .get(format!("{}/quote", self.base_url))
            .query(&[
                ("inputMint", from),
                ("outputMint", to),
                ("amount", amount.as_str()),
                ("slippageBps", slippage.as_str()),
            ])
            .timeout(self.request_timeout)
            .send()
            .await
            .context("Failed to reach quote API")?;

        let success = response.status().is_success();
        let body = response.text().await.context("Failed to read quote response")?;
        parse_quote_body(success, &body)
    }
}

#[async_trait]
impl Router for JupiterRouter {
    #[instrument(skip(self))]
    async fn has_route(&self, from: &str, to: &str) -> Result<bool> {
        let found = self.fetch_quote(from, to, self.probe_amount).await?.is_some();
        debug!("Route {} -> {}: {}", from, to, found);
        Ok(found)
    }

    #[instrument(skip(self))]
    async fn quote(&self, from: &str, to: &str, amount: u64) -> Result<Option<Quote>> {
        match self.fetch_quote(from, to, amount).await? {
            Some(response) => Ok(Some(to_quote(&response)?)),
            None => Ok(None),
        }
    }
}

fn parse_quote_body(success: bool, body: &str) -> Result<Option<QuoteResponse>> {
    if success {
        let response: QuoteResponse = serde_json::from_str(body).context("Failed to parse quote response")?;
        return Ok((!response.route_plan.is_empty()).then_some(response));
    }

    match serde_json::from_str::<QuoteError>(body) {
        Ok(err) if err.error_code.as_deref().is_some_and(|code| NO_ROUTE_CODES.contains(&code)) => Ok(None),
        Ok(err) => bail!("Quote API error: {}", err.error),
        Err(_) => bail!("Quote API returned an error: {}", body),
    }
}

fn to_quote(response: &QuoteResponse) -> Result<Quote> {
    let in_lamports: u64 = response.in_amount.parse().context("Invalid inAmount")?;
    let price_impact: f64 = response
        .price_impact_pct
        .parse()
        .context("Invalid priceImpactPct")?;

    let in_sol = in_lamports as f64 / LAMPORTS_PER_SOL as f64;
    Ok(Quote {
        liquidity: estimate_liquidity(in_sol, price_impact),
        price_impact,
    })
}

/// Depth in SOL implied by moving the price by `price_impact` with `in_sol`.
pub fn estimate_liquidity(in_sol: f64, price_impact: f64) -> f64 {
    in_sol / price_impact.abs().max(MIN_PRICE_IMPACT)
}
