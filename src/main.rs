//! Main entry point for the token-sentinel demo
//!
//! Runs two launches through the stage pipeline against in-process
//! collaborators: one from a well-behaved creator that gets cleared for
//! trading, and one from a creator deploying tokens in rapid succession.
//! Each transition is printed as JSON.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use token_sentinel::pipeline::{
    CheckMetricsCollector, Clock, LedgerReader, ManualClock, MetadataSource, MintInfo, PipelineBuilder, PipelineConfig,
    PoolLocator, Quote, Router, SqliteTransitionLedger, StageEvaluator, TransitionLedger,
};
use token_sentinel::types::{NewTokenEvent, Pubkey, TokenMetadata, TradeEvent};
use tracing::{info, Level};

const GOOD_CREATOR: &str = "7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU";
const SERIAL_CREATOR: &str = "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM";
/// Wallet used as quoting context
const TRADER_WALLET: &str = "4Nd1mBQtrMJVYVfKf2PJy9NZUZdTAsp7D4xWLs4gDB4T";

/// Demo start time (ms since epoch); the clock is advanced by retry delays.
const START_MS: i64 = 1_700_000_000_000;

struct DemoRouter;

#[async_trait]
impl Router for DemoRouter {
    async fn has_route(&self, _from: &str, _to: &str) -> Result<bool> {
        Ok(true)
    }

    async fn quote(&self, _from: &str, _to: &str, _amount: u64) -> Result<Option<Quote>> {
        Ok(Some(Quote {
            liquidity: 42.0,
            price_impact: 0.0024,
        }))
    }
}

struct DemoLedger;

#[async_trait]
impl LedgerReader for DemoLedger {
    async fn get_parsed_mint_info(&self, _mint: &str) -> Result<MintInfo> {
        Ok(MintInfo {
            mint_authority: None,
            freeze_authority: None,
        })
    }
}

struct DemoMetadata;

#[async_trait]
impl MetadataSource for DemoMetadata {
    async fn fetch_metadata(&self, mint: &str) -> Result<TokenMetadata> {
        Ok(TokenMetadata {
            name: Some(format!("Demo {}", mint.chars().take(4).collect::<String>())),
            symbol: Some("DEMO".to_string()),
            image: Some(format!("ipfs://demo/{}.png", mint)),
            creator_age_secs: Some(86_400),
        })
    }
}

/// Pool shows up after a few polls.
struct DemoPools {
    polls: AtomicU32,
}

#[async_trait]
impl PoolLocator for DemoPools {
    async fn find_pool(&self, mint: &str) -> Result<Option<Pubkey>> {
        let polls = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok((polls > 2).then(|| format!("pool-{}", mint)))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("Starting token-sentinel pipeline demo");

    let config = match std::env::args().nth(1) {
        Some(path) => PipelineConfig::from_json_file(&path)?,
        None => PipelineConfig::default(),
    };

    let clock = Arc::new(ManualClock::new(START_MS));
    let metrics = CheckMetricsCollector::new();
    let ledger = SqliteTransitionLedger::in_memory().await?;

    let evaluator = PipelineBuilder::new()
        .with_config(config)
        .with_wallet(TRADER_WALLET)
        .with_clock(clock.clone())
        .with_router(Arc::new(DemoRouter))
        .with_ledger_reader(Arc::new(DemoLedger))
        .with_metadata_source(Arc::new(DemoMetadata))
        .with_pool_locator(Arc::new(DemoPools {
            polls: AtomicU32::new(0),
        }))
        .with_recorder(Arc::new(metrics.clone()))
        .with_transition_ledger(ledger.clone())
        .build()?;
    let sweepers = evaluator.spawn_sweepers();

    let good_mint = "GoodMint1111111111111111111111111111111111111";
    announce(&evaluator, good_mint, GOOD_CREATOR, clock.as_ref()).await;

    // Four launches push the serial creator over the rapid deployment threshold
    for i in 1..=4 {
        announce(&evaluator, &format!("SerialMint{}", i), SERIAL_CREATOR, clock.as_ref()).await;
    }

    // Organic buying on the good launch
    for i in 0..20u32 {
        evaluator.on_trade(TradeEvent {
            mint: good_mint.to_string(),
            wallet: format!("Buyer{}", i % 12),
            amount: 0.1 + f64::from(i % 7) * 0.35,
        });
    }

    drive(&evaluator, good_mint, clock.as_ref()).await?;
    drive(&evaluator, "SerialMint4", clock.as_ref()).await?;

    for (check, counts) in metrics.snapshot().await {
        info!("{}: {} passed, {} failed", check, counts.passed, counts.failed);
    }
    info!(
        "Ledger holds {} transitions; {} candidates still tracked",
        ledger.count().await?,
        evaluator.tracked_count().await
    );

    for sweeper in sweepers {
        sweeper.shutdown().await;
    }

    info!("Demo completed.");
    Ok(())
}

async fn announce(evaluator: &StageEvaluator, mint: &str, creator: &str, clock: &ManualClock) {
    let event = NewTokenEvent {
        mint: mint.to_string(),
        creator: creator.to_string(),
        pool: None,
        timestamp: clock.now_ms(),
        metadata: None,
    };
    evaluator.on_new_token(event).await;
}

/// Evaluate `mint` until it is cleared or dropped, advancing the clock by
/// each retry delay.
async fn drive(evaluator: &StageEvaluator, mint: &str, clock: &ManualClock) -> Result<()> {
    loop {
        let Some(result) = evaluator.evaluate(mint).await? else {
            return Ok(());
        };
        println!(
            "{}",
            serde_json::to_string(&result).context("Failed to serialize transition")?
        );

        if result.should_drop || result.cleared_for_trading {
            return Ok(());
        }
        let delay = result.retry_after_ms.unwrap_or(1_000);
        clock.advance(i64::try_from(delay).unwrap_or(i64::MAX));
    }
}
