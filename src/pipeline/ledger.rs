//! Transition audit ledger.
//!
//! Persists every applied stage transition with the candidate's failure
//! history so drop decisions can be audited after the fact.

use crate::pipeline::types::{FailureReason, StageTransitionResult, TokenStage};
use crate::types::Pubkey;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqlitePoolOptions, FromRow, Pool, Sqlite};
use std::sync::Arc;
use tracing::{debug, info};

/// One applied evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// Database record ID (set by DB)
    pub id: Option<i64>,
    pub mint: Pubkey,
    pub generation: u64,
    pub from_stage: TokenStage,
    pub to_stage: Option<TokenStage>,
    pub success: bool,
    pub should_drop: bool,
    pub cleared_for_trading: bool,
    pub reason: Option<FailureReason>,
    pub retry_after_ms: Option<u64>,
    pub failure_history: Vec<FailureReason>,
    pub recorded_at: i64,
}

impl TransitionRecord {
    pub fn from_result(
        result: &StageTransitionResult,
        from_stage: TokenStage,
        generation: u64,
        recorded_at: i64,
    ) -> Self {
        Self {
            id: None,
            mint: result.mint.clone(),
            generation,
            from_stage,
            to_stage: result.new_stage,
            success: result.success,
            should_drop: result.should_drop,
            cleared_for_trading: result.cleared_for_trading,
            reason: result.reason.clone(),
            retry_after_ms: result.retry_after_ms,
            failure_history: result.failure_history.clone(),
            recorded_at,
        }
    }
}

/// Persistent store for transition records.
#[async_trait]
pub trait TransitionLedger: Send + Sync {
    /// Saves a record, returning its ID.
    async fn record(&self, record: &TransitionRecord) -> Result<i64>;

    /// All records for a mint, oldest first.
    async fn history(&self, mint: &str) -> Result<Vec<TransitionRecord>>;

    async fn count(&self) -> Result<i64>;
}

#[derive(FromRow)]
struct TransitionRow {
    id: i64,
    mint: String,
    generation: i64,
    from_stage: String,
    to_stage: Option<String>,
    success: bool,
    should_drop: bool,
    cleared_for_trading: bool,
    reason: Option<String>,
    retry_after_ms: Option<i64>,
    failure_history: String, // JSON
    recorded_at: i64,
}

/// SQLite implementation of [`TransitionLedger`].
pub struct SqliteTransitionLedger {
    pool: Pool<Sqlite>,
}

impl SqliteTransitionLedger {
    /// Connect to `database_url` (e.g. `sqlite:./transitions.db?mode=rwc`).
    pub async fn connect(database_url: &str) -> Result<Arc<Self>> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to SQLite database")?;
        let ledger = Self { pool };
        ledger.migrate().await?;
        info!("Transition ledger connected to {}", database_url);
        Ok(Arc::new(ledger))
    }

    /// Private in-memory database; a single connection keeps it shared.
    pub async fn in_memory() -> Result<Arc<Self>> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory SQLite database")?;
        let ledger = Self { pool };
        ledger.migrate().await?;
        Ok(Arc::new(ledger))
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stage_transitions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                mint TEXT NOT NULL,
                generation INTEGER NOT NULL,
                from_stage TEXT NOT NULL,
                to_stage TEXT,
                success BOOLEAN NOT NULL,
                should_drop BOOLEAN NOT NULL,
                cleared_for_trading BOOLEAN NOT NULL,
                reason TEXT,
                retry_after_ms INTEGER,
                failure_history TEXT NOT NULL,
                recorded_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create stage_transitions table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_stage_transitions_mint ON stage_transitions (mint);")
            .execute(&self.pool)
            .await
            .context("Failed to create stage_transitions index")?;

        Ok(())
    }

    fn row_to_record(row: TransitionRow) -> Result<TransitionRecord> {
        Ok(TransitionRecord {
            id: Some(row.id),
            mint: row.mint,
            generation: u64::try_from(row.generation).context("Stored generation is negative")?,
            from_stage: serde_json::from_str(&row.from_stage)?,
            to_stage: row.to_stage.as_deref().map(serde_json::from_str).transpose()?,
            success: row.success,
            should_drop: row.should_drop,
            cleared_for_trading: row.cleared_for_trading,
            reason: row.reason.as_deref().map(serde_json::from_str).transpose()?,
            retry_after_ms: row
                .retry_after_ms
                .map(u64::try_from)
                .transpose()
                .context("Stored retry delay is negative")?,
            failure_history: serde_json::from_str(&row.failure_history)?,
            recorded_at: row.recorded_at,
        })
    }
}

#[async_trait]
impl TransitionLedger for SqliteTransitionLedger {
    async fn record(&self, record: &TransitionRecord) -> Result<i64> {
        debug!("Recording transition for mint: {}", record.mint);

        let to_stage = record.to_stage.map(|s| serde_json::to_string(&s)).transpose()?;
        let reason = record.reason.as_ref().map(serde_json::to_string).transpose()?;
        let generation = i64::try_from(record.generation).context("Generation does not fit in a database integer")?;
        let retry_after_ms = record
            .retry_after_ms
            .map(i64::try_from)
            .transpose()
            .context("Retry delay does not fit in a database integer")?;

        let result = sqlx::query(
            r#"
            INSERT INTO stage_transitions (
                mint, generation, from_stage, to_stage, success, should_drop,
                cleared_for_trading, reason, retry_after_ms, failure_history, recorded_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?);
            "#,
        )
        .bind(record.mint.clone())
        .bind(generation)
        .bind(serde_json::to_string(&record.from_stage)?)
        .bind(to_stage)
        .bind(record.success)
        .bind(record.should_drop)
        .bind(record.cleared_for_trading)
        .bind(reason)
        .bind(retry_after_ms)
        .bind(serde_json::to_string(&record.failure_history)?)
        .bind(record.recorded_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert transition record")?;

        Ok(result.last_insert_rowid())
    }

    async fn history(&self, mint: &str) -> Result<Vec<TransitionRecord>> {
        let rows: Vec<TransitionRow> = sqlx::query_as(
            "SELECT * FROM stage_transitions WHERE mint = ? ORDER BY id ASC",
        )
        .bind(mint)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch transition history")?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn count(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM stage_transitions")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count transition records")?;
        Ok(count.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(mint: &str, should_drop: bool) -> TransitionRecord {
        TransitionRecord {
            id: None,
            mint: mint.to_string(),
            generation: 7,
            from_stage: TokenStage::RaydiumListed,
            to_stage: should_drop.then_some(TokenStage::Dropped),
            success: false,
            should_drop,
            cleared_for_trading: false,
            reason: Some(FailureReason::SupplementalCheckFailed("holders".to_string())),
            retry_after_ms: (!should_drop).then_some(2_000),
            failure_history: vec![FailureReason::NoRoute, FailureReason::LowLiquidity],
            recorded_at: 1_700_000_000_000,
        }
    }

    #[tokio::test]
    async fn test_record_and_read_back() {
        let ledger = SqliteTransitionLedger::in_memory().await.unwrap();

        let first = ledger.record(&sample_record("mintA", false)).await.unwrap();
        let second = ledger.record(&sample_record("mintA", true)).await.unwrap();
        ledger.record(&sample_record("mintB", false)).await.unwrap();
        assert!(second > first);

        let history = ledger.history("mintA").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, Some(first));
        assert_eq!(history[0].retry_after_ms, Some(2_000));
        assert_eq!(history[1].to_stage, Some(TokenStage::Dropped));
        assert_eq!(
            history[1].failure_history,
            vec![FailureReason::NoRoute, FailureReason::LowLiquidity]
        );
        assert_eq!(
            history[1].reason,
            Some(FailureReason::SupplementalCheckFailed("holders".to_string()))
        );

        assert_eq!(ledger.count().await.unwrap(), 3);
        assert!(ledger.history("unknown").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_out_of_range_values_are_rejected() {
        let ledger = SqliteTransitionLedger::in_memory().await.unwrap();

        let mut record = sample_record("mintA", false);
        record.generation = u64::MAX;
        assert!(ledger.record(&record).await.is_err());

        let mut record = sample_record("mintA", false);
        record.retry_after_ms = Some(u64::MAX);
        assert!(ledger.record(&record).await.is_err());

        assert_eq!(ledger.count().await.unwrap(), 0);
    }
}
