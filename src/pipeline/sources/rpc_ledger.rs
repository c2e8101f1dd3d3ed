//! Mint authority reads over Solana JSON-RPC.

use crate::pipeline::collaborators::{LedgerReader, MintInfo};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::{strategy::ExponentialBackoff, Retry};
use tracing::{debug, instrument};

/// Size of the base SPL Token mint account. Token-2022 mints append
/// extensions after it.
pub const MINT_ACCOUNT_LEN: usize = 82;

const MINT_AUTHORITY_OFFSET: usize = 0;
const IS_INITIALIZED_OFFSET: usize = 45;
const FREEZE_AUTHORITY_OFFSET: usize = 46;

pub struct RpcLedgerReader {
    rpc: Arc<RpcClient>,
    retry_attempts: usize,
}

impl RpcLedgerReader {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self::with_client(Arc::new(RpcClient::new(rpc_url.into())), 3)
    }

    pub fn with_client(rpc: Arc<RpcClient>, retry_attempts: usize) -> Self {
        Self { rpc, retry_attempts }
    }

    async fn fetch_mint_info(&self, mint: &Pubkey) -> Result<MintInfo> {
        let account = self
            .rpc
            .get_account(mint)
            .await
            .context("Failed to fetch mint account")?;
        parse_mint_authorities(&account.data)
    }
}

#[async_trait]
impl LedgerReader for RpcLedgerReader {
    #[instrument(skip(self), fields(mint = %mint))]
    async fn get_parsed_mint_info(&self, mint: &str) -> Result<MintInfo> {
        let key = Pubkey::from_str(mint).with_context(|| format!("Invalid mint address {}", mint))?;

        let retry_strategy = ExponentialBackoff::from_millis(100)
            .max_delay(Duration::from_secs(2))
            .take(self.retry_attempts);

        let info = Retry::spawn(retry_strategy, || self.fetch_mint_info(&key)).await?;
        debug!(
            "Mint {} authorities: mint={:?}, freeze={:?}",
            mint, info.mint_authority, info.freeze_authority
        );
        Ok(info)
    }
}

/// Read both authorities from raw SPL mint account data.
pub fn parse_mint_authorities(data: &[u8]) -> Result<MintInfo> {
    if data.len() < MINT_ACCOUNT_LEN {
        bail!(
            "Invalid mint account data length: {} (expected at least {})",
            data.len(),
            MINT_ACCOUNT_LEN
        );
    }
    if data[IS_INITIALIZED_OFFSET] != 1 {
        bail!("Mint account is not initialized");
    }

    Ok(MintInfo {
        mint_authority: read_optional_key(data, MINT_AUTHORITY_OFFSET)?,
        freeze_authority: read_optional_key(data, FREEZE_AUTHORITY_OFFSET)?,
    })
}

// COption<Pubkey>: u32 little-endian tag followed by 32 key bytes
fn read_optional_key(data: &[u8], offset: usize) -> Result<Option<String>> {
    let tag: [u8; 4] = data[offset..offset + 4]
        .try_into()
        .context("Invalid authority tag")?;

    match u32::from_le_bytes(tag) {
        0 => Ok(None),
        1 => {
            let key: [u8; 32] = data[offset + 4..offset + 36]
                .try_into()
                .context("Invalid authority key")?;
            Ok(Some(Pubkey::new_from_array(key).to_string()))
        }
        other => bail!("Invalid authority tag {} at offset {}", other, offset),
    }
}
