//! Fee extraction from confirmed transactions
//!
//! Computes how much a tracked asset's accrual address gained in one
//! transaction by comparing balances before and after it. Only gains count;
//! outbound movements and the program's own settlement transactions yield zero.

use std::sync::Arc;

use solana_sdk::{pubkey::Pubkey, signature::Signature};
use thiserror::Error;
use tracing::{debug, warn};

use crate::metrics::Metrics;
use crate::rpc_manager::{LedgerError, ResilientLedger};
use crate::types::{PoolKind, TokenBalanceRecord, TrackedAsset, TransactionRecord};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Transaction {0} not available from the ledger")]
    Missing(Signature),

    #[error("Failed to fetch transaction {signature}: {source}")]
    Fetch {
        signature: Signature,
        #[source]
        source: LedgerError,
    },

    #[error("Balance index {index} out of range ({len} balances) in {signature}")]
    BalanceIndex {
        signature: Signature,
        index: usize,
        len: usize,
    },
}

#[derive(Debug, Clone)]
pub struct FeeExtractor {
    /// Transactions touching this program are internal settlements
    program_id: Pubkey,
    metrics: Arc<Metrics>,
}

impl FeeExtractor {
    pub fn new(program_id: Pubkey, metrics: Arc<Metrics>) -> Self {
        Self {
            program_id,
            metrics,
        }
    }

    pub fn program_id(&self) -> &Pubkey {
        &self.program_id
    }

    /// Accrual carried by an already fetched transaction
    pub fn extract_from_record(
        &self,
        asset: &TrackedAsset,
        record: &TransactionRecord,
    ) -> Result<u64, ExtractError> {
        if record.references(&self.program_id) {
            debug!(
                signature = %record.signature,
                asset = %asset.label,
                "Skipping internal settlement transaction"
            );
            return Ok(0);
        }

        match asset.pool_kind {
            PoolKind::BondingCurve => native_gain(record, &asset.accrual_address),
            PoolKind::Amm => wrapped_gain(record, &asset.accrual_address),
        }
    }

    /// Fetch and extract, surfacing every failure
    pub async fn try_extract(
        &self,
        ledger: &ResilientLedger,
        asset: &TrackedAsset,
        signature: Signature,
    ) -> Result<u64, ExtractError> {
        let record = ledger
            .transaction(signature)
            .await
            .map_err(|source| ExtractError::Fetch { signature, source })?
            .ok_or(ExtractError::Missing(signature))?;
        self.extract_from_record(asset, &record)
    }

    /// Fetch and extract; failures are logged and count as zero accrual
    pub async fn extract(
        &self,
        ledger: &ResilientLedger,
        asset: &TrackedAsset,
        signature: Signature,
    ) -> u64 {
        match self.try_extract(ledger, asset, signature).await {
            Ok(amount) => amount,
            Err(e) => {
                self.metrics.extraction_errors_total.inc();
                warn!(asset = %asset.label, %signature, error = %e, "Fee extraction failed, treating as zero");
                0
            }
        }
    }
}

fn native_gain(record: &TransactionRecord, address: &Pubkey) -> Result<u64, ExtractError> {
    let Some(index) = record.account_index(address) else {
        return Ok(0);
    };
    let balance_at = |balances: &[u64]| {
        balances
            .get(index)
            .copied()
            .ok_or(ExtractError::BalanceIndex {
                signature: record.signature,
                index,
                len: balances.len(),
            })
    };
    let pre = balance_at(&record.pre_balances)?;
    let post = balance_at(&record.post_balances)?;
    Ok(post.saturating_sub(pre))
}

fn wrapped_gain(record: &TransactionRecord, address: &Pubkey) -> Result<u64, ExtractError> {
    let Some(index) = record.account_index(address) else {
        return Ok(0);
    };
    let native = spl_token::native_mint::id();
    // A missing entry means the token account did not exist on that side
    let amount_in = |balances: &[TokenBalanceRecord]| {
        balances
            .iter()
            .find(|b| b.account_index == index && b.mint == native)
            .map(|b| b.amount)
            .unwrap_or(0)
    };
    let pre = amount_in(&record.pre_token_balances);
    let post = amount_in(&record.post_token_balances);
    Ok(post.saturating_sub(pre))
}
