//! `LedgerRpc` over a Solana JSON-RPC endpoint

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_client::GetConfirmedSignaturesForAddress2Config;
use solana_rpc_client_api::config::RpcTransactionConfig;
use solana_sdk::{
    commitment_config::CommitmentConfig,
    instruction::Instruction,
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    transaction::Transaction,
};
use solana_transaction_status::{
    EncodedConfirmedTransactionWithStatusMeta, UiLoadedAddresses, UiTransactionEncoding,
    UiTransactionTokenBalance,
};
use tracing::{debug, info};

use super::program::{parse_pending_fees, ProgramClient};
use super::{LedgerError, LedgerResult, LedgerRpc};
use crate::types::{SignatureInfo, TokenBalanceRecord, TrackedAsset, TransactionRecord};

/// `getTransaction` answers `null` for unknown signatures, which surfaces as a
/// deserialization failure rather than an RPC error.
fn is_missing_transaction(err: &ClientError) -> bool {
    match err.kind() {
        ClientErrorKind::SerdeJson(e) => e.to_string().contains("invalid type: null"),
        other => other.to_string().to_lowercase().contains("not found"),
    }
}

pub struct SolanaLedger {
    endpoint: String,
    client: RpcClient,
    commitment: CommitmentConfig,
    program: ProgramClient,
    signer: Arc<Keypair>,
}

impl std::fmt::Debug for SolanaLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolanaLedger")
            .field("endpoint", &self.endpoint)
            .field("program_id", &self.program.program_id)
            .field("signer", &self.signer.pubkey())
            .finish()
    }
}

impl SolanaLedger {
    pub fn new(
        url: &str,
        timeout: Duration,
        commitment: CommitmentConfig,
        program_id: Pubkey,
        signer: Arc<Keypair>,
    ) -> Self {
        Self {
            endpoint: url.to_string(),
            client: RpcClient::new_with_timeout_and_commitment(url.to_string(), timeout, commitment),
            commitment,
            program: ProgramClient::new(program_id),
            signer,
        }
    }

    fn map_err(&self, err: ClientError) -> LedgerError {
        LedgerError::from_client_error(err, &self.endpoint)
    }

    /// Sign and submit instructions with the admin key, waiting for confirmation
    async fn submit(&self, instructions: &[Instruction]) -> LedgerResult<Signature> {
        let blockhash = self
            .client
            .get_latest_blockhash()
            .await
            .map_err(|e| self.map_err(e))?;
        let tx = Transaction::new_signed_with_payer(
            instructions,
            Some(&self.signer.pubkey()),
            &[self.signer.as_ref()],
            blockhash,
        );
        let signature = self
            .client
            .send_and_confirm_transaction(&tx)
            .await
            .map_err(|e| self.map_err(e))?;
        debug!(endpoint = %self.endpoint, %signature, "Transaction confirmed");
        Ok(signature)
    }

    async fn lamports(&self, address: &Pubkey) -> LedgerResult<u64> {
        self.client
            .get_balance_with_commitment(address, self.commitment)
            .await
            .map(|response| response.value)
            .map_err(|e| self.map_err(e))
    }
}

fn parse_pubkey(value: &str) -> LedgerResult<Pubkey> {
    Pubkey::from_str(value)
        .map_err(|e| LedgerError::InvalidInput(format!("bad pubkey {}: {}", value, e)))
}

fn token_balances(balances: Option<Vec<UiTransactionTokenBalance>>) -> LedgerResult<Vec<TokenBalanceRecord>> {
    balances
        .unwrap_or_default()
        .into_iter()
        .map(|balance| {
            let amount = balance.ui_token_amount.amount.parse::<u64>().map_err(|e| {
                LedgerError::InvalidInput(format!(
                    "bad token amount {}: {}",
                    balance.ui_token_amount.amount, e
                ))
            })?;
            Ok(TokenBalanceRecord {
                account_index: balance.account_index as usize,
                mint: parse_pubkey(&balance.mint)?,
                amount,
            })
        })
        .collect()
}

/// Flatten an encoded transaction into the parts the extractor reads
pub fn decode_transaction(
    signature: Signature,
    encoded: EncodedConfirmedTransactionWithStatusMeta,
) -> LedgerResult<TransactionRecord> {
    let meta = encoded
        .transaction
        .meta
        .ok_or_else(|| LedgerError::InvalidInput(format!("transaction {} has no meta", signature)))?;
    let versioned = encoded.transaction.transaction.decode().ok_or_else(|| {
        LedgerError::InvalidInput(format!("transaction {} could not be decoded", signature))
    })?;

    let mut account_keys = versioned.message.static_account_keys().to_vec();
    if let Some(loaded) = Option::<UiLoadedAddresses>::from(meta.loaded_addresses) {
        for key in loaded.writable.iter().chain(loaded.readonly.iter()) {
            account_keys.push(parse_pubkey(key)?);
        }
    }

    Ok(TransactionRecord {
        signature,
        slot: encoded.slot,
        account_keys,
        pre_balances: meta.pre_balances,
        post_balances: meta.post_balances,
        pre_token_balances: token_balances(meta.pre_token_balances.into())?,
        post_token_balances: token_balances(meta.post_token_balances.into())?,
    })
}

#[async_trait]
impl LedgerRpc for SolanaLedger {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn signatures_for_address(
        &self,
        address: &Pubkey,
        until: Option<Signature>,
        limit: usize,
    ) -> LedgerResult<Vec<SignatureInfo>> {
        let config = GetConfirmedSignaturesForAddress2Config {
            before: None,
            until,
            limit: Some(limit),
            commitment: Some(self.commitment),
        };
        let statuses = self
            .client
            .get_signatures_for_address_with_config(address, config)
            .await
            .map_err(|e| self.map_err(e))?;

        statuses
            .into_iter()
            .map(|status| {
                let signature = Signature::from_str(&status.signature).map_err(|e| {
                    LedgerError::InvalidInput(format!("bad signature {}: {}", status.signature, e))
                })?;
                Ok(SignatureInfo {
                    signature,
                    slot: status.slot,
                    failed: status.err.is_some(),
                })
            })
            .collect()
    }

    async fn transaction(&self, signature: &Signature) -> LedgerResult<Option<TransactionRecord>> {
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::Base64),
            commitment: Some(self.commitment),
            max_supported_transaction_version: Some(0),
        };
        match self.client.get_transaction_with_config(signature, config).await {
            Ok(encoded) => decode_transaction(*signature, encoded).map(Some),
            Err(err) if is_missing_transaction(&err) => Ok(None),
            Err(err) => Err(self.map_err(err)),
        }
    }

    async fn commit_accrual(&self, asset: &TrackedAsset, amount: u64) -> LedgerResult<Signature> {
        let ix = self
            .program
            .update_pending_fees(&self.signer.pubkey(), asset, amount);
        self.submit(&[ix]).await
    }

    async fn declared_demand(&self, asset: &TrackedAsset) -> LedgerResult<u64> {
        let stats = self.program.token_stats(&asset.mint);
        let account = self
            .client
            .get_account_with_commitment(&stats, self.commitment)
            .await
            .map_err(|e| self.map_err(e))?
            .value;
        match account {
            Some(account) => parse_pending_fees(&account.data),
            None => Ok(0),
        }
    }

    async fn collect_pool(&self, assets: &[TrackedAsset]) -> LedgerResult<u64> {
        let authority = self.program.authority();
        let before = self.lamports(&authority).await?;
        let admin = self.signer.pubkey();
        let instructions: Vec<Instruction> = assets
            .iter()
            .map(|asset| self.program.collect_fees(&admin, asset))
            .collect();
        if instructions.is_empty() {
            return Ok(0);
        }
        self.submit(&instructions).await?;
        let after = self.lamports(&authority).await?;
        let collected = after.saturating_sub(before);
        info!(endpoint = %self.endpoint, collected, assets = assets.len(), "Collected creator vaults");
        Ok(collected)
    }

    async fn pool_balance(&self) -> LedgerResult<u64> {
        self.lamports(&self.program.authority()).await
    }

    async fn execute_buyback(&self, asset: &TrackedAsset, amount: u64) -> LedgerResult<Signature> {
        let ix = self
            .program
            .execute_buy(&self.signer.pubkey(), asset, amount);
        self.submit(&[ix]).await
    }

    async fn finalize_recipient(&self, asset: &TrackedAsset, consumed: bool) -> LedgerResult<Signature> {
        let ix = self
            .program
            .finalize_allocated_cycle(&self.signer.pubkey(), asset, consumed);
        self.submit(&[ix]).await
    }
}
