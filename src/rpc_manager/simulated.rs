//! In-memory ledger used by `--simulate` mode and by tests
//!
//! Transactions are scripted per address, writes are recorded, and failures can
//! be queued so that the resilience layer sees them exactly like remote errors.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use tracing::debug;

use super::{LedgerError, LedgerResult, LedgerRpc};
use crate::types::{
    PoolKind, SignatureInfo, TokenBalanceRecord, TrackedAsset, TransactionRecord,
};

/// Balance of the synthetic fee payer in every scripted transaction
const PAYER_BALANCE: u64 = 50_000_000_000;

/// One `execute_buyback` the ledger accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuybackRecord {
    pub mint: Pubkey,
    /// Amount requested by the caller
    pub requested: u64,
    /// Amount actually drained from the pool
    pub spent: u64,
}

#[derive(Debug, Default)]
struct SimState {
    /// Per address listing, oldest first
    listings: HashMap<Pubkey, Vec<SignatureInfo>>,
    transactions: HashMap<Signature, TransactionRecord>,
    /// Current balance of each accrual address, used to build realistic pre/post pairs
    address_balances: HashMap<Pubkey, u64>,
    /// Fees sitting in creator vaults, not yet collected into the pool
    uncollected: HashMap<Pubkey, u64>,
    demand: HashMap<Pubkey, u64>,
    pool_balance: u64,
    /// Pool drain per buyback in basis points of the requested amount
    drain_bps: u64,
    failures: VecDeque<LedgerError>,
    /// Failures reserved for one operation name
    operation_failures: HashMap<&'static str, VecDeque<LedgerError>>,
    latency: Option<Duration>,
    commits: Vec<(Pubkey, u64)>,
    buybacks: Vec<BuybackRecord>,
    finalizations: Vec<(Pubkey, bool)>,
}

#[derive(Debug)]
pub struct SimulatedLedger {
    name: String,
    state: Mutex<SimState>,
    calls: AtomicUsize,
    next_slot: AtomicU64,
    next_signature: AtomicU64,
}

impl SimulatedLedger {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(SimState {
                drain_bps: 10_000,
                ..SimState::default()
            }),
            calls: AtomicUsize::new(0),
            next_slot: AtomicU64::new(1_000),
            next_signature: AtomicU64::new(1),
        }
    }

    /// Number of trait calls received, including injected failures
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Queue errors returned by the next trait calls, one per call
    pub fn fail_next(&self, errors: Vec<LedgerError>) {
        self.state.lock().failures.extend(errors);
    }

    /// Queue errors returned only by calls to `operation`
    pub fn fail_on(&self, operation: &'static str, errors: Vec<LedgerError>) {
        self.state
            .lock()
            .operation_failures
            .entry(operation)
            .or_default()
            .extend(errors);
    }

    /// Delay every trait call by `latency` before answering
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = Some(latency);
    }

    pub fn set_pool_balance(&self, lamports: u64) {
        self.state.lock().pool_balance = lamports;
    }

    /// How much of each requested buyback actually leaves the pool, in bps
    pub fn set_drain_bps(&self, bps: u64) {
        self.state.lock().drain_bps = bps;
    }

    pub fn set_demand(&self, mint: Pubkey, lamports: u64) {
        self.state.lock().demand.insert(mint, lamports);
    }

    pub fn demand_of(&self, mint: &Pubkey) -> u64 {
        self.state.lock().demand.get(mint).copied().unwrap_or(0)
    }

    pub fn pool_lamports(&self) -> u64 {
        self.state.lock().pool_balance
    }

    pub fn commits(&self) -> Vec<(Pubkey, u64)> {
        self.state.lock().commits.clone()
    }

    pub fn buybacks(&self) -> Vec<BuybackRecord> {
        self.state.lock().buybacks.clone()
    }

    pub fn finalizations(&self) -> Vec<(Pubkey, bool)> {
        self.state.lock().finalizations.clone()
    }

    fn mint_signature(&self) -> Signature {
        let n = self.next_signature.fetch_add(1, Ordering::SeqCst);
        let mut bytes = [0u8; 64];
        bytes[..8].copy_from_slice(&n.to_le_bytes());
        bytes[8..8 + self.name.len().min(56)]
            .copy_from_slice(&self.name.as_bytes()[..self.name.len().min(56)]);
        Signature::from(bytes)
    }

    /// Append an arbitrary transaction to an address listing
    pub fn push_transaction(&self, address: Pubkey, mut record: TransactionRecord, failed: bool) -> Signature {
        let signature = self.mint_signature();
        let slot = self.next_slot.fetch_add(1, Ordering::SeqCst);
        record.signature = signature;
        record.slot = slot;

        let mut state = self.state.lock();
        state.listings.entry(address).or_default().push(SignatureInfo {
            signature,
            slot,
            failed,
        });
        state.transactions.insert(signature, record);
        signature
    }

    /// Script an external trade paying `amount` of creator fee to the asset
    pub fn push_fee(&self, asset: &TrackedAsset, amount: u64) -> Signature {
        let payer = Pubkey::new_unique();
        let before = {
            let mut state = self.state.lock();
            let balance = state.address_balances.entry(asset.accrual_address).or_insert(0);
            let before = *balance;
            *balance = balance.saturating_add(amount);
            *state.uncollected.entry(asset.mint).or_insert(0) += amount;
            before
        };

        let record = match asset.pool_kind {
            PoolKind::BondingCurve => TransactionRecord {
                account_keys: vec![payer, asset.accrual_address],
                pre_balances: vec![PAYER_BALANCE, before],
                post_balances: vec![PAYER_BALANCE.saturating_sub(amount), before + amount],
                ..TransactionRecord::default()
            },
            PoolKind::Amm => {
                let native = spl_token::native_mint::id();
                TransactionRecord {
                    account_keys: vec![payer, asset.accrual_address],
                    pre_balances: vec![PAYER_BALANCE, 2_039_280],
                    post_balances: vec![PAYER_BALANCE, 2_039_280],
                    pre_token_balances: vec![TokenBalanceRecord {
                        account_index: 1,
                        mint: native,
                        amount: before,
                    }],
                    post_token_balances: vec![TokenBalanceRecord {
                        account_index: 1,
                        mint: native,
                        amount: before + amount,
                    }],
                    ..TransactionRecord::default()
                }
            }
        };
        self.push_transaction(asset.accrual_address, record, false)
    }

    /// Generate a random burst of trades for simulate mode
    pub fn simulate_activity(&self, assets: &[TrackedAsset]) -> usize {
        let mut rng = rand::thread_rng();
        let mut generated = 0;
        for asset in assets {
            let trades = rng.gen_range(0..3);
            for _ in 0..trades {
                let fee = rng.gen_range(5_000..2_000_000);
                self.push_fee(asset, fee);
                generated += 1;
            }
        }
        debug!(ledger = %self.name, generated, "Simulated trading activity");
        generated
    }

    /// Count the call, honour injected latency, then pop a queued failure
    async fn enter(&self, operation: &'static str) -> LedgerResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = self.state.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state.lock();
        let targeted = state
            .operation_failures
            .get_mut(operation)
            .and_then(|queue| queue.pop_front());
        match targeted.or_else(|| state.failures.pop_front()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl LedgerRpc for SimulatedLedger {
    fn endpoint(&self) -> &str {
        &self.name
    }

    async fn signatures_for_address(
        &self,
        address: &Pubkey,
        until: Option<Signature>,
        limit: usize,
    ) -> LedgerResult<Vec<SignatureInfo>> {
        self.enter("signatures_for_address").await?;
        let state = self.state.lock();
        let Some(listing) = state.listings.get(address) else {
            return Ok(Vec::new());
        };
        Ok(listing
            .iter()
            .rev()
            .take_while(|info| Some(info.signature) != until)
            .take(limit)
            .copied()
            .collect())
    }

    async fn transaction(&self, signature: &Signature) -> LedgerResult<Option<TransactionRecord>> {
        self.enter("transaction").await?;
        Ok(self.state.lock().transactions.get(signature).cloned())
    }

    async fn commit_accrual(&self, asset: &TrackedAsset, amount: u64) -> LedgerResult<Signature> {
        self.enter("commit_accrual").await?;
        {
            let mut state = self.state.lock();
            state.commits.push((asset.mint, amount));
            *state.demand.entry(asset.mint).or_insert(0) += amount;
        }
        Ok(self.mint_signature())
    }

    async fn declared_demand(&self, asset: &TrackedAsset) -> LedgerResult<u64> {
        self.enter("declared_demand").await?;
        Ok(self.demand_of(&asset.mint))
    }

    async fn collect_pool(&self, assets: &[TrackedAsset]) -> LedgerResult<u64> {
        self.enter("collect_pool").await?;
        let mut state = self.state.lock();
        let mut collected = 0u64;
        for asset in assets {
            if let Some(amount) = state.uncollected.remove(&asset.mint) {
                collected = collected.saturating_add(amount);
            }
        }
        state.pool_balance = state.pool_balance.saturating_add(collected);
        Ok(collected)
    }

    async fn pool_balance(&self) -> LedgerResult<u64> {
        self.enter("pool_balance").await?;
        Ok(self.pool_lamports())
    }

    async fn execute_buyback(&self, asset: &TrackedAsset, amount: u64) -> LedgerResult<Signature> {
        self.enter("execute_buyback").await?;
        {
            let mut state = self.state.lock();
            if amount > state.pool_balance {
                return Err(LedgerError::InsufficientFunds {
                    endpoint: self.name.clone(),
                });
            }
            let drained = (amount as u128 * state.drain_bps as u128 / 10_000) as u64;
            let spent = drained.min(state.pool_balance);
            state.pool_balance -= spent;
            state.buybacks.push(BuybackRecord {
                mint: asset.mint,
                requested: amount,
                spent,
            });
        }
        Ok(self.mint_signature())
    }

    async fn finalize_recipient(&self, asset: &TrackedAsset, consumed: bool) -> LedgerResult<Signature> {
        self.enter("finalize_recipient").await?;
        {
            let mut state = self.state.lock();
            if consumed {
                state.demand.insert(asset.mint, 0);
            }
            state.finalizations.push((asset.mint, consumed));
        }
        Ok(self.mint_signature())
    }
}
