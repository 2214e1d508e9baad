//! RPC Manager Module
//!
//! The ledger boundary. `LedgerRpc` is the opaque contract with the chain and
//! the on-chain program; `ResilientLedger` wraps implementations with the
//! resilience primitives and an optional fallback endpoint.

use async_trait::async_trait;
use solana_sdk::{pubkey::Pubkey, signature::Signature};

use crate::types::{SignatureInfo, TrackedAsset, TransactionRecord};

// Submodules
pub mod program;
pub mod rpc_errors;
pub mod rpc_pool;
pub mod simulated;
pub mod solana_ledger;

// Re-exports for convenience
pub use rpc_errors::{LedgerError, LedgerResult};
pub use rpc_pool::{LedgerPoolConfig, ResilientLedger};
pub use simulated::SimulatedLedger;
pub use solana_ledger::SolanaLedger;

/// Reads and writes against the ledger
#[async_trait]
pub trait LedgerRpc: Send + Sync + std::fmt::Debug {
    /// Human readable endpoint name for logs and errors
    fn endpoint(&self) -> &str;

    /// Transactions touching `address` newer than `until`, newest first
    async fn signatures_for_address(
        &self,
        address: &Pubkey,
        until: Option<Signature>,
        limit: usize,
    ) -> LedgerResult<Vec<SignatureInfo>>;

    /// Fetch a confirmed transaction; `None` if the node does not have it
    async fn transaction(&self, signature: &Signature) -> LedgerResult<Option<TransactionRecord>>;

    /// Commit an accrued amount for an asset
    async fn commit_accrual(&self, asset: &TrackedAsset, amount: u64) -> LedgerResult<Signature>;

    /// Accrued, not yet consumed demand recorded on-chain for an asset
    async fn declared_demand(&self, asset: &TrackedAsset) -> LedgerResult<u64>;

    /// Sweep creator vaults into the shared pool; returns the amount collected
    async fn collect_pool(&self, assets: &[TrackedAsset]) -> LedgerResult<u64>;

    /// Spendable balance of the shared pool right now
    async fn pool_balance(&self) -> LedgerResult<u64>;

    /// Spend `amount` from the shared pool on a buy-and-burn for an asset
    async fn execute_buyback(&self, asset: &TrackedAsset, amount: u64) -> LedgerResult<Signature>;

    /// Close out an asset's participation in a round. `consumed` resets its
    /// demand; otherwise the demand is explicitly kept for the next round.
    async fn finalize_recipient(&self, asset: &TrackedAsset, consumed: bool)
        -> LedgerResult<Signature>;
}
