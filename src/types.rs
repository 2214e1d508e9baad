//! Common types used throughout the daemon

use serde::{Deserialize, Serialize};
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use spl_associated_token_account::get_associated_token_address;
use std::fmt;

/// Bonding-curve program that owns the native creator vaults
pub const BONDING_CURVE_PROGRAM: Pubkey =
    solana_sdk::pubkey!("6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P");

/// AMM program whose creator vault authority holds wrapped SOL
pub const AMM_PROGRAM: Pubkey = solana_sdk::pubkey!("pAMMBay6oceH9fJKBRHGP5D4bD4sWpmSwMn52FMfXEA");

/// How a tracked asset accrues value.
///
/// Exactly two schemes exist on the upstream protocol, so this is a closed enum
/// and every consumer matches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolKind {
    /// Native lamports land in the creator vault PDA of the bonding-curve program
    BondingCurve,
    /// Wrapped SOL lands in the native-mint token account of the AMM vault authority
    Amm,
}

impl PoolKind {
    /// Derive the accrual address for a creator under this scheme
    pub fn derive_accrual_address(&self, creator: &Pubkey) -> Pubkey {
        match self {
            PoolKind::BondingCurve => {
                Pubkey::find_program_address(
                    &[b"creator-vault", creator.as_ref()],
                    &BONDING_CURVE_PROGRAM,
                )
                .0
            }
            PoolKind::Amm => {
                let (authority, _) = Pubkey::find_program_address(
                    &[b"creator_vault", creator.as_ref()],
                    &AMM_PROGRAM,
                );
                get_associated_token_address(&authority, &spl_token::native_mint::id())
            }
        }
    }
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolKind::BondingCurve => write!(f, "bonding_curve"),
            PoolKind::Amm => write!(f, "amm"),
        }
    }
}

/// An asset whose accrual address is watched by the daemon.
///
/// Built once at startup from configuration and never removed while the
/// daemon runs. The discovery cursor lives in the cursor store, keyed by mint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedAsset {
    /// Asset identity
    pub mint: Pubkey,
    /// Owning identity the vault is derived from
    pub creator: Pubkey,
    /// Address whose balance grows when fees accrue
    pub accrual_address: Pubkey,
    pub pool_kind: PoolKind,
    /// Human readable label for logs
    pub label: String,
}

impl TrackedAsset {
    /// Create an asset with its accrual address derived from the pool kind
    pub fn new(mint: Pubkey, creator: Pubkey, pool_kind: PoolKind, label: impl Into<String>) -> Self {
        Self {
            mint,
            creator,
            accrual_address: pool_kind.derive_accrual_address(&creator),
            pool_kind,
            label: label.into(),
        }
    }

    /// Pin an explicit accrual address instead of the derived one
    pub fn with_accrual_address(mut self, accrual_address: Pubkey) -> Self {
        self.accrual_address = accrual_address;
        self
    }
}

impl fmt::Display for TrackedAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label, self.mint)
    }
}

/// One entry of an address's transaction listing, newest first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureInfo {
    pub signature: Signature,
    pub slot: u64,
    /// The transaction landed but failed on-chain
    pub failed: bool,
}

/// Token balance of one account inside a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBalanceRecord {
    /// Index into the transaction's full account key list
    pub account_index: usize,
    pub mint: Pubkey,
    /// Raw amount in base units
    pub amount: u64,
}

/// The parts of a confirmed transaction the extractor needs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionRecord {
    pub signature: Signature,
    pub slot: u64,
    /// Static keys followed by loaded writable and readonly addresses
    pub account_keys: Vec<Pubkey>,
    pub pre_balances: Vec<u64>,
    pub post_balances: Vec<u64>,
    pub pre_token_balances: Vec<TokenBalanceRecord>,
    pub post_token_balances: Vec<TokenBalanceRecord>,
}

impl TransactionRecord {
    /// Position of an address in the account key list
    pub fn account_index(&self, address: &Pubkey) -> Option<usize> {
        self.account_keys.iter().position(|key| key == address)
    }

    /// Whether an address appears anywhere in the account key list
    pub fn references(&self, address: &Pubkey) -> bool {
        self.account_index(address).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_addresses_differ_by_kind() {
        let creator = Pubkey::new_unique();
        let native = PoolKind::BondingCurve.derive_accrual_address(&creator);
        let wrapped = PoolKind::Amm.derive_accrual_address(&creator);
        assert_ne!(native, wrapped);
        assert_eq!(native, PoolKind::BondingCurve.derive_accrual_address(&creator));
    }

    #[test]
    fn test_explicit_accrual_address_wins() {
        let pinned = Pubkey::new_unique();
        let asset = TrackedAsset::new(
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            PoolKind::Amm,
            "TEST",
        )
        .with_accrual_address(pinned);
        assert_eq!(asset.accrual_address, pinned);
    }

    #[test]
    fn test_pool_kind_serde_names() {
        let kind: PoolKind = serde_json::from_str("\"bonding_curve\"").unwrap();
        assert_eq!(kind, PoolKind::BondingCurve);
        assert_eq!(serde_json::to_string(&PoolKind::Amm).unwrap(), "\"amm\"");
    }
}
