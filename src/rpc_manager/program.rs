//! Contract with the on-chain accounting program
//!
//! Only the request shape is modeled here: PDA seeds, account lists and
//! anchor-style instruction data. What the program does with them is opaque.

use sha2::{Digest, Sha256};
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    system_program,
};

use super::{LedgerError, LedgerResult};
use crate::types::{PoolKind, TrackedAsset, AMM_PROGRAM, BONDING_CURVE_PROGRAM};

pub const STATE_SEED: &[u8] = b"dat_v3";
pub const AUTHORITY_SEED: &[u8] = b"auth_v3";
pub const TOKEN_STATS_SEED: &[u8] = b"token_stats_v1";

/// Byte offset of `pending_fees` inside a token stats account
/// (8 byte discriminator, 32 byte mint)
const PENDING_FEES_OFFSET: usize = 40;

/// First 8 bytes of `sha256("global:<name>")`
pub fn discriminator(name: &str) -> [u8; 8] {
    let digest = Sha256::digest(format!("global:{}", name).as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramInstruction {
    /// Record accrued fees against an asset's pending demand
    UpdatePendingFees { amount: u64 },
    /// Sweep one creator vault into the shared pool
    CollectFees,
    /// Spend from the pool on a buy-and-burn
    ExecuteBuy { amount: u64 },
    /// Close out a round for one asset
    FinalizeAllocatedCycle { consumed: bool },
}

impl ProgramInstruction {
    pub fn name(&self) -> &'static str {
        match self {
            ProgramInstruction::UpdatePendingFees { .. } => "update_pending_fees",
            ProgramInstruction::CollectFees => "collect_fees",
            ProgramInstruction::ExecuteBuy { .. } => "execute_buy",
            ProgramInstruction::FinalizeAllocatedCycle { .. } => "finalize_allocated_cycle",
        }
    }

    pub fn data(&self) -> Vec<u8> {
        let mut data = discriminator(self.name()).to_vec();
        match self {
            ProgramInstruction::UpdatePendingFees { amount }
            | ProgramInstruction::ExecuteBuy { amount } => {
                data.extend_from_slice(&amount.to_le_bytes())
            }
            ProgramInstruction::CollectFees => {}
            ProgramInstruction::FinalizeAllocatedCycle { consumed } => data.push(u8::from(*consumed)),
        }
        data
    }
}

/// PDAs and instruction builders for one deployment of the program
#[derive(Debug, Clone, Copy)]
pub struct ProgramClient {
    pub program_id: Pubkey,
}

impl ProgramClient {
    pub fn new(program_id: Pubkey) -> Self {
        Self { program_id }
    }

    pub fn state(&self) -> Pubkey {
        Pubkey::find_program_address(&[STATE_SEED], &self.program_id).0
    }

    /// PDA holding the shared pool
    pub fn authority(&self) -> Pubkey {
        Pubkey::find_program_address(&[AUTHORITY_SEED], &self.program_id).0
    }

    pub fn token_stats(&self, mint: &Pubkey) -> Pubkey {
        Pubkey::find_program_address(&[TOKEN_STATS_SEED, mint.as_ref()], &self.program_id).0
    }

    fn build(&self, ix: ProgramInstruction, accounts: Vec<AccountMeta>) -> Instruction {
        Instruction::new_with_bytes(self.program_id, &ix.data(), accounts)
    }

    pub fn update_pending_fees(&self, admin: &Pubkey, asset: &TrackedAsset, amount: u64) -> Instruction {
        self.build(
            ProgramInstruction::UpdatePendingFees { amount },
            vec![
                AccountMeta::new(self.state(), false),
                AccountMeta::new(self.token_stats(&asset.mint), false),
                AccountMeta::new_readonly(asset.mint, false),
                AccountMeta::new_readonly(*admin, true),
            ],
        )
    }

    pub fn collect_fees(&self, admin: &Pubkey, asset: &TrackedAsset) -> Instruction {
        let pool_program = match asset.pool_kind {
            PoolKind::BondingCurve => BONDING_CURVE_PROGRAM,
            PoolKind::Amm => AMM_PROGRAM,
        };
        self.build(
            ProgramInstruction::CollectFees,
            vec![
                AccountMeta::new(self.state(), false),
                AccountMeta::new(self.authority(), false),
                AccountMeta::new(self.token_stats(&asset.mint), false),
                AccountMeta::new(asset.accrual_address, false),
                AccountMeta::new_readonly(asset.creator, false),
                AccountMeta::new_readonly(pool_program, false),
                AccountMeta::new_readonly(spl_token::id(), false),
                AccountMeta::new_readonly(system_program::id(), false),
                AccountMeta::new_readonly(*admin, true),
            ],
        )
    }

    pub fn execute_buy(&self, admin: &Pubkey, asset: &TrackedAsset, amount: u64) -> Instruction {
        self.build(
            ProgramInstruction::ExecuteBuy { amount },
            vec![
                AccountMeta::new(self.state(), false),
                AccountMeta::new(self.authority(), false),
                AccountMeta::new(self.token_stats(&asset.mint), false),
                AccountMeta::new(asset.mint, false),
                AccountMeta::new_readonly(spl_token::id(), false),
                AccountMeta::new_readonly(system_program::id(), false),
                AccountMeta::new_readonly(*admin, true),
            ],
        )
    }

    pub fn finalize_allocated_cycle(&self, admin: &Pubkey, asset: &TrackedAsset, consumed: bool) -> Instruction {
        self.build(
            ProgramInstruction::FinalizeAllocatedCycle { consumed },
            vec![
                AccountMeta::new(self.state(), false),
                AccountMeta::new(self.token_stats(&asset.mint), false),
                AccountMeta::new_readonly(*admin, true),
            ],
        )
    }
}

/// Read `pending_fees` out of a token stats account
pub fn parse_pending_fees(data: &[u8]) -> LedgerResult<u64> {
    let bytes = data
        .get(PENDING_FEES_OFFSET..PENDING_FEES_OFFSET + 8)
        .ok_or_else(|| {
            LedgerError::InvalidInput(format!(
                "token stats account too short: {} bytes",
                data.len()
            ))
        })?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    Ok(u64::from_le_bytes(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discriminator_is_stable() {
        let a = discriminator("execute_buy");
        assert_eq!(a, discriminator("execute_buy"));
        assert_ne!(a, discriminator("collect_fees"));
    }

    #[test]
    fn test_instruction_data_layout() {
        let data = ProgramInstruction::UpdatePendingFees { amount: 1_000_000 }.data();
        assert_eq!(data.len(), 16);
        assert_eq!(&data[..8], &discriminator("update_pending_fees"));
        assert_eq!(&data[8..], &1_000_000u64.to_le_bytes());

        let data = ProgramInstruction::FinalizeAllocatedCycle { consumed: false }.data();
        assert_eq!(data.len(), 9);
        assert_eq!(data[8], 0);
    }

    #[test]
    fn test_token_stats_is_per_mint() {
        let client = ProgramClient::new(Pubkey::new_unique());
        assert_ne!(
            client.token_stats(&Pubkey::new_unique()),
            client.token_stats(&Pubkey::new_unique())
        );
    }

    #[test]
    fn test_parse_pending_fees() {
        let mut data = vec![0u8; 64];
        data[40..48].copy_from_slice(&777u64.to_le_bytes());
        assert_eq!(parse_pending_fees(&data).unwrap(), 777);
        assert!(parse_pending_fees(&data[..20]).is_err());
    }
}
