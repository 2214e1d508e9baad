//! Per-asset pending accrual counters
//!
//! Polling only adds. A flush reads the amount, commits it, and then settles
//! exactly the committed amount, so anything added while the commit was in
//! flight stays pending for the next flush.

use dashmap::DashMap;
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct AccrualAccumulator {
    pending: DashMap<Pubkey, u64>,
}

impl AccrualAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add accrued lamports; returns the new pending total for the mint
    pub fn add(&self, mint: Pubkey, amount: u64) -> u64 {
        let mut entry = self.pending.entry(mint).or_insert(0);
        *entry = entry.saturating_add(amount);
        *entry
    }

    pub fn get(&self, mint: &Pubkey) -> u64 {
        self.pending.get(mint).map(|v| *v).unwrap_or(0)
    }

    /// Remove a confirmed flushed amount from the pending total
    pub fn settle(&self, mint: &Pubkey, flushed: u64) -> u64 {
        match self.pending.get_mut(mint) {
            Some(mut entry) => {
                *entry = entry.saturating_sub(flushed);
                *entry
            }
            None => 0,
        }
    }

    /// Non-zero pending totals
    pub fn snapshot(&self) -> HashMap<Pubkey, u64> {
        self.pending
            .iter()
            .filter(|entry| *entry.value() > 0)
            .map(|entry| (*entry.key(), *entry.value()))
            .collect()
    }

    pub fn total(&self) -> u64 {
        self.pending
            .iter()
            .fold(0u64, |acc, entry| acc.saturating_add(*entry.value()))
    }

    /// Seed pending totals restored from the state file
    pub fn restore(&self, pending: HashMap<Pubkey, u64>) {
        for (mint, amount) in pending {
            self.add(mint, amount);
        }
    }
}
