//! Proportional allocation of a shared pool across recipients
//!
//! All arithmetic is integer lamports widened to `u128`, so allocations never
//! sum past the pool and rounding always goes down.

use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

use crate::rpc_manager::LedgerError;

#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("No recipient declared any demand")]
    ZeroDemand,

    #[error("Ledger call failed during distribution: {0}")]
    Ledger(#[from] LedgerError),
}

/// One recipient in one round
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocationRequest {
    #[serde(serialize_with = "crate::allocation::serialize_pubkey")]
    pub recipient: Pubkey,
    /// Accrued demand at round start
    pub demand: u64,
    pub allocation: u64,
    /// Allocation meets the minimum viable floor
    pub viable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaticPlan {
    pub collected: u64,
    pub total_demand: u64,
    /// Preliminary allocations of deferred recipients moved to viable ones
    pub redistributed: u64,
    pub requests: Vec<AllocationRequest>,
}

impl StaticPlan {
    pub fn allocated(&self) -> u64 {
        self.requests
            .iter()
            .filter(|r| r.viable)
            .map(|r| r.allocation)
            .sum()
    }

    pub fn viable(&self) -> impl Iterator<Item = &AllocationRequest> {
        self.requests.iter().filter(|r| r.viable)
    }

    pub fn deferred(&self) -> impl Iterator<Item = &AllocationRequest> {
        self.requests.iter().filter(|r| !r.viable)
    }
}

fn share(amount: u128, numerator: u128, denominator: u128) -> u64 {
    if denominator == 0 {
        return 0;
    }
    let value = amount * numerator / denominator;
    u64::try_from(value).unwrap_or(u64::MAX)
}

/// Divide a fixed pool proportionally to demand.
///
/// Recipients whose share falls below `min_viable` are deferred and their
/// share is spread over the viable ones in proportion to what those already
/// received. Deferred recipients keep their demand for the next round.
pub fn plan_static(
    collected: u64,
    demands: &[(Pubkey, u64)],
    min_viable: u64,
) -> Result<StaticPlan, AllocationError> {
    let total_demand: u128 = demands.iter().map(|(_, d)| *d as u128).sum();
    if total_demand == 0 {
        return Err(AllocationError::ZeroDemand);
    }

    let mut requests: Vec<AllocationRequest> = demands
        .iter()
        .map(|(recipient, demand)| {
            let allocation = share(collected as u128, *demand as u128, total_demand);
            AllocationRequest {
                recipient: *recipient,
                demand: *demand,
                allocation,
                viable: allocation >= min_viable && allocation > 0,
            }
        })
        .collect();

    let viable_total: u128 = requests.iter().filter(|r| r.viable).map(|r| r.allocation as u128).sum();
    let deferred_total: u128 = requests.iter().filter(|r| !r.viable).map(|r| r.allocation as u128).sum();

    let mut redistributed = 0;
    if viable_total > 0 && deferred_total > 0 {
        let pool = viable_total + deferred_total;
        for request in requests.iter_mut().filter(|r| r.viable) {
            request.allocation = share(request.allocation as u128, pool, viable_total);
        }
        redistributed = u64::try_from(deferred_total).unwrap_or(u64::MAX);
    }

    Ok(StaticPlan {
        collected,
        total_demand: u64::try_from(total_demand).unwrap_or(u64::MAX),
        redistributed,
        requests,
    })
}

/// Sequential allocation against a balance that drains as recipients are paid.
///
/// Recipients are served largest demand first. Each allocation is recomputed
/// from the balance actually left, so earlier over- or under-spending is
/// absorbed by the recipients that follow.
#[derive(Debug, Clone)]
pub struct DynamicAllocation {
    /// Largest demand last, so `pop` serves the largest first
    queue: Vec<(Pubkey, u64)>,
    remaining_demand: u128,
    reserve: u64,
    min_viable: u64,
}

impl DynamicAllocation {
    pub fn new(demands: &[(Pubkey, u64)], reserve: u64, min_viable: u64) -> Self {
        let mut queue: Vec<(Pubkey, u64)> = demands.iter().filter(|(_, d)| *d > 0).copied().collect();
        // ascending, ties broken by key so the order is deterministic
        queue.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)));
        let remaining_demand = queue.iter().map(|(_, d)| *d as u128).sum();
        Self {
            queue,
            remaining_demand,
            reserve,
            min_viable,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }

    /// Recipient that the next call to `next_allocation` will serve
    pub fn peek(&self) -> Option<(Pubkey, u64)> {
        self.queue.last().copied()
    }

    /// Allocate to the next recipient given the balance read just now.
    /// The recipient leaves the remaining-demand pool whether viable or not.
    pub fn next_allocation(&mut self, current_balance: u64) -> Option<AllocationRequest> {
        let (recipient, demand) = self.queue.pop()?;
        let available = current_balance.saturating_sub(self.reserve);
        let allocation = share(available as u128, demand as u128, self.remaining_demand);
        self.remaining_demand -= demand as u128;

        Some(AllocationRequest {
            recipient,
            demand,
            allocation,
            viable: allocation >= self.min_viable && allocation > 0,
        })
    }
}
