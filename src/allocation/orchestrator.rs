//! One distribution round against the ledger
//!
//! Read declared demand, collect the shared pool once, pay recipients
//! sequentially while re-reading the draining balance, then finalize every
//! recipient so deferred demand is explicitly carried into the next round.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use tracing::{info, warn, Instrument};

use super::engine::{plan_static, AllocationError, DynamicAllocation, StaticPlan};
use crate::config::AllocationConfig;
use crate::metrics::Metrics;
use crate::observability::CycleId;
use crate::rpc_manager::ResilientLedger;
use crate::types::TrackedAsset;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientStatus {
    /// Buyback executed and demand consumed
    Funded,
    /// Allocation below the floor; demand kept
    Deferred,
    /// Buyback or balance read failed; demand kept
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecipientOutcome {
    pub mint: String,
    pub label: String,
    pub demand: u64,
    pub allocation: u64,
    pub status: RecipientStatus,
    pub signature: Option<String>,
    pub finalized: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DistributionReport {
    pub cycle_id: String,
    pub collected: u64,
    pub total_demand: u64,
    pub spent: u64,
    /// What a fixed snapshot of the pool would have paid
    pub static_plan: Option<StaticPlan>,
    pub recipients: Vec<RecipientOutcome>,
}

impl DistributionReport {
    pub fn funded(&self) -> usize {
        self.recipients
            .iter()
            .filter(|r| r.status == RecipientStatus::Funded)
            .count()
    }

    pub fn deferred(&self) -> usize {
        self.recipients
            .iter()
            .filter(|r| r.status == RecipientStatus::Deferred)
            .count()
    }
}

#[derive(Debug)]
pub struct AllocationOrchestrator {
    ledger: Arc<ResilientLedger>,
    config: AllocationConfig,
    metrics: Arc<Metrics>,
}

impl AllocationOrchestrator {
    pub fn new(ledger: Arc<ResilientLedger>, config: AllocationConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            ledger,
            config,
            metrics,
        }
    }

    /// Declared demand per asset; assets whose read fails sit this round out
    async fn read_demands(&self, assets: &[TrackedAsset]) -> Vec<(TrackedAsset, u64)> {
        let reads = join_all(assets.iter().map(|asset| self.ledger.declared_demand(asset))).await;
        assets
            .iter()
            .zip(reads)
            .filter_map(|(asset, read)| match read {
                Ok(demand) => Some((asset.clone(), demand)),
                Err(e) => {
                    warn!(asset = %asset.label, error = %e, "Demand read failed, skipping asset this round");
                    None
                }
            })
            .collect()
    }

    pub async fn run_round(&self, assets: &[TrackedAsset]) -> Result<DistributionReport, AllocationError> {
        let cycle_id = CycleId::new();
        self.round(assets, &cycle_id)
            .instrument(cycle_id.span("distribution"))
            .await
    }

    async fn round(
        &self,
        assets: &[TrackedAsset],
        cycle_id: &CycleId,
    ) -> Result<DistributionReport, AllocationError> {
        self.metrics.distribution_rounds_total.inc();

        let demands: Vec<(TrackedAsset, u64)> = self
            .read_demands(assets)
            .await
            .into_iter()
            .filter(|(_, demand)| *demand > 0)
            .collect();
        let total_demand = demands.iter().fold(0u64, |acc, (_, d)| acc.saturating_add(*d));

        if demands.is_empty() {
            info!("No declared demand, nothing to distribute");
            return Ok(DistributionReport {
                cycle_id: cycle_id.to_string(),
                collected: 0,
                total_demand: 0,
                spent: 0,
                static_plan: None,
                recipients: Vec::new(),
            });
        }

        let participants: Vec<TrackedAsset> = demands.iter().map(|(a, _)| a.clone()).collect();
        let collected = self.ledger.collect_pool(&participants).await?;
        let keyed: Vec<(Pubkey, u64)> = demands.iter().map(|(a, d)| (a.mint, *d)).collect();
        let static_plan = plan_static(collected, &keyed, self.config.min_viable_allocation).ok();
        info!(
            collected,
            total_demand,
            recipients = demands.len(),
            planned = static_plan.as_ref().map(|p| p.allocated()).unwrap_or(0),
            "Starting distribution round"
        );

        let by_mint: HashMap<Pubkey, &TrackedAsset> =
            demands.iter().map(|(a, _)| (a.mint, a)).collect();
        let mut plan = DynamicAllocation::new(
            &keyed,
            self.config.reserve_lamports,
            self.config.min_viable_allocation,
        );

        let mut outcomes = Vec::with_capacity(demands.len());
        let mut spent = 0u64;

        while let Some((mint, demand)) = plan.peek() {
            let Some(asset) = by_mint.get(&mint).copied() else {
                plan.next_allocation(0);
                continue;
            };

            let balance = match self.ledger.pool_balance().await {
                Ok(balance) => balance,
                Err(e) => {
                    plan.next_allocation(0);
                    warn!(asset = %asset.label, error = %e, "Pool balance read failed, deferring");
                    outcomes.push((asset, outcome(asset, demand, 0, RecipientStatus::Failed, None, Some(e.to_string()))));
                    continue;
                }
            };
            let Some(request) = plan.next_allocation(balance) else {
                break;
            };

            if !request.viable {
                self.metrics.recipients_deferred_total.inc();
                info!(
                    asset = %asset.label,
                    demand,
                    allocation = request.allocation,
                    min_viable = self.config.min_viable_allocation,
                    "Allocation below minimum, deferring"
                );
                outcomes.push((asset, outcome(asset, demand, request.allocation, RecipientStatus::Deferred, None, None)));
                continue;
            }

            match self.ledger.execute_buyback(asset, request.allocation).await {
                Ok(signature) => {
                    spent = spent.saturating_add(request.allocation);
                    self.metrics.recipients_funded_total.inc();
                    info!(asset = %asset.label, allocation = request.allocation, %signature, "Buyback executed");
                    outcomes.push((
                        asset,
                        outcome(
                            asset,
                            demand,
                            request.allocation,
                            RecipientStatus::Funded,
                            Some(signature.to_string()),
                            None,
                        ),
                    ));
                }
                Err(e) => {
                    warn!(asset = %asset.label, allocation = request.allocation, error = %e, "Buyback failed, keeping demand");
                    outcomes.push((
                        asset,
                        outcome(
                            asset,
                            demand,
                            request.allocation,
                            RecipientStatus::Failed,
                            None,
                            Some(e.to_string()),
                        ),
                    ));
                }
            }
        }

        // Every participant is finalized, deferred ones with their demand kept
        for (asset, entry) in outcomes.iter_mut() {
            let consumed = entry.status == RecipientStatus::Funded;
            match self.ledger.finalize_recipient(asset, consumed).await {
                Ok(_) => entry.finalized = true,
                Err(e) => {
                    warn!(asset = %asset.label, consumed, error = %e, "Finalization failed");
                    if entry.error.is_none() {
                        entry.error = Some(e.to_string());
                    }
                }
            }
        }

        let report = DistributionReport {
            cycle_id: cycle_id.to_string(),
            collected,
            total_demand,
            spent,
            static_plan,
            recipients: outcomes.into_iter().map(|(_, entry)| entry).collect(),
        };
        info!(
            collected,
            spent,
            funded = report.funded(),
            deferred = report.deferred(),
            "Distribution round complete"
        );
        Ok(report)
    }
}

fn outcome(
    asset: &TrackedAsset,
    demand: u64,
    allocation: u64,
    status: RecipientStatus,
    signature: Option<String>,
    error: Option<String>,
) -> RecipientOutcome {
    RecipientOutcome {
        mint: asset.mint.to_string(),
        label: asset.label.clone(),
        demand,
        allocation,
        status,
        signature,
        finalized: false,
        error,
    }
}
