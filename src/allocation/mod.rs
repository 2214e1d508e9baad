//! Proportional allocation of the collected pool
//!
//! - `engine`: static and dynamic allocation math
//! - `orchestrator`: one distribution round against the ledger

pub mod engine;
pub mod orchestrator;

pub use engine::{plan_static, AllocationError, AllocationRequest, DynamicAllocation, StaticPlan};
pub use orchestrator::{AllocationOrchestrator, DistributionReport, RecipientOutcome, RecipientStatus};

use serde::Serializer;
use solana_sdk::pubkey::Pubkey;

pub(crate) fn serialize_pubkey<S: Serializer>(key: &Pubkey, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(key)
}
