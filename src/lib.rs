//! Fee accrual daemon for creator-fee buyback programs on Solana
//!
//! The daemon watches the accrual address of every tracked asset, extracts the
//! creator fee each new transaction paid, accumulates it and commits it to the
//! accounting program on a timer. A separate distribution round collects the
//! shared pool and spends it proportionally to each asset's declared demand.

pub mod allocation;
pub mod config;
pub mod daemon;
pub mod endpoints;
pub mod extractor;
pub mod metrics;
pub mod observability;
pub mod resilience;
pub mod rpc_manager;
pub mod types;
pub mod wallet;

// Re-export commonly used types
pub use solana_sdk::{pubkey::Pubkey, signature::Signature};
