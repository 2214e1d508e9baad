//! Fee accrual daemon
//!
//! - `accumulator`: pending accrual per asset
//! - `cursor_store`: durable discovery cursors
//! - `interval`: adaptive poll interval
//! - `poller`: poll loop, flush loop, health and shutdown

pub mod accumulator;
pub mod cursor_store;
pub mod interval;
pub mod poller;

pub use accumulator::AccrualAccumulator;
pub use cursor_store::{CursorStore, PersistedState, PersistenceError, STATE_VERSION};
pub use interval::AdaptiveInterval;
pub use poller::{
    AccrualEntry, AssetPollOutcome, CycleReport, DaemonSummary, FeeDaemon, FlushReport,
    HealthSnapshot,
};
