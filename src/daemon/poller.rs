//! Adaptive polling daemon
//!
//! Two independent tasks share the daemon: the poll loop discovers new
//! transactions per asset and accumulates accrual, the flush loop commits
//! pending accrual on its own timer. Cycles never overlap and flushes never
//! overlap; the accumulator is the only state both touch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn, Instrument};

use super::accumulator::AccrualAccumulator;
use super::cursor_store::CursorStore;
use super::interval::AdaptiveInterval;
use crate::config::DaemonConfig;
use crate::extractor::FeeExtractor;
use crate::metrics::Metrics;
use crate::observability::CycleId;
use crate::rpc_manager::{LedgerResult, ResilientLedger};
use crate::types::TrackedAsset;

/// Highest error rate a healthy daemon may report
pub const MAX_HEALTHY_ERROR_RATE: f64 = 0.3;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AssetPollOutcome {
    pub transactions: usize,
    pub captured: u64,
    pub lamports: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: String,
    pub assets_polled: usize,
    pub failed_assets: usize,
    pub captured: u64,
    pub lamports: u64,
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FlushReport {
    pub flushed_assets: usize,
    pub failed_assets: usize,
    pub lamports: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub healthy: bool,
    pub running: bool,
    pub cycles: u64,
    pub errors: u64,
    pub error_rate: f64,
    pub fees_captured: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub interval_ms: u64,
    pub pending_lamports: u64,
    pub circuit_state: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccrualEntry {
    pub mint: String,
    pub label: String,
    pub pending: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DaemonSummary {
    pub cycles: u64,
    pub errors: u64,
    pub fees_captured: u64,
    pub lamports_flushed: u64,
    pub pending_after_shutdown: u64,
}

pub struct FeeDaemon {
    assets: Vec<TrackedAsset>,
    ledger: Arc<ResilientLedger>,
    extractor: FeeExtractor,
    accumulator: AccrualAccumulator,
    cursors: CursorStore,
    interval: Mutex<AdaptiveInterval>,
    config: DaemonConfig,
    metrics: Arc<Metrics>,

    running: AtomicBool,
    cycles: AtomicU64,
    errors: AtomicU64,
    fees_captured: AtomicU64,
    lamports_flushed: AtomicU64,
    /// Last completed cycle, monotonic and wall clock
    last_cycle: Mutex<Option<(Instant, DateTime<Utc>)>>,
    started_at: Mutex<Option<Instant>>,

    cycle_lock: tokio::sync::Mutex<()>,
    flush_lock: tokio::sync::Mutex<()>,
    stop_tx: watch::Sender<bool>,
    workers: tokio::sync::Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl std::fmt::Debug for FeeDaemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeeDaemon")
            .field("assets", &self.assets.len())
            .field("running", &self.running.load(Ordering::Relaxed))
            .field("cycles", &self.cycles.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl FeeDaemon {
    pub fn new(
        assets: Vec<TrackedAsset>,
        ledger: Arc<ResilientLedger>,
        extractor: FeeExtractor,
        cursors: CursorStore,
        config: DaemonConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        let accumulator = AccrualAccumulator::new();
        let restored = cursors.take_restored_pending();
        if config.persist_pending_accruals {
            if !restored.is_empty() {
                info!(assets = restored.len(), "Restoring pending accruals from state file");
            }
            accumulator.restore(restored);
        } else if !restored.is_empty() {
            warn!(
                assets = restored.len(),
                "State file carries pending accruals but persistence is disabled, ignoring them"
            );
        }
        metrics.pending_accrual_lamports.set(accumulator.total() as i64);

        let interval = AdaptiveInterval::new(
            config.initial_interval(),
            config.min_interval(),
            config.max_interval(),
        );
        metrics.poll_interval_ms.set(interval.current().as_millis() as i64);
        let (stop_tx, _) = watch::channel(false);

        Self {
            assets,
            ledger,
            extractor,
            accumulator,
            cursors,
            interval: Mutex::new(interval),
            config,
            metrics,
            running: AtomicBool::new(false),
            cycles: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            fees_captured: AtomicU64::new(0),
            lamports_flushed: AtomicU64::new(0),
            last_cycle: Mutex::new(None),
            started_at: Mutex::new(None),
            cycle_lock: tokio::sync::Mutex::new(()),
            flush_lock: tokio::sync::Mutex::new(()),
            stop_tx,
            workers: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn assets(&self) -> &[TrackedAsset] {
        &self.assets
    }

    pub fn accumulator(&self) -> &AccrualAccumulator {
        &self.accumulator
    }

    pub fn cursors(&self) -> &CursorStore {
        &self.cursors
    }

    pub fn current_interval(&self) -> Duration {
        self.interval.lock().current()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Discover and accumulate new accrual for one asset
    pub async fn poll_asset(&self, asset: &TrackedAsset) -> LedgerResult<AssetPollOutcome> {
        let until = self.cursors.cursor(&asset.mint);
        let batch = self
            .ledger
            .signatures_for_address(asset.accrual_address, until, self.config.batch_limit)
            .await?;

        let mut outcome = AssetPollOutcome::default();
        let Some(newest) = batch.first().copied() else {
            return Ok(outcome);
        };
        if batch.len() >= self.config.batch_limit {
            warn!(
                asset = %asset.label,
                batch_limit = self.config.batch_limit,
                "Batch limit reached, older transactions may be picked up on a later cycle"
            );
        }

        // Listing is newest first; accumulate in chronological order
        for info in batch.iter().rev() {
            outcome.transactions += 1;
            if info.failed {
                debug!(asset = %asset.label, signature = %info.signature, "Skipping failed transaction");
                continue;
            }
            let amount = self.extractor.extract(&self.ledger, asset, info.signature).await;
            if amount == 0 {
                continue;
            }
            let pending = self.accumulator.add(asset.mint, amount);
            outcome.captured += 1;
            outcome.lamports = outcome.lamports.saturating_add(amount);
            self.fees_captured.fetch_add(1, Ordering::Relaxed);
            self.metrics.fees_captured_total.inc();
            self.metrics.lamports_accrued_total.inc_by(amount);
            info!(
                asset = %asset.label,
                signature = %info.signature,
                slot = info.slot,
                amount,
                pending,
                "Fee captured"
            );
        }

        if self.cursors.advance(asset.mint, newest.signature, newest.slot) {
            self.persist_state().await;
        }
        self.metrics
            .pending_accrual_lamports
            .set(self.accumulator.total() as i64);
        Ok(outcome)
    }

    /// Poll every asset once. One asset failing never stops the others.
    pub async fn run_cycle(&self) -> CycleReport {
        let _in_flight = self.cycle_lock.lock().await;
        let cycle_id = CycleId::new();

        async {
            let mut failed_assets = 0;
            let mut captured = 0;
            let mut lamports = 0u64;

            for asset in &self.assets {
                match self.poll_asset(asset).await {
                    Ok(outcome) => {
                        captured += outcome.captured;
                        lamports = lamports.saturating_add(outcome.lamports);
                    }
                    Err(e) => {
                        failed_assets += 1;
                        warn!(asset = %asset.label, error = %e, "Asset poll failed");
                    }
                }
            }

            self.cycles.fetch_add(1, Ordering::Relaxed);
            self.metrics.poll_cycles_total.inc();
            let changed = {
                let mut interval = self.interval.lock();
                if failed_assets > 0 {
                    interval.record_failure()
                } else {
                    interval.record_success()
                }
            };
            if failed_assets > 0 {
                self.errors.fetch_add(1, Ordering::Relaxed);
                self.metrics.poll_cycle_failures_total.inc();
            }
            if let Some(next) = changed {
                info!(interval_ms = next.as_millis() as u64, "Poll interval adjusted");
            }
            let interval_ms = self.current_interval().as_millis() as u64;
            self.metrics.poll_interval_ms.set(interval_ms as i64);
            *self.last_cycle.lock() = Some((Instant::now(), Utc::now()));

            debug!(captured, lamports, failed_assets, "Poll cycle complete");
            CycleReport {
                cycle_id: cycle_id.to_string(),
                assets_polled: self.assets.len(),
                failed_assets,
                captured,
                lamports,
                interval_ms,
            }
        }
        .instrument(cycle_id.span("poll"))
        .await
    }

    /// Commit every non-zero accumulator. Failures leave the amount pending.
    pub async fn flush(&self) -> FlushReport {
        let _in_flight = self.flush_lock.lock().await;
        let cycle_id = CycleId::new();

        async {
            let mut report = FlushReport::default();
            for asset in &self.assets {
                let amount = self.accumulator.get(&asset.mint);
                if amount == 0 {
                    continue;
                }
                match self.ledger.commit_accrual(asset, amount).await {
                    Ok(signature) => {
                        let remaining = self.accumulator.settle(&asset.mint, amount);
                        report.flushed_assets += 1;
                        report.lamports = report.lamports.saturating_add(amount);
                        self.lamports_flushed.fetch_add(amount, Ordering::Relaxed);
                        self.metrics.flushes_total.inc();
                        self.metrics.lamports_flushed_total.inc_by(amount);
                        info!(asset = %asset.label, amount, remaining, %signature, "Accrual flushed");
                    }
                    Err(e) => {
                        report.failed_assets += 1;
                        self.metrics.flush_failures_total.inc();
                        warn!(asset = %asset.label, amount, error = %e, "Flush failed, keeping accrual pending");
                    }
                }
            }
            self.metrics
                .pending_accrual_lamports
                .set(self.accumulator.total() as i64);
            if self.config.persist_pending_accruals && report.flushed_assets > 0 {
                self.persist_state().await;
            }
            report
        }
        .instrument(cycle_id.span("flush"))
        .await
    }

    /// Write cursors (and pending accruals when enabled); failures are logged
    pub async fn persist_state(&self) {
        let pending = self
            .config
            .persist_pending_accruals
            .then(|| self.accumulator.snapshot());
        if let Err(e) = self.cursors.persist(pending.as_ref()).await {
            error!(error = %e, "Failed to persist daemon state, continuing with in-memory cursors");
        }
    }

    pub fn pending_accruals(&self) -> Vec<AccrualEntry> {
        let snapshot: HashMap<Pubkey, u64> = self.accumulator.snapshot();
        self.assets
            .iter()
            .map(|asset| AccrualEntry {
                mint: asset.mint.to_string(),
                label: asset.label.clone(),
                pending: snapshot.get(&asset.mint).copied().unwrap_or(0),
            })
            .collect()
    }

    pub fn health(&self) -> HealthSnapshot {
        let running = self.is_running();
        let cycles = self.cycles.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);
        let error_rate = if cycles == 0 {
            0.0
        } else {
            errors as f64 / cycles as f64
        };
        let interval = self.current_interval();
        let last_cycle = *self.last_cycle.lock();
        let reference = last_cycle
            .map(|(at, _)| at)
            .or(*self.started_at.lock());
        let fresh = match reference {
            Some(at) => at.elapsed() <= interval * 2 + self.config.health_grace(),
            None => false,
        };

        HealthSnapshot {
            healthy: running && error_rate <= MAX_HEALTHY_ERROR_RATE && fresh,
            running,
            cycles,
            errors,
            error_rate,
            fees_captured: self.fees_captured.load(Ordering::Relaxed),
            last_cycle_at: last_cycle.map(|(_, wall)| wall),
            interval_ms: interval.as_millis() as u64,
            pending_lamports: self.accumulator.total(),
            circuit_state: format!("{:?}", self.ledger.breaker().state()),
        }
    }

    /// Spawn the poll loop and the flush loop
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            warn!("Daemon already running");
            return;
        }
        *self.started_at.lock() = Some(Instant::now());
        self.stop_tx.send_replace(false);
        info!(
            assets = self.assets.len(),
            interval_ms = self.current_interval().as_millis() as u64,
            flush_interval_ms = self.config.flush_interval_ms,
            "Fee daemon starting"
        );

        let poller = {
            let daemon = Arc::clone(self);
            let mut stop_rx = self.stop_tx.subscribe();
            tokio::spawn(async move {
                loop {
                    if *stop_rx.borrow() {
                        break;
                    }
                    daemon.run_cycle().await;
                    let wait = daemon.current_interval();
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = stop_rx.changed() => {}
                    }
                }
                debug!("Poll loop stopped");
            })
        };

        let flusher = {
            let daemon = Arc::clone(self);
            let mut stop_rx = self.stop_tx.subscribe();
            let period = self.config.flush_interval();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            daemon.flush().await;
                        }
                        _ = stop_rx.changed() => {}
                    }
                    if *stop_rx.borrow() {
                        break;
                    }
                }
                debug!("Flush loop stopped");
            })
        };

        let mut workers = self.workers.lock().await;
        workers.push(("poller", poller));
        workers.push(("flusher", flusher));
    }

    /// Stop scheduling cycles, wait briefly for the in-flight one, flush once
    /// more and persist state.
    pub async fn shutdown(&self) -> DaemonSummary {
        info!("Fee daemon shutting down");
        self.running.store(false, Ordering::Release);
        self.stop_tx.send_replace(true);

        let deadline = Instant::now() + self.config.shutdown_wait();
        let mut workers = self.workers.lock().await;
        for (name, mut handle) in workers.drain(..) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, &mut handle).await {
                Ok(Ok(())) => debug!(worker = name, "Worker stopped"),
                Ok(Err(e)) => error!(worker = name, error = %e, "Worker panicked"),
                Err(_) => {
                    warn!(worker = name, "Worker did not stop in time, aborting");
                    handle.abort();
                }
            }
        }
        drop(workers);

        let final_flush = self.flush().await;
        if final_flush.failed_assets > 0 {
            warn!(
                failed = final_flush.failed_assets,
                "Final flush incomplete, pending accrual remains uncommitted"
            );
        }
        self.persist_state().await;

        let summary = DaemonSummary {
            cycles: self.cycles.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            fees_captured: self.fees_captured.load(Ordering::Relaxed),
            lamports_flushed: self.lamports_flushed.load(Ordering::Relaxed),
            pending_after_shutdown: self.accumulator.total(),
        };
        info!(
            cycles = summary.cycles,
            errors = summary.errors,
            fees_captured = summary.fees_captured,
            lamports_flushed = summary.lamports_flushed,
            pending = summary.pending_after_shutdown,
            "Fee daemon stopped"
        );
        summary
    }
}
