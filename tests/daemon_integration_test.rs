//! Daemon end-to-end tests against the simulated ledger
//!
//! Discovery, accumulation, flushing and cursor durability across restarts.

#[cfg(test)]
mod daemon_integration_tests {
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use fee_daemon::config::DaemonConfig;
    use fee_daemon::daemon::{CursorStore, FeeDaemon};
    use fee_daemon::extractor::FeeExtractor;
    use fee_daemon::metrics::Metrics;
    use fee_daemon::resilience::{
        CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryConfig, TokenBucket,
    };
    use fee_daemon::rpc_manager::{LedgerError, LedgerPoolConfig, ResilientLedger, SimulatedLedger};
    use fee_daemon::types::{PoolKind, TrackedAsset};
    use solana_sdk::pubkey::Pubkey;

    fn ledger(sim: &Arc<SimulatedLedger>, metrics: &Arc<Metrics>) -> Arc<ResilientLedger> {
        Arc::new(ResilientLedger::new(
            sim.clone(),
            Arc::new(CircuitBreaker::new(&CircuitBreakerConfig::default())),
            Arc::new(TokenBucket::new(1_000.0, 1_000.0)),
            LedgerPoolConfig {
                call_timeout: Duration::from_secs(1),
                retry: RetryConfig {
                    max_attempts: 1,
                    base_delay_ms: 1,
                    max_delay_ms: 1,
                },
                rate_limit_wait: Duration::from_millis(10),
            },
            metrics.clone(),
        ))
    }

    fn assets() -> Vec<TrackedAsset> {
        vec![
            TrackedAsset::new(Pubkey::new_unique(), Pubkey::new_unique(), PoolKind::BondingCurve, "A"),
            TrackedAsset::new(Pubkey::new_unique(), Pubkey::new_unique(), PoolKind::Amm, "B"),
        ]
    }

    fn daemon(
        sim: &Arc<SimulatedLedger>,
        assets: &[TrackedAsset],
        state_file: &Path,
        config: DaemonConfig,
    ) -> Arc<FeeDaemon> {
        daemon_with_ledger(sim, assets, state_file, config).0
    }

    fn daemon_with_ledger(
        sim: &Arc<SimulatedLedger>,
        assets: &[TrackedAsset],
        state_file: &Path,
        config: DaemonConfig,
    ) -> (Arc<FeeDaemon>, Arc<ResilientLedger>) {
        let metrics = Arc::new(Metrics::new().unwrap());
        let config = DaemonConfig {
            state_file: state_file.to_path_buf(),
            ..config
        };
        let ledger = ledger(sim, &metrics);
        let daemon = Arc::new(FeeDaemon::new(
            assets.to_vec(),
            ledger.clone(),
            FeeExtractor::new(Pubkey::new_unique(), metrics.clone()),
            CursorStore::open(state_file, assets),
            config,
            metrics,
        ));
        (daemon, ledger)
    }

    #[tokio::test]
    async fn test_accrual_flows_from_discovery_to_commit() {
        let dir = tempfile::tempdir().unwrap();
        let sim = Arc::new(SimulatedLedger::new("sim"));
        let assets = assets();
        let a = &assets[0];
        sim.push_fee(a, 200_000);
        sim.push_fee(a, 300_000);
        sim.push_fee(a, 500_000);

        let daemon = daemon(&sim, &assets, &dir.path().join("state.json"), DaemonConfig::default());
        let report = daemon.run_cycle().await;
        assert_eq!(report.failed_assets, 0);
        assert_eq!(report.captured, 3);
        assert_eq!(daemon.accumulator().get(&a.mint), 1_000_000);
        assert_eq!(daemon.accumulator().get(&assets[1].mint), 0);

        let flush = daemon.flush().await;
        assert_eq!(flush.flushed_assets, 1);
        assert_eq!(flush.lamports, 1_000_000);
        assert_eq!(daemon.accumulator().get(&a.mint), 0);
        assert_eq!(sim.commits(), vec![(a.mint, 1_000_000)]);
        assert_eq!(sim.demand_of(&a.mint), 1_000_000);

        // nothing pending, nothing committed
        let flush = daemon.flush().await;
        assert_eq!(flush.flushed_assets, 0);
        assert_eq!(sim.commits().len(), 1);
    }

    #[tokio::test]
    async fn test_amm_asset_accrues_wrapped_balance() {
        let dir = tempfile::tempdir().unwrap();
        let sim = Arc::new(SimulatedLedger::new("sim"));
        let assets = assets();
        let b = &assets[1];
        sim.push_fee(b, 75_000);
        sim.push_fee(b, 25_000);

        let daemon = daemon(&sim, &assets, &dir.path().join("state.json"), DaemonConfig::default());
        daemon.run_cycle().await;
        assert_eq!(daemon.accumulator().get(&b.mint), 100_000);
    }

    #[tokio::test]
    async fn test_replaying_history_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let sim = Arc::new(SimulatedLedger::new("sim"));
        let assets = assets();
        for amount in [10_000, 20_000, 30_000] {
            sim.push_fee(&assets[0], amount);
            sim.push_fee(&assets[1], amount * 2);
        }

        let first = daemon(&sim, &assets, &dir.path().join("first.json"), DaemonConfig::default());
        first.run_cycle().await;
        let replay = daemon(&sim, &assets, &dir.path().join("replay.json"), DaemonConfig::default());
        replay.run_cycle().await;

        assert_eq!(first.accumulator().total(), 180_000);
        assert_eq!(replay.accumulator().total(), first.accumulator().total());
        for asset in &assets {
            assert_eq!(first.accumulator().get(&asset.mint), replay.accumulator().get(&asset.mint));
        }
    }

    #[tokio::test]
    async fn test_cursor_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("state.json");
        let sim = Arc::new(SimulatedLedger::new("sim"));
        let assets = assets();
        sim.push_fee(&assets[0], 40_000);

        let before = daemon(&sim, &assets, &state, DaemonConfig::default());
        before.run_cycle().await;
        let cursor = before.cursors().cursor(&assets[0].mint);
        assert!(cursor.is_some());
        drop(before);

        let snapshot = CursorStore::read_snapshot(&state).unwrap().unwrap();
        assert_eq!(snapshot.last_signatures.len(), 1);

        // restarted daemon resumes from the cursor and only sees new activity
        let after = daemon(&sim, &assets, &state, DaemonConfig::default());
        assert_eq!(after.cursors().cursor(&assets[0].mint), cursor);
        after.run_cycle().await;
        assert_eq!(after.accumulator().total(), 0);

        sim.push_fee(&assets[0], 5_000);
        after.run_cycle().await;
        assert_eq!(after.accumulator().get(&assets[0].mint), 5_000);
        assert_ne!(after.cursors().cursor(&assets[0].mint), cursor);
    }

    #[tokio::test]
    async fn test_failing_asset_does_not_block_others() {
        let dir = tempfile::tempdir().unwrap();
        let sim = Arc::new(SimulatedLedger::new("sim"));
        let assets = assets();
        sim.push_fee(&assets[1], 60_000);
        sim.fail_on(
            "signatures_for_address",
            vec![LedgerError::Fatal("listing rejected".to_string())],
        );

        let daemon = daemon(&sim, &assets, &dir.path().join("state.json"), DaemonConfig::default());
        let report = daemon.run_cycle().await;
        assert_eq!(report.failed_assets, 1);
        assert_eq!(daemon.accumulator().get(&assets[1].mint), 60_000);
        assert_eq!(daemon.health().errors, 1);
    }

    #[tokio::test]
    async fn test_undecodable_transactions_do_not_trip_breaker() {
        let dir = tempfile::tempdir().unwrap();
        let sim = Arc::new(SimulatedLedger::new("sim"));
        let assets = assets();
        for _ in 0..5 {
            sim.push_fee(&assets[0], 10_000);
        }
        sim.push_fee(&assets[1], 70_000);
        sim.fail_on(
            "transaction",
            (0..5)
                .map(|_| LedgerError::InvalidInput("transaction could not be decoded".to_string()))
                .collect(),
        );

        let (daemon, ledger) = daemon_with_ledger(
            &sim,
            &assets,
            &dir.path().join("state.json"),
            DaemonConfig::default(),
        );
        let report = daemon.run_cycle().await;
        assert_eq!(report.failed_assets, 0);
        assert_eq!(daemon.accumulator().get(&assets[0].mint), 0);
        assert_eq!(daemon.accumulator().get(&assets[1].mint), 70_000);
        assert_eq!(ledger.breaker().state(), CircuitState::Closed);

        let flush = daemon.flush().await;
        assert_eq!(flush.failed_assets, 0);
        assert_eq!(sim.commits(), vec![(assets[1].mint, 70_000)]);
    }

    #[tokio::test]
    async fn test_unwritable_state_keeps_polling_from_memory() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let sim = Arc::new(SimulatedLedger::new("sim"));
        let assets = assets();
        sim.push_fee(&assets[0], 10_000);

        let daemon = daemon(&sim, &assets, &blocker.join("state.json"), DaemonConfig::default());
        let report = daemon.run_cycle().await;
        assert_eq!(report.failed_assets, 0);
        assert_eq!(daemon.accumulator().get(&assets[0].mint), 10_000);
        let cursor = daemon.cursors().cursor(&assets[0].mint);
        assert!(cursor.is_some());
        assert!(!blocker.join("state.json").exists());

        // the in-memory cursor still guards against recounting
        let report = daemon.run_cycle().await;
        assert_eq!(report.failed_assets, 0);
        assert_eq!(report.captured, 0);
        assert_eq!(daemon.accumulator().get(&assets[0].mint), 10_000);
        assert_eq!(daemon.cursors().cursor(&assets[0].mint), cursor);
        assert_eq!(daemon.health().errors, 0);
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_accrual_pending() {
        let dir = tempfile::tempdir().unwrap();
        let sim = Arc::new(SimulatedLedger::new("sim"));
        let assets = assets();
        sim.push_fee(&assets[0], 90_000);

        let daemon = daemon(&sim, &assets, &dir.path().join("state.json"), DaemonConfig::default());
        daemon.run_cycle().await;
        sim.fail_on(
            "commit_accrual",
            vec![LedgerError::Unauthorized("admin mismatch".to_string())],
        );

        let flush = daemon.flush().await;
        assert_eq!(flush.failed_assets, 1);
        assert_eq!(daemon.accumulator().get(&assets[0].mint), 90_000);

        let flush = daemon.flush().await;
        assert_eq!(flush.lamports, 90_000);
        assert_eq!(daemon.accumulator().total(), 0);
    }

    #[tokio::test]
    async fn test_pending_accruals_survive_restart_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("state.json");
        let sim = Arc::new(SimulatedLedger::new("sim"));
        let assets = assets();
        sim.push_fee(&assets[0], 33_000);

        let config = DaemonConfig {
            persist_pending_accruals: true,
            ..DaemonConfig::default()
        };
        let before = daemon(&sim, &assets, &state, config.clone());
        before.run_cycle().await;
        drop(before);

        let after = daemon(&sim, &assets, &state, config);
        assert_eq!(after.accumulator().get(&assets[0].mint), 33_000);
        after.run_cycle().await;
        assert_eq!(after.accumulator().get(&assets[0].mint), 33_000);
    }

    #[tokio::test]
    async fn test_start_and_shutdown_flush_everything() {
        let dir = tempfile::tempdir().unwrap();
        let sim = Arc::new(SimulatedLedger::new("sim"));
        let assets = assets();
        sim.push_fee(&assets[0], 120_000);
        sim.push_fee(&assets[1], 80_000);

        let config = DaemonConfig {
            initial_interval_ms: 20,
            min_interval_ms: 10,
            max_interval_ms: 1_000,
            flush_interval_ms: 60_000,
            shutdown_wait_ms: 2_000,
            ..DaemonConfig::default()
        };
        let daemon = daemon(&sim, &assets, &dir.path().join("state.json"), config);
        daemon.start().await;
        assert!(daemon.is_running());

        tokio::time::sleep(Duration::from_millis(150)).await;
        let health = daemon.health();
        assert!(health.running);
        assert!(health.cycles >= 1);
        assert!(health.healthy);

        let summary = daemon.shutdown().await;
        assert!(!daemon.is_running());
        assert_eq!(summary.lamports_flushed, 200_000);
        assert_eq!(summary.pending_after_shutdown, 0);
        let committed: u64 = sim.commits().iter().map(|(_, amount)| amount).sum();
        assert_eq!(committed, 200_000);
        assert!(!daemon.health().healthy);
    }
}
