//! Accrual to distribution across two rounds
//!
//! The daemon commits demand, the orchestrator collects and spends the pool,
//! and a recipient deferred in one round is paid once its demand grows.

#[cfg(test)]
mod allocation_integration_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use fee_daemon::allocation::{AllocationOrchestrator, RecipientStatus};
    use fee_daemon::config::{AllocationConfig, DaemonConfig};
    use fee_daemon::daemon::{CursorStore, FeeDaemon};
    use fee_daemon::extractor::FeeExtractor;
    use fee_daemon::metrics::Metrics;
    use fee_daemon::resilience::{CircuitBreaker, CircuitBreakerConfig, RetryConfig, TokenBucket};
    use fee_daemon::rpc_manager::{LedgerPoolConfig, ResilientLedger, SimulatedLedger};
    use fee_daemon::types::{PoolKind, TrackedAsset};
    use solana_sdk::pubkey::Pubkey;

    struct World {
        sim: Arc<SimulatedLedger>,
        daemon: Arc<FeeDaemon>,
        orchestrator: AllocationOrchestrator,
        assets: Vec<TrackedAsset>,
        _dir: tempfile::TempDir,
    }

    fn world() -> World {
        let dir = tempfile::tempdir().unwrap();
        let metrics = Arc::new(Metrics::new().unwrap());
        let sim = Arc::new(SimulatedLedger::new("sim"));
        let ledger = Arc::new(ResilientLedger::new(
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
        ));
        let assets = vec![
            TrackedAsset::new(Pubkey::new_unique(), Pubkey::new_unique(), PoolKind::BondingCurve, "large"),
            TrackedAsset::new(Pubkey::new_unique(), Pubkey::new_unique(), PoolKind::Amm, "medium"),
            TrackedAsset::new(Pubkey::new_unique(), Pubkey::new_unique(), PoolKind::BondingCurve, "small"),
        ];
        let state_file = dir.path().join("state.json");
        let daemon = Arc::new(FeeDaemon::new(
            assets.clone(),
            ledger.clone(),
            FeeExtractor::new(Pubkey::new_unique(), metrics.clone()),
            CursorStore::open(&state_file, &assets),
            DaemonConfig {
                state_file,
                ..DaemonConfig::default()
            },
            metrics.clone(),
        ));
        let orchestrator = AllocationOrchestrator::new(
            ledger,
            AllocationConfig {
                min_viable_allocation: 100_000,
                reserve_lamports: 0,
            },
            metrics,
        );
        World {
            sim,
            daemon,
            orchestrator,
            assets,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_deferred_recipient_is_paid_in_a_later_round() {
        let w = world();
        let (large, medium, small) = (&w.assets[0], &w.assets[1], &w.assets[2]);
        w.sim.push_fee(large, 1_000_000);
        w.sim.push_fee(medium, 500_000);
        w.sim.push_fee(small, 20_000);

        w.daemon.run_cycle().await;
        w.daemon.flush().await;
        assert_eq!(w.sim.demand_of(&small.mint), 20_000);

        let first = w.orchestrator.run_round(&w.assets).await.unwrap();
        assert_eq!(first.collected, 1_520_000);
        assert_eq!(first.total_demand, 1_520_000);
        assert_eq!(first.funded(), 2);
        assert_eq!(first.deferred(), 1);
        assert_eq!(first.spent, 1_500_000);

        let plan = first.static_plan.as_ref().unwrap();
        assert_eq!(plan.viable().count(), 2);
        assert_eq!(plan.redistributed, 20_000);
        assert!(plan.allocated() <= first.collected);

        let small_outcome = first
            .recipients
            .iter()
            .find(|r| r.mint == small.mint.to_string())
            .unwrap();
        assert_eq!(small_outcome.status, RecipientStatus::Deferred);
        assert!(small_outcome.finalized);

        assert_eq!(w.sim.demand_of(&large.mint), 0);
        assert_eq!(w.sim.demand_of(&medium.mint), 0);
        assert_eq!(w.sim.demand_of(&small.mint), 20_000);
        assert_eq!(w.sim.pool_lamports(), 20_000);
        assert_eq!(w.sim.finalizations().len(), 3);

        // small keeps accruing; next round it clears the floor
        w.sim.push_fee(small, 200_000);
        w.daemon.run_cycle().await;
        w.daemon.flush().await;
        assert_eq!(w.sim.demand_of(&small.mint), 220_000);

        let second = w.orchestrator.run_round(&w.assets).await.unwrap();
        assert_eq!(second.collected, 200_000);
        assert_eq!(second.recipients.len(), 1);
        assert_eq!(second.funded(), 1);
        assert_eq!(second.spent, 220_000);
        assert_eq!(w.sim.demand_of(&small.mint), 0);
        assert_eq!(w.sim.pool_lamports(), 0);
    }

    #[tokio::test]
    async fn test_round_without_demand_spends_nothing() {
        let w = world();
        w.sim.set_pool_balance(5_000_000);

        let report = w.orchestrator.run_round(&w.assets).await.unwrap();
        assert!(report.recipients.is_empty());
        assert_eq!(report.spent, 0);
        assert!(w.sim.buybacks().is_empty());
        assert_eq!(w.sim.pool_lamports(), 5_000_000);
    }
}
