//! fee-daemon
//!
//! Entry point for the creator-fee accrual daemon.
//!
//! ## Commands
//!
//! - **run**: poll tracked assets, accumulate and flush accrual, serve the
//!   control surface until Ctrl-C
//! - **distribute**: run one allocation round and print the report
//! - **status**: print the persisted cursor snapshot

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use rand::Rng;
use solana_sdk::pubkey::Pubkey;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fee_daemon::allocation::AllocationOrchestrator;
use fee_daemon::config::{
    AllocationConfig, AssetConfig, Config, DaemonConfig, MonitoringConfig, RpcConfig, WalletConfig,
};
use fee_daemon::daemon::{CursorStore, FeeDaemon};
use fee_daemon::endpoints::{endpoint_server, ControlSurface};
use fee_daemon::extractor::FeeExtractor;
use fee_daemon::metrics::Metrics;
use fee_daemon::resilience::{CircuitBreaker, TokenBucket};
use fee_daemon::rpc_manager::{LedgerPoolConfig, ResilientLedger, SimulatedLedger, SolanaLedger};
use fee_daemon::types::{PoolKind, TrackedAsset};
use fee_daemon::wallet::WalletManager;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Run against an in-memory ledger with generated trading activity
    #[arg(long)]
    simulate: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Start the daemon and control surface until Ctrl-C
    Run,
    /// Run one distribution round and print the report
    Distribute,
    /// Print the persisted cursor snapshot
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.json_logs)?;

    info!("🚀 Starting fee-daemon v{}", env!("CARGO_PKG_VERSION"));
    let config = load_config(&args.config, args.simulate)?;

    match args.command {
        Command::Run => run(config, args.simulate).await,
        Command::Distribute => distribute(config, args.simulate).await,
        Command::Status => status(&config),
    }
}

/// Initialize logging subsystem
fn init_logging(verbose: bool, json: bool) -> Result<()> {
    let default_filter = if verbose {
        "fee_daemon=debug,info"
    } else {
        "fee_daemon=info,warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()?;
    }
    Ok(())
}

/// Load configuration; simulate mode falls back to a generated demo setup
fn load_config(path: &Path, simulate: bool) -> Result<Config> {
    if path.exists() {
        info!("📋 Loading configuration from: {}", path.display());
        return Config::from_file_with_env(path)
            .with_context(|| format!("Failed to load config from {}", path.display()));
    }
    if simulate {
        warn!("Config file '{}' not found, using simulated demo assets", path.display());
        let config = demo_config();
        config.validate()?;
        return Ok(config);
    }
    Err(anyhow!("Config file '{}' not found", path.display()))
}

fn demo_config() -> Config {
    let assets = ["alpha", "beta", "gamma"]
        .iter()
        .enumerate()
        .map(|(i, label)| AssetConfig {
            mint: Pubkey::new_unique().to_string(),
            creator: Pubkey::new_unique().to_string(),
            pool_kind: if i % 2 == 0 { PoolKind::BondingCurve } else { PoolKind::Amm },
            label: label.to_string(),
            accrual_address: None,
        })
        .collect();

    Config {
        rpc: RpcConfig {
            primary_url: "simulated".to_string(),
            fallback_url: None,
            timeout_ms: 5_000,
            commitment: "confirmed".to_string(),
        },
        retry: Default::default(),
        circuit_breaker: Default::default(),
        rate_limiter: Default::default(),
        daemon: DaemonConfig {
            initial_interval_ms: 5_000,
            min_interval_ms: 1_000,
            max_interval_ms: 60_000,
            flush_interval_ms: 15_000,
            state_file: PathBuf::from(".daemon-state.simulated.json"),
            ..DaemonConfig::default()
        },
        allocation: AllocationConfig {
            min_viable_allocation: 100_000,
            reserve_lamports: 0,
        },
        program_id: Pubkey::new_unique().to_string(),
        wallet: WalletConfig::default(),
        monitoring: MonitoringConfig::default(),
        assets,
    }
}

/// Build the resilient ledger; in simulate mode also hand back the in-memory ledger
fn build_ledger(
    config: &Config,
    metrics: &Arc<Metrics>,
    simulate: bool,
) -> Result<(Arc<ResilientLedger>, Option<Arc<SimulatedLedger>>)> {
    let breaker = Arc::new(CircuitBreaker::new(&config.circuit_breaker));
    let limiter = Arc::new(TokenBucket::from_config(&config.rate_limiter));
    let pool_config = LedgerPoolConfig {
        call_timeout: Duration::from_millis(config.rpc.timeout_ms),
        retry: config.retry.clone(),
        rate_limit_wait: Duration::from_millis(config.rate_limiter.max_wait_ms),
    };

    if simulate {
        let sim = Arc::new(SimulatedLedger::new("simulated"));
        let ledger = ResilientLedger::new(sim.clone(), breaker, limiter, pool_config, metrics.clone());
        return Ok((Arc::new(ledger), Some(sim)));
    }

    let keypair_path = config
        .wallet
        .keypair_path
        .as_ref()
        .ok_or_else(|| anyhow!("wallet.keypair_path is required outside simulate mode"))?;
    info!("🔑 Initializing wallet from: {}", keypair_path.display());
    let wallet = WalletManager::from_file(keypair_path).context("Failed to load wallet")?;
    info!("💼 Wallet address: {}", wallet.pubkey());

    let timeout = Duration::from_millis(config.rpc.timeout_ms);
    let commitment = config.commitment()?;
    let program_id = config.program_id()?;

    info!("🌐 Primary RPC endpoint: {}", config.rpc.primary_url);
    let primary = Arc::new(SolanaLedger::new(
        &config.rpc.primary_url,
        timeout,
        commitment,
        program_id,
        wallet.keypair_arc(),
    ));
    let mut ledger = ResilientLedger::new(primary, breaker, limiter, pool_config, metrics.clone());
    if let Some(url) = &config.rpc.fallback_url {
        info!("🌐 Fallback RPC endpoint: {}", url);
        ledger = ledger.with_fallback(Arc::new(SolanaLedger::new(
            url,
            timeout,
            commitment,
            program_id,
            wallet.keypair_arc(),
        )));
    }
    Ok((Arc::new(ledger), None))
}

async fn run(config: Config, simulate: bool) -> Result<()> {
    let metrics = Arc::new(Metrics::new()?);
    let assets = config.tracked_assets()?;
    let program_id = config.program_id()?;
    let (ledger, sim) = build_ledger(&config, &metrics, simulate)?;

    for asset in &assets {
        info!(asset = %asset, accrual_address = %asset.accrual_address, "Tracking asset");
    }

    let cursors = CursorStore::open(config.daemon.state_file.clone(), &assets);
    let daemon = Arc::new(FeeDaemon::new(
        assets.clone(),
        ledger,
        FeeExtractor::new(program_id, metrics.clone()),
        cursors,
        config.daemon.clone(),
        metrics.clone(),
    ));

    let (stop_tx, stop_rx) = watch::channel(false);
    let mut background = Vec::new();

    if config.monitoring.control_port != 0 {
        let surface = ControlSurface::new(daemon.clone(), metrics.clone());
        let (addr, handle) = endpoint_server(
            &config.monitoring.bind_host,
            config.monitoring.control_port,
            surface,
            stop_rx.clone(),
        )
        .await?;
        info!("📊 Control surface on http://{}", addr);
        background.push(handle);
    }

    if let Some(sim) = sim {
        background.push(spawn_simulated_activity(
            sim,
            assets,
            config.daemon.initial_interval(),
            stop_rx.clone(),
        ));
    }

    daemon.start().await;
    info!("✅ All components initialized successfully");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("🛑 Received shutdown signal");

    let summary = daemon.shutdown().await;
    stop_tx.send_replace(true);
    for handle in background {
        if tokio::time::timeout(Duration::from_secs(2), handle).await.is_err() {
            debug!("Background task did not stop in time");
        }
    }

    info!(
        cycles = summary.cycles,
        lamports_flushed = summary.lamports_flushed,
        pending = summary.pending_after_shutdown,
        "👋 Shutdown complete"
    );
    Ok(())
}

fn spawn_simulated_activity(
    sim: Arc<SimulatedLedger>,
    assets: Vec<TrackedAsset>,
    period: Duration,
    mut stop: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    sim.simulate_activity(&assets);
                }
                _ = stop.changed() => break,
            }
        }
    })
}

async fn distribute(config: Config, simulate: bool) -> Result<()> {
    let metrics = Arc::new(Metrics::new()?);
    let assets = config.tracked_assets()?;
    let (ledger, sim) = build_ledger(&config, &metrics, simulate)?;

    if let Some(sim) = sim {
        seed_simulated_round(&sim, &assets);
    }

    let orchestrator = AllocationOrchestrator::new(ledger, config.allocation.clone(), metrics);
    let report = orchestrator.run_round(&assets).await?;
    info!(
        collected = report.collected,
        spent = report.spent,
        funded = report.funded(),
        deferred = report.deferred(),
        "Distribution round finished"
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Give every simulated asset some uncollected fees and a matching demand
fn seed_simulated_round(sim: &SimulatedLedger, assets: &[TrackedAsset]) {
    let mut rng = rand::thread_rng();
    for asset in assets {
        let fee = rng.gen_range(10_000..50_000_000);
        sim.push_fee(asset, fee);
        sim.set_demand(asset.mint, fee);
    }
}

fn status(config: &Config) -> Result<()> {
    let path = &config.daemon.state_file;
    match CursorStore::read_snapshot(path)? {
        Some(snapshot) => println!("{}", serde_json::to_string_pretty(&snapshot)?),
        None => println!("No state file at {}", path.display()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_config_is_valid() {
        let config = demo_config();
        config.validate().unwrap();
        assert_eq!(config.tracked_assets().unwrap().len(), 3);
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let args = Args::try_parse_from(["fee-daemon", "--simulate", "--json-logs", "distribute"]).unwrap();
        assert!(args.simulate);
        assert!(args.json_logs);
        assert_eq!(args.command, Command::Distribute);

        let args = Args::try_parse_from(["fee-daemon", "-c", "other.toml", "status"]).unwrap();
        assert_eq!(args.config, PathBuf::from("other.toml"));
        assert_eq!(args.command, Command::Status);

        assert!(Args::try_parse_from(["fee-daemon"]).is_err());
    }

    #[tokio::test]
    async fn test_simulated_ledger_builds_without_wallet() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let (ledger, sim) = build_ledger(&demo_config(), &metrics, true).unwrap();
        assert!(sim.is_some());
        assert!(!ledger.is_on_fallback());
    }
}
