//! Configuration module for the fee daemon
//!
//! Loads a TOML file, applies `.env` and `FEE_DAEMON_*` environment overrides,
//! and validates the result before anything is wired up.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::resilience::{CircuitBreakerConfig, RateLimiterConfig, RetryConfig};
use crate::types::{PoolKind, TrackedAsset};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub rpc: RpcConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    #[serde(default)]
    pub rate_limiter: RateLimiterConfig,

    #[serde(default)]
    pub daemon: DaemonConfig,

    #[serde(default)]
    pub allocation: AllocationConfig,

    /// Accounting program the daemon commits to
    pub program_id: String,

    #[serde(default)]
    pub wallet: WalletConfig,

    #[serde(default)]
    pub monitoring: MonitoringConfig,

    #[serde(default)]
    pub assets: Vec<AssetConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    pub primary_url: String,

    /// Only used while the circuit breaker on the primary is open
    #[serde(default)]
    pub fallback_url: Option<String>,

    /// Per-attempt timeout in milliseconds
    #[serde(default = "default_rpc_timeout_ms")]
    pub timeout_ms: u64,

    /// processed | confirmed | finalized
    #[serde(default = "default_commitment")]
    pub commitment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,

    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,

    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,

    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Most signatures fetched per asset per cycle
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,

    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    /// Longest shutdown waits for an in-flight cycle
    #[serde(default = "default_shutdown_wait_ms")]
    pub shutdown_wait_ms: u64,

    /// Slack added to twice the poll interval before a stale cycle is unhealthy
    #[serde(default = "default_health_grace_ms")]
    pub health_grace_ms: u64,

    /// Write unflushed accruals into the state file alongside the cursors
    #[serde(default)]
    pub persist_pending_accruals: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationConfig {
    /// Allocations below this many lamports are deferred
    #[serde(default = "default_min_viable_allocation")]
    pub min_viable_allocation: u64,

    /// Lamports always left in the pool (rent and fees)
    #[serde(default = "default_reserve_lamports")]
    pub reserve_lamports: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Path to keypair file
    #[serde(default)]
    pub keypair_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Interface the control surface binds; `/flush` is unauthenticated
    #[serde(default = "default_bind_host")]
    pub bind_host: String,

    /// Control surface port; 0 disables it
    #[serde(default = "default_control_port")]
    pub control_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetConfig {
    pub mint: String,
    pub creator: String,
    pub pool_kind: PoolKind,
    pub label: String,
    /// Overrides the derived accrual address
    #[serde(default)]
    pub accrual_address: Option<String>,
}

// Default value functions
fn default_rpc_timeout_ms() -> u64 { 30_000 }
fn default_commitment() -> String { "confirmed".to_string() }
fn default_initial_interval_ms() -> u64 { 30_000 }
fn default_min_interval_ms() -> u64 { 5_000 }
fn default_max_interval_ms() -> u64 { 300_000 }
fn default_flush_interval_ms() -> u64 { 60_000 }
fn default_batch_limit() -> usize { 50 }
fn default_state_file() -> PathBuf { PathBuf::from(".daemon-state.json") }
fn default_shutdown_wait_ms() -> u64 { 10_000 }
fn default_health_grace_ms() -> u64 { 30_000 }
fn default_min_viable_allocation() -> u64 { 10_000_000 }
fn default_reserve_lamports() -> u64 { 5_000_000 }
fn default_control_port() -> u16 { 9090 }
fn default_bind_host() -> String { "127.0.0.1".to_string() }

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: default_initial_interval_ms(),
            min_interval_ms: default_min_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
            flush_interval_ms: default_flush_interval_ms(),
            batch_limit: default_batch_limit(),
            state_file: default_state_file(),
            shutdown_wait_ms: default_shutdown_wait_ms(),
            health_grace_ms: default_health_grace_ms(),
            persist_pending_accruals: false,
        }
    }
}

impl DaemonConfig {
    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn shutdown_wait(&self) -> Duration {
        Duration::from_millis(self.shutdown_wait_ms)
    }

    pub fn health_grace(&self) -> Duration {
        Duration::from_millis(self.health_grace_ms)
    }
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            min_viable_allocation: default_min_viable_allocation(),
            reserve_lamports: default_reserve_lamports(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            bind_host: default_bind_host(),
            control_port: default_control_port(),
        }
    }
}

fn parse_pubkey(field: &str, value: &str) -> Result<Pubkey> {
    Pubkey::from_str(value).map_err(|e| anyhow!("Invalid {} '{}': {}", field, value, e))
}

impl AssetConfig {
    pub fn to_tracked_asset(&self) -> Result<TrackedAsset> {
        let mint = parse_pubkey("mint", &self.mint)?;
        let creator = parse_pubkey("creator", &self.creator)?;
        let asset = TrackedAsset::new(mint, creator, self.pool_kind, self.label.clone());
        match &self.accrual_address {
            Some(address) => Ok(asset.with_accrual_address(parse_pubkey("accrual_address", address)?)),
            None => Ok(asset),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration with `.env` and environment variable overrides, then validate
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::from_file(path)?;
        config.from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `FEE_DAEMON_*` overrides
    pub fn from_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("FEE_DAEMON_RPC_URL") {
            self.rpc.primary_url = url;
        }

        if let Ok(url) = std::env::var("FEE_DAEMON_FALLBACK_RPC_URL") {
            self.rpc.fallback_url = if url.is_empty() { None } else { Some(url) };
        }

        if let Ok(path) = std::env::var("FEE_DAEMON_KEYPAIR_PATH") {
            self.wallet.keypair_path = Some(PathBuf::from(path));
        }

        if let Ok(path) = std::env::var("FEE_DAEMON_STATE_FILE") {
            self.daemon.state_file = PathBuf::from(path);
        }

        if let Ok(program_id) = std::env::var("FEE_DAEMON_PROGRAM_ID") {
            self.program_id = program_id;
        }

        if let Ok(host) = std::env::var("FEE_DAEMON_CONTROL_HOST") {
            self.monitoring.bind_host = host;
        }

        if let Ok(port) = std::env::var("FEE_DAEMON_CONTROL_PORT") {
            self.monitoring.control_port = port
                .parse()
                .map_err(|e| anyhow!("Invalid FEE_DAEMON_CONTROL_PORT: {}", e))?;
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.rpc.primary_url.is_empty() {
            return Err(anyhow!("rpc.primary_url must not be empty"));
        }
        if self.rpc.timeout_ms == 0 {
            return Err(anyhow!("rpc.timeout_ms must be > 0"));
        }
        self.commitment()?;
        self.program_id()?;

        if self.retry.max_attempts == 0 {
            return Err(anyhow!("retry.max_attempts must be > 0"));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(anyhow!("retry.base_delay_ms must be <= retry.max_delay_ms"));
        }

        if self.circuit_breaker.failure_threshold == 0 {
            return Err(anyhow!("circuit_breaker.failure_threshold must be > 0"));
        }
        if self.circuit_breaker.half_open_success_threshold == 0 {
            return Err(anyhow!("circuit_breaker.half_open_success_threshold must be > 0"));
        }

        if self.rate_limiter.capacity < 1.0 {
            return Err(anyhow!("rate_limiter.capacity must be >= 1"));
        }
        if self.rate_limiter.refill_per_second <= 0.0 {
            return Err(anyhow!("rate_limiter.refill_per_second must be > 0"));
        }

        let daemon = &self.daemon;
        if daemon.min_interval_ms == 0 {
            return Err(anyhow!("daemon.min_interval_ms must be > 0"));
        }
        if daemon.min_interval_ms > daemon.max_interval_ms {
            return Err(anyhow!("daemon.min_interval_ms must be <= daemon.max_interval_ms"));
        }
        if daemon.initial_interval_ms < daemon.min_interval_ms
            || daemon.initial_interval_ms > daemon.max_interval_ms
        {
            return Err(anyhow!(
                "daemon.initial_interval_ms must be within [min_interval_ms, max_interval_ms]"
            ));
        }
        if daemon.flush_interval_ms == 0 {
            return Err(anyhow!("daemon.flush_interval_ms must be > 0"));
        }
        if daemon.batch_limit == 0 {
            return Err(anyhow!("daemon.batch_limit must be > 0"));
        }

        if self.monitoring.control_port != 0 && self.monitoring.bind_host.is_empty() {
            return Err(anyhow!("monitoring.bind_host must not be empty"));
        }

        if self.assets.is_empty() {
            return Err(anyhow!("at least one asset must be configured"));
        }
        let assets = self.tracked_assets()?;
        let mut mints: Vec<_> = assets.iter().map(|a| a.mint).collect();
        mints.sort();
        mints.dedup();
        if mints.len() != assets.len() {
            return Err(anyhow!("asset mints must be unique"));
        }

        Ok(())
    }

    pub fn program_id(&self) -> Result<Pubkey> {
        parse_pubkey("program_id", &self.program_id)
    }

    pub fn commitment(&self) -> Result<CommitmentConfig> {
        match self.rpc.commitment.as_str() {
            "processed" => Ok(CommitmentConfig::processed()),
            "confirmed" => Ok(CommitmentConfig::confirmed()),
            "finalized" => Ok(CommitmentConfig::finalized()),
            other => Err(anyhow!("Invalid rpc.commitment '{}'", other)),
        }
    }

    pub fn tracked_assets(&self) -> Result<Vec<TrackedAsset>> {
        self.assets.iter().map(AssetConfig::to_tracked_asset).collect()
    }
}
