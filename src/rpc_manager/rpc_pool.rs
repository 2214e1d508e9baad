//! Resilient ledger access with an optional fallback endpoint
//!
//! Every outbound call runs as `circuit_breaker -> retry(timeout(call))` and
//! takes a token from the shared bucket before each attempt. The fallback is
//! only used while the breaker on the primary reports open; ordinary retryable
//! failures are retried against the primary.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use solana_sdk::{pubkey::Pubkey, signature::Signature};
use tracing::{debug, info, warn};

use super::{LedgerError, LedgerResult, LedgerRpc};
use crate::metrics::Metrics;
use crate::resilience::{retry_with_backoff, with_timeout, CircuitBreaker, RetryConfig, TokenBucket};
use crate::types::{SignatureInfo, TrackedAsset, TransactionRecord};

/// Tuning for the per-call wrapper
#[derive(Debug, Clone)]
pub struct LedgerPoolConfig {
    /// Timeout applied to each individual attempt
    pub call_timeout: Duration,
    pub retry: RetryConfig,
    /// Longest an attempt waits for a rate limiter token
    pub rate_limit_wait: Duration,
}

impl Default for LedgerPoolConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            rate_limit_wait: Duration::from_secs(10),
        }
    }
}

#[derive(Debug)]
pub struct ResilientLedger {
    primary: Arc<dyn LedgerRpc>,
    fallback: Option<Arc<dyn LedgerRpc>>,
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<TokenBucket>,
    config: LedgerPoolConfig,
    metrics: Arc<Metrics>,
    on_fallback: AtomicBool,
}

impl ResilientLedger {
    pub fn new(
        primary: Arc<dyn LedgerRpc>,
        breaker: Arc<CircuitBreaker>,
        limiter: Arc<TokenBucket>,
        config: LedgerPoolConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            primary,
            fallback: None,
            breaker,
            limiter,
            config,
            metrics,
            on_fallback: AtomicBool::new(false),
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn LedgerRpc>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn limiter(&self) -> &TokenBucket {
        &self.limiter
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Whether the last routed call went to the fallback endpoint
    pub fn is_on_fallback(&self) -> bool {
        self.on_fallback.load(Ordering::Relaxed)
    }

    /// retry(timeout(call)) against one endpoint, one token per attempt
    async fn attempt<T, F, Fut>(
        &self,
        operation: &str,
        rpc: &Arc<dyn LedgerRpc>,
        call: &F,
    ) -> LedgerResult<T>
    where
        F: Fn(Arc<dyn LedgerRpc>) -> Fut,
        Fut: Future<Output = LedgerResult<T>>,
    {
        retry_with_backoff(operation, &self.config.retry, || {
            let rpc = Arc::clone(rpc);
            async move {
                if let Err(err) = self.limiter.acquire(self.config.rate_limit_wait).await {
                    self.metrics.rate_limit_rejections_total.inc();
                    return Err(err);
                }
                self.metrics.ledger_attempts_total.inc();
                let timer = self.metrics.ledger_latency.start_timer();
                let result = with_timeout(operation, self.config.call_timeout, call(rpc)).await;
                timer.observe_duration();
                result
            }
        })
        .await
    }

    /// Route one logical call through the breaker, falling back while it is open
    pub async fn call<T, F, Fut>(&self, operation: &str, call: F) -> LedgerResult<T>
    where
        F: Fn(Arc<dyn LedgerRpc>) -> Fut,
        Fut: Future<Output = LedgerResult<T>>,
    {
        let result = match self.breaker.try_acquire() {
            Ok(()) => {
                if self.on_fallback.swap(false, Ordering::Relaxed) {
                    info!(endpoint = self.primary.endpoint(), "Routing back to primary endpoint");
                }
                let result = self.attempt(operation, &self.primary, &call).await;
                match &result {
                    Ok(_) => self.breaker.record_success(),
                    Err(err) if err.counts_against_breaker() => self.breaker.record_failure(),
                    // The endpoint answered; only the payload was unusable
                    Err(err) => debug!(operation, error = %err, "Data error left breaker untouched"),
                }
                result
            }
            Err(open) => {
                self.metrics.circuit_rejections_total.inc();
                match &self.fallback {
                    Some(fallback) => {
                        if !self.on_fallback.swap(true, Ordering::Relaxed) {
                            warn!(
                                primary = self.primary.endpoint(),
                                fallback = fallback.endpoint(),
                                error = %open,
                                "Circuit open on primary, switching to fallback endpoint"
                            );
                        }
                        self.metrics.fallback_calls_total.inc();
                        self.attempt(operation, fallback, &call).await
                    }
                    None => Err(open),
                }
            }
        };

        self.metrics
            .circuit_state
            .set(self.breaker.state().as_gauge());
        if result.is_err() {
            self.metrics.ledger_failures_total.inc();
        }
        result
    }

    pub async fn signatures_for_address(
        &self,
        address: Pubkey,
        until: Option<Signature>,
        limit: usize,
    ) -> LedgerResult<Vec<SignatureInfo>> {
        self.call("signatures_for_address", move |rpc| async move {
            rpc.signatures_for_address(&address, until, limit).await
        })
        .await
    }

    pub async fn transaction(&self, signature: Signature) -> LedgerResult<Option<TransactionRecord>> {
        self.call("transaction", move |rpc| async move { rpc.transaction(&signature).await })
            .await
    }

    pub async fn commit_accrual(&self, asset: &TrackedAsset, amount: u64) -> LedgerResult<Signature> {
        if amount == 0 {
            return Err(LedgerError::InvalidInput(format!(
                "refusing zero accrual commit for {}",
                asset
            )));
        }
        self.call("commit_accrual", |rpc| {
            let asset = asset.clone();
            async move { rpc.commit_accrual(&asset, amount).await }
        })
        .await
    }

    pub async fn declared_demand(&self, asset: &TrackedAsset) -> LedgerResult<u64> {
        self.call("declared_demand", |rpc| {
            let asset = asset.clone();
            async move { rpc.declared_demand(&asset).await }
        })
        .await
    }

    pub async fn collect_pool(&self, assets: &[TrackedAsset]) -> LedgerResult<u64> {
        self.call("collect_pool", |rpc| {
            let assets = assets.to_vec();
            async move { rpc.collect_pool(&assets).await }
        })
        .await
    }

    pub async fn pool_balance(&self) -> LedgerResult<u64> {
        self.call("pool_balance", |rpc| async move { rpc.pool_balance().await })
            .await
    }

    pub async fn execute_buyback(&self, asset: &TrackedAsset, amount: u64) -> LedgerResult<Signature> {
        self.call("execute_buyback", |rpc| {
            let asset = asset.clone();
            async move { rpc.execute_buyback(&asset, amount).await }
        })
        .await
    }

    pub async fn finalize_recipient(
        &self,
        asset: &TrackedAsset,
        consumed: bool,
    ) -> LedgerResult<Signature> {
        self.call("finalize_recipient", |rpc| {
            let asset = asset.clone();
            async move { rpc.finalize_recipient(&asset, consumed).await }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::{CircuitBreakerConfig, CircuitState};
    use crate::rpc_manager::SimulatedLedger;

    fn pool(primary: Arc<SimulatedLedger>, failure_threshold: u32) -> ResilientLedger {
        let breaker = Arc::new(CircuitBreaker::new(&CircuitBreakerConfig {
            failure_threshold,
            reset_timeout_ms: 60_000,
            half_open_success_threshold: 1,
        }));
        ResilientLedger::new(
            primary,
            breaker,
            Arc::new(TokenBucket::new(100.0, 100.0)),
            LedgerPoolConfig {
                call_timeout: Duration::from_secs(1),
                retry: RetryConfig {
                    max_attempts: 3,
                    base_delay_ms: 1,
                    max_delay_ms: 2,
                },
                rate_limit_wait: Duration::from_millis(100),
            },
            Arc::new(Metrics::new().unwrap()),
        )
    }

    fn transport() -> LedgerError {
        LedgerError::Transport {
            endpoint: "primary".to_string(),
            message: "connection reset".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_failure_stays_on_primary() {
        let primary = Arc::new(SimulatedLedger::new("primary"));
        primary.set_pool_balance(500);
        primary.fail_next(vec![transport(), transport()]);
        let fallback = Arc::new(SimulatedLedger::new("fallback"));
        let ledger = pool(primary.clone(), 1).with_fallback(fallback.clone());

        assert_eq!(ledger.pool_balance().await.unwrap(), 500);
        assert!(!ledger.is_on_fallback());
        assert_eq!(ledger.breaker().state(), CircuitState::Closed);
        assert_eq!(fallback.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_routes_to_fallback() {
        let primary = Arc::new(SimulatedLedger::new("primary"));
        primary.fail_next(vec![transport(), transport(), transport()]);
        let fallback = Arc::new(SimulatedLedger::new("fallback"));
        fallback.set_pool_balance(42);
        let ledger = pool(primary.clone(), 1).with_fallback(fallback.clone());

        let first = ledger.pool_balance().await;
        assert!(matches!(first, Err(LedgerError::RetriesExhausted { .. })));
        assert_eq!(ledger.breaker().state(), CircuitState::Open);

        assert_eq!(ledger.pool_balance().await.unwrap(), 42);
        assert!(ledger.is_on_fallback());
        assert_eq!(ledger.metrics().fallback_calls_total.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_without_fallback_refuses() {
        let primary = Arc::new(SimulatedLedger::new("primary"));
        primary.fail_next(vec![transport(), transport(), transport()]);
        let ledger = pool(primary.clone(), 1);

        let _ = ledger.pool_balance().await;
        let calls_before = primary.call_count();
        let refused = ledger.pool_balance().await;
        assert!(matches!(refused, Err(LedgerError::CircuitOpen { .. })));
        assert_eq!(primary.call_count(), calls_before);
    }

    #[tokio::test]
    async fn test_zero_commit_rejected_before_ledger() {
        let primary = Arc::new(SimulatedLedger::new("primary"));
        let ledger = pool(primary.clone(), 3);
        let asset = TrackedAsset::new(
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            crate::types::PoolKind::BondingCurve,
            "ZERO",
        );
        assert!(ledger.commit_accrual(&asset, 0).await.is_err());
        assert_eq!(primary.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_data_errors_leave_breaker_closed() {
        let primary = Arc::new(SimulatedLedger::new("primary"));
        primary.set_pool_balance(7);
        primary.fail_next(vec![
            LedgerError::InvalidInput("undecodable transaction".into()),
            LedgerError::InvalidInput("undecodable transaction".into()),
            LedgerError::NotFound("signature".into()),
        ]);
        let ledger = pool(primary.clone(), 2);

        for _ in 0..3 {
            assert!(ledger.pool_balance().await.is_err());
        }
        assert_eq!(ledger.breaker().state(), CircuitState::Closed);
        assert_eq!(ledger.metrics().ledger_failures_total.get(), 3);
        assert_eq!(ledger.pool_balance().await.unwrap(), 7);
    }
}
