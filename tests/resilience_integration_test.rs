//! Resilience composition at the ledger boundary
//!
//! Breaker, retry, timeout and the token bucket wired the way the daemon uses
//! them, with paused time so cooldowns and backoff run instantly.

#[cfg(test)]
mod resilience_integration_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use fee_daemon::metrics::Metrics;
    use fee_daemon::resilience::{
        CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryConfig, TokenBucket,
    };
    use fee_daemon::rpc_manager::{LedgerError, LedgerPoolConfig, ResilientLedger, SimulatedLedger};

    fn transport() -> LedgerError {
        LedgerError::Transport {
            endpoint: "primary".to_string(),
            message: "connection reset".to_string(),
        }
    }

    fn pool(
        primary: &Arc<SimulatedLedger>,
        bucket: TokenBucket,
        max_attempts: u32,
        call_timeout: Duration,
    ) -> ResilientLedger {
        ResilientLedger::new(
            primary.clone(),
            Arc::new(CircuitBreaker::new(&CircuitBreakerConfig {
                failure_threshold: 3,
                reset_timeout_ms: 30_000,
                half_open_success_threshold: 2,
            })),
            Arc::new(bucket),
            LedgerPoolConfig {
                call_timeout,
                retry: RetryConfig {
                    max_attempts,
                    base_delay_ms: 100,
                    max_delay_ms: 1_000,
                },
                rate_limit_wait: Duration::from_millis(200),
            },
            Arc::new(Metrics::new().unwrap()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_routes_to_fallback_and_recovers() {
        let primary = Arc::new(SimulatedLedger::new("primary"));
        let fallback = Arc::new(SimulatedLedger::new("fallback"));
        fallback.set_pool_balance(7);
        primary.set_pool_balance(11);
        primary.fail_next(vec![transport(), transport(), transport()]);

        let ledger = pool(&primary, TokenBucket::new(100.0, 100.0), 1, Duration::from_secs(5))
            .with_fallback(fallback.clone());

        for _ in 0..3 {
            assert!(ledger.pool_balance().await.is_err());
        }
        assert_eq!(ledger.breaker().state(), CircuitState::Open);

        // open: primary is not touched, fallback answers
        assert_eq!(ledger.pool_balance().await.unwrap(), 7);
        assert!(ledger.is_on_fallback());
        assert_eq!(primary.call_count(), 3);
        assert_eq!(ledger.metrics().fallback_calls_total.get(), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(ledger.pool_balance().await.unwrap(), 11);
        assert_eq!(ledger.breaker().state(), CircuitState::HalfOpen);
        assert!(!ledger.is_on_fallback());
        assert_eq!(ledger.pool_balance().await.unwrap(), 11);
        assert_eq!(ledger.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_without_fallback_refuses_calls() {
        let primary = Arc::new(SimulatedLedger::new("primary"));
        primary.fail_next(vec![transport(), transport(), transport()]);
        let ledger = pool(&primary, TokenBucket::new(100.0, 100.0), 1, Duration::from_secs(5));

        for _ in 0..3 {
            let _ = ledger.pool_balance().await;
        }
        let err = ledger.pool_balance().await.unwrap_err();
        assert!(err.is_circuit_open());
        assert_eq!(primary.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_from_transient_failures() {
        let primary = Arc::new(SimulatedLedger::new("primary"));
        primary.set_pool_balance(42);
        primary.fail_next(vec![transport(), transport()]);
        let ledger = pool(&primary, TokenBucket::new(100.0, 100.0), 4, Duration::from_secs(5));

        assert_eq!(ledger.pool_balance().await.unwrap(), 42);
        assert_eq!(primary.call_count(), 3);
        // one logical success keeps the breaker closed
        assert_eq!(ledger.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_wraps_last_error() {
        let primary = Arc::new(SimulatedLedger::new("primary"));
        primary.fail_next(vec![transport(), transport(), transport(), transport()]);
        let ledger = pool(&primary, TokenBucket::new(100.0, 100.0), 3, Duration::from_secs(5));

        match ledger.pool_balance().await {
            Err(LedgerError::RetriesExhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, LedgerError::Transport { .. }));
            }
            other => panic!("expected exhausted retries, got {:?}", other),
        }
        assert_eq!(primary.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_endpoint_times_out() {
        let primary = Arc::new(SimulatedLedger::new("primary"));
        primary.set_latency(Duration::from_secs(10));
        let ledger = pool(&primary, TokenBucket::new(100.0, 100.0), 1, Duration::from_secs(1));

        let err = ledger.pool_balance().await.unwrap_err();
        assert!(matches!(err.root(), LedgerError::Timeout { .. }), "got {:?}", err);
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_bucket_limits_attempts() {
        let primary = Arc::new(SimulatedLedger::new("primary"));
        // one token, refill far slower than the wait budget
        let ledger = pool(&primary, TokenBucket::new(1.0, 0.1), 1, Duration::from_secs(5));

        assert!(ledger.pool_balance().await.is_ok());
        let err = ledger.pool_balance().await.unwrap_err();
        assert!(matches!(err.root(), LedgerError::RateLimited { .. }), "got {:?}", err);
        assert_eq!(primary.call_count(), 1);
        assert_eq!(ledger.metrics().rate_limit_rejections_total.get(), 1);
    }
}
