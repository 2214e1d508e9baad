//! Circuit breaker guarding outbound ledger calls
//!
//! `Closed -> Open -> HalfOpen -> {Closed | Open}`. While open, calls are
//! refused without being attempted. The first call after the reset timeout
//! (measured from the last failure) moves the breaker to half-open and runs.

use crate::rpc_manager::{LedgerError, LedgerResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Numeric encoding for the state gauge
    pub fn as_gauge(&self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::HalfOpen => 1,
            CircuitState::Open => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in closed state before opening
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Cooldown after the last failure before a probe is allowed
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
    /// Consecutive half-open successes required to close
    #[serde(default = "default_half_open_success_threshold")]
    pub half_open_success_threshold: u32,
}

fn default_failure_threshold() -> u32 { 5 }
fn default_reset_timeout_ms() -> u64 { 60_000 }
fn default_half_open_success_threshold() -> u32 { 2 }

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
            half_open_success_threshold: default_half_open_success_threshold(),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
}

/// Read-only view for health reporting
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub ms_since_last_failure: Option<u64>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    success_threshold: u32,
    reset_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            success_threshold: config.half_open_success_threshold.max(1),
            reset_timeout: Duration::from_millis(config.reset_timeout_ms),
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure: None,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.inner.lock();
        CircuitSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            ms_since_last_failure: inner.last_failure.map(|t| t.elapsed().as_millis() as u64),
        }
    }

    /// Admit a call, moving open to half-open once the cooldown has passed.
    pub fn try_acquire(&self) -> LedgerResult<()> {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Open {
            return Ok(());
        }

        let elapsed = inner
            .last_failure
            .map(|t| t.elapsed())
            .unwrap_or(self.reset_timeout);
        if elapsed >= self.reset_timeout {
            inner.state = CircuitState::HalfOpen;
            inner.success_count = 0;
            info!("Circuit breaker transitioned to HALF_OPEN");
            return Ok(());
        }

        let remaining = self.reset_timeout - elapsed;
        let resets_at = chrono::Utc::now()
            + chrono::Duration::from_std(remaining).unwrap_or_else(|_| chrono::Duration::zero());
        Err(LedgerError::CircuitOpen { resets_at })
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    info!("Circuit breaker transitioned to CLOSED");
                }
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.last_failure = Some(Instant::now());
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.failure_threshold {
                    inner.state = CircuitState::Open;
                    warn!(
                        failures = inner.failure_count,
                        reset_timeout_ms = self.reset_timeout.as_millis() as u64,
                        "Circuit breaker transitioned to OPEN"
                    );
                }
            }
            CircuitState::HalfOpen => {
                // Any failure while probing reopens immediately
                inner.state = CircuitState::Open;
                inner.success_count = 0;
                warn!("Circuit breaker probe failed, back to OPEN");
            }
            CircuitState::Open => {
                inner.failure_count += 1;
            }
        }
    }

    /// Run `operation` under the breaker. Refused calls never invoke it.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> LedgerResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = LedgerResult<T>>,
    {
        self.try_acquire()?;
        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }
}
