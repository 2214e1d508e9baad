use crate::rpc_manager::{LedgerError, LedgerResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Retry configuration with jitter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts (including initial attempt)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base backoff delay in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Maximum backoff delay in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 { 4 }
fn default_base_delay_ms() -> u64 { 500 }
fn default_max_delay_ms() -> u64 { 10_000 }

/// Upper bound of the additive jitter, as a fraction of the capped delay
pub const MAX_JITTER_FRACTION: f64 = 0.3;

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// Capped exponential delay for a given attempt (0-indexed), without jitter
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let exp_backoff = (self.base_delay_ms as f64) * 2_f64.powi(attempt.min(30) as i32);
        let capped = exp_backoff.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }

    /// Backoff delay with 0-30% jitter added on top
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let base = self.base_backoff(attempt);
        let jitter = rand::thread_rng().gen_range(0.0..=MAX_JITTER_FRACTION);
        base + base.mul_f64(jitter)
    }
}

/// Retry an async ledger operation with exponential backoff.
///
/// Only errors classified retryable by [`LedgerError::is_retryable`] are
/// retried; anything else is returned immediately. Spending the whole budget
/// yields [`LedgerError::RetriesExhausted`] wrapping the last failure.
pub async fn retry_with_backoff<F, Fut, T>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> LedgerResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = LedgerResult<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 0..max_attempts {
        if attempt > 0 {
            debug!(
                operation = operation_name,
                attempt = attempt + 1,
                max_attempts,
                "Retrying operation"
            );
        }

        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                if !err.is_retryable() {
                    debug!(
                        operation = operation_name,
                        error = %err,
                        "Permanent error, not retrying"
                    );
                    return Err(err);
                }

                if attempt + 1 < max_attempts {
                    let backoff = config.calculate_backoff(attempt);
                    debug!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "Transient error, backing off before retry"
                    );
                    last_error = Some(err);
                    sleep(backoff).await;
                } else {
                    warn!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        error = %err,
                        "All retry attempts exhausted"
                    );
                    last_error = Some(err);
                }
            }
        }
    }

    Err(LedgerError::RetriesExhausted {
        attempts: max_attempts,
        last: Box::new(last_error.unwrap_or_else(|| {
            LedgerError::Fatal("retry loop finished without an error".to_string())
        })),
    })
}
