use crate::rpc_manager::{LedgerError, LedgerResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Bucket size (burst)
    #[serde(default = "default_capacity")]
    pub capacity: f64,
    /// Tokens added per second
    #[serde(default = "default_refill_per_second")]
    pub refill_per_second: f64,
    /// Longest a caller waits for a token before failing
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
}

fn default_capacity() -> f64 { 10.0 }
fn default_refill_per_second() -> f64 { 5.0 }
fn default_max_wait_ms() -> u64 { 10_000 }

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            refill_per_second: default_refill_per_second(),
            max_wait_ms: default_max_wait_ms(),
        }
    }
}

const POLL_STEP: Duration = Duration::from_millis(25);

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket rate limiter shared by every ledger call in the process
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64, // tokens per second
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(capacity: f64, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn from_config(config: &RateLimiterConfig) -> Self {
        Self::new(config.capacity, config.refill_per_second)
    }

    /// Top up by elapsed time, then take one token if available
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            state.tokens = (state.tokens + elapsed * self.refill_rate).min(self.capacity);
            state.last_refill = now;
        }

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Poll for a token for at most `max_wait`, then fail with `RateLimited`
    pub async fn acquire(&self, max_wait: Duration) -> LedgerResult<()> {
        let deadline = Instant::now() + max_wait;
        loop {
            if self.try_acquire() {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(LedgerError::RateLimited {
                    context: format!("local token bucket, waited {}ms", max_wait.as_millis()),
                });
            }
            tokio::time::sleep(POLL_STEP.min(deadline - now)).await;
        }
    }

    /// Current token count after a refill, for health snapshots
    pub fn available(&self) -> f64 {
        let state = self.state.lock();
        let elapsed = Instant::now().duration_since(state.last_refill).as_secs_f64();
        (state.tokens + elapsed * self.refill_rate).min(self.capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_refill() {
        let bucket = TokenBucket::new(2.0, 1.0);
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());

        tokio::time::advance(Duration::from_millis(1_000)).await;
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_is_capped() {
        let bucket = TokenBucket::new(3.0, 10.0);
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(bucket.available() <= 3.0);
        for _ in 0..3 {
            assert!(bucket.try_acquire());
        }
        assert!(!bucket.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_refill() {
        let bucket = TokenBucket::new(1.0, 4.0);
        assert!(bucket.try_acquire());
        bucket.acquire(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_gives_up_after_max_wait() {
        let bucket = TokenBucket::new(1.0, 0.1);
        assert!(bucket.try_acquire());
        let result = bucket.acquire(Duration::from_millis(200)).await;
        assert!(matches!(result, Err(LedgerError::RateLimited { .. })));
    }
}
