use std::time::Duration;

/// Consecutive clean cycles before the interval shrinks
pub const SHRINK_AFTER_SUCCESSES: u32 = 5;
/// Consecutive failed cycles before the interval grows
pub const GROW_AFTER_FAILURES: u32 = 2;

const SHRINK_FACTOR: f64 = 0.9;
const GROW_FACTOR: f64 = 1.5;

/// Poll interval that tightens while calm and backs off under errors
#[derive(Debug, Clone)]
pub struct AdaptiveInterval {
    current: Duration,
    min: Duration,
    max: Duration,
    success_streak: u32,
    failure_streak: u32,
}

impl AdaptiveInterval {
    pub fn new(initial: Duration, min: Duration, max: Duration) -> Self {
        Self {
            current: initial.clamp(min, max),
            min,
            max,
            success_streak: 0,
            failure_streak: 0,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Record a fully successful cycle; returns the new interval if it changed
    pub fn record_success(&mut self) -> Option<Duration> {
        self.failure_streak = 0;
        self.success_streak += 1;
        if self.success_streak < SHRINK_AFTER_SUCCESSES {
            return None;
        }
        self.success_streak = 0;
        self.rescale(SHRINK_FACTOR)
    }

    /// Record a failed cycle; returns the new interval if it changed
    pub fn record_failure(&mut self) -> Option<Duration> {
        self.success_streak = 0;
        self.failure_streak += 1;
        if self.failure_streak < GROW_AFTER_FAILURES {
            return None;
        }
        self.failure_streak = 0;
        self.rescale(GROW_FACTOR)
    }

    fn rescale(&mut self, factor: f64) -> Option<Duration> {
        let next = self.current.mul_f64(factor).clamp(self.min, self.max);
        if next == self.current {
            return None;
        }
        self.current = next;
        Some(next)
    }
}
