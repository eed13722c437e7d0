//! Retry strategies for conflict-prone operations.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::debug;

use pact_core::Result;
use pact_telemetry::{instruments, Histogram, MetricsRegistry};

enum Backoff {
    /// Fixed schedule; the last entry repeats for further retries.
    Schedule(&'static [Duration]),
    /// Exponential doubling from a base delay.
    Exponential { base: Duration },
}

/// Retry strategy configuration.
pub struct RetryStrategy {
    max_attempts: usize,
    backoff: Backoff,
    jitter_factor: f64,
    max_delay: Duration,
}

const CONFLICT_SCHEDULE: &[Duration] =
    &[Duration::ZERO, Duration::from_millis(30), Duration::from_secs(1)];

impl RetryStrategy {
    /// The strategy for etag-conflict recovery: up to 5 attempts with a
    /// 0 ms, 30 ms, then 1 s-per-attempt backoff, jittered to damp
    /// contention.
    pub fn concurrency_conflict() -> Self {
        Self {
            max_attempts: 5,
            backoff: Backoff::Schedule(CONFLICT_SCHEDULE),
            jitter_factor: 0.25,
            max_delay: Duration::from_secs(2),
        }
    }

    /// Jittered exponential backoff from a base delay.
    pub fn exponential(max_attempts: usize, base: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential { base },
            jitter_factor: 0.25,
            max_delay: base.saturating_mul(64),
        }
    }

    /// Set the maximum delay cap.
    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Set the jitter factor (0.0 disables jitter).
    #[must_use]
    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor.clamp(0.0, 1.0);
        self
    }

    /// Total attempts this strategy allows.
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Delay before the given retry (1-based retry index), jitter applied.
    ///
    /// Public so callers driving their own retry loop (the lock factory's
    /// cancellable backoff) can share the schedule.
    pub fn delay_for(&self, retry: usize) -> Duration {
        let raw = match &self.backoff {
            Backoff::Schedule(schedule) => schedule[(retry - 1).min(schedule.len() - 1)],
            Backoff::Exponential { base } => {
                base.saturating_mul(2_u32.saturating_pow(retry as u32 - 1))
            }
        };
        let capped = raw.min(self.max_delay);
        if self.jitter_factor <= 0.0 || capped.is_zero() {
            return capped;
        }
        let spread = capped.as_secs_f64() * self.jitter_factor;
        capped + Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..spread))
    }
}

/// Execute an operation, retrying only concurrency conflicts.
///
/// Every retry records the 1-based retry number into `retries`, when given.
/// The last error propagates once attempts are exhausted; non-conflict
/// errors propagate immediately.
pub async fn retry<T, F, Fut>(
    strategy: &RetryStrategy,
    retries: Option<&Histogram>,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_conflict() && attempt < strategy.max_attempts => {
                if let Some(histogram) = retries {
                    histogram.observe(attempt as f64);
                }
                let delay = strategy.delay_for(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying after concurrency conflict");
                sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

/// A reusable conflict-retry pipeline bound to the process metrics.
#[derive(Clone)]
pub struct ResiliencePipeline {
    strategy: std::sync::Arc<RetryStrategy>,
    retries: Histogram,
}

impl ResiliencePipeline {
    /// A pipeline with the standard conflict strategy.
    pub fn new(metrics: &MetricsRegistry) -> Self {
        Self::with_strategy(RetryStrategy::concurrency_conflict(), metrics)
    }

    /// A pipeline with a custom strategy.
    pub fn with_strategy(strategy: RetryStrategy, metrics: &MetricsRegistry) -> Self {
        Self {
            strategy: std::sync::Arc::new(strategy),
            retries: metrics.histogram(instruments::CONCURRENCY_CONFLICT_RETRIES),
        }
    }

    /// Execute an operation under this pipeline.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        retry(&self.strategy, Some(&self.retries), operation).await
    }
}
