//! Retry policy with linear backoff.
//!
//! The delay before retry `n` (1-based) is `base_delay × n`. The same policy
//! drives WebSocket reconnection in `fleetlink-live`.

use std::time::Duration;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    pub max_retries: u32,
    /// Base delay, multiplied according to the backoff strategy.
    pub base_delay: Duration,
    /// Upper bound on any computed delay. Defaults to `Duration::MAX`, so
    /// linear delays are exactly `base_delay × n` unless a cap is set.
    pub max_delay: Duration,
    /// Backoff strategy to use.
    pub backoff: BackoffStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::MAX,
            backoff: BackoffStrategy::Linear,
        }
    }
}

impl RetryConfig {
    /// Set the maximum number of retries.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Cap every computed delay at `delay`.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the backoff strategy.
    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    /// A config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }
}

/// Backoff strategy for determining retry delays.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffStrategy {
    /// Constant delay between retries.
    Constant,
    /// Linear increase in delay (delay * attempt).
    Linear,
    /// Exponential increase in delay (delay * factor^attempt).
    Exponential { factor: f64 },
}

impl BackoffStrategy {
    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay(&self, attempt: u32, base_delay: Duration, max_delay: Duration) -> Duration {
        let delay = match self {
            BackoffStrategy::Constant => base_delay,
            BackoffStrategy::Linear => base_delay.saturating_mul(attempt.saturating_add(1)),
            BackoffStrategy::Exponential { factor } => {
                let multiplier = factor.powi(attempt as i32);
                Duration::try_from_secs_f64(base_delay.as_secs_f64() * multiplier)
                    .unwrap_or(Duration::MAX)
            }
        };

        std::cmp::min(delay, max_delay)
    }
}

/// Retry policy that determines when and how to retry.
///
/// One policy is created per logical request (or per reconnect cycle), so
/// the attempt counter is never shared between callers.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    attempt: u32,
}

impl RetryPolicy {
    /// Create a new retry policy from config.
    pub fn new(config: RetryConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Number of retries scheduled so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// The configured ceiling.
    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Returns true if another retry is allowed.
    pub fn should_retry(&self) -> bool {
        self.attempt < self.config.max_retries
    }

    /// Record an attempt and return the delay before it.
    /// Returns None once the ceiling is reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }

        let delay = self.config.backoff.delay(
            self.attempt,
            self.config.base_delay,
            self.config.max_delay,
        );

        self.attempt += 1;
        Some(delay)
    }

    /// Reset the counter, e.g. after a successful reconnect.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
