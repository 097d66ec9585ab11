//! Connection configuration types.

use std::time::Duration;

/// Default delay before reconnecting after a failed connect.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// How long a connection stays offline after consecutive connect failures.
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffStrategy {
    /// The same delay after every failure.
    Fixed(Duration),
    /// Delay grows geometrically with each consecutive failure.
    Exponential {
        /// Delay after the first failure.
        base: Duration,
        /// Upper bound on the delay.
        max: Duration,
        /// Growth factor per failure.
        multiplier: f64,
    },
    /// Delay grows by a constant step with each consecutive failure.
    Linear {
        /// Delay after the first failure.
        initial: Duration,
        /// Increment per failure.
        increment: Duration,
        /// Upper bound on the delay.
        max: Duration,
    },
}

impl BackoffStrategy {
    /// Delay to apply after `failures` consecutive connect failures
    /// (0 for the first one).
    pub fn delay_for_attempt(&self, failures: u32) -> Duration {
        match self {
            BackoffStrategy::Fixed(d) => *d,
            BackoffStrategy::Exponential {
                base,
                max,
                multiplier,
            } => {
                let delay_ms = base.as_millis() as f64 * multiplier.powi(failures as i32);
                Duration::from_millis(delay_ms.min(max.as_millis() as f64) as u64)
            }
            BackoffStrategy::Linear {
                initial,
                increment,
                max,
            } => initial.saturating_add(increment.saturating_mul(failures)).min(*max),
        }
    }
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        BackoffStrategy::Fixed(DEFAULT_RETRY_DELAY)
    }
}

/// Configuration shared by every connection of a pool.
///
/// Workers only read it; wrap it in an `Arc` to share it.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// How long to wait for each response token of an outstanding request.
    pub read_timeout: Duration,
    /// Bound on a single connect attempt.
    pub connect_timeout: Duration,
    /// Offline period after a failed connect.
    pub backoff: BackoffStrategy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(1),
            backoff: BackoffStrategy::default(),
        }
    }
}

impl ConnectionConfig {
    /// Set the read timeout.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Use a fixed retry delay after connect failures.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.backoff = BackoffStrategy::Fixed(delay);
        self
    }

    /// Set the backoff strategy.
    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }
}
