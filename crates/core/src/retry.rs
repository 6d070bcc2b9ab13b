use std::time::Duration;

use crate::config::RetryConfig;

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Fixed-delay retry schedule for one sample.
///
/// `max_attempts: None` retries forever, which is the normal mode against the
/// public endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    delay: Duration,
    max_attempts: Option<u32>,
}

impl RetryPolicy {
    pub fn unbounded(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    /// At least one attempt is always made.
    pub fn bounded(max_attempts: u32, delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: Some(max_attempts.max(1)),
        }
    }

    /// Unbounded with no delay; used by tests and local fakes.
    pub fn immediate() -> Self {
        Self::unbounded(Duration::ZERO)
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        let delay = Duration::from_millis(config.delay_ms);
        match config.max_attempts {
            Some(max_attempts) => Self::bounded(max_attempts, delay),
            None => Self::unbounded(delay),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    /// Whether another attempt may follow `attempts_made` failed ones.
    pub fn allows_retry_after(&self, attempts_made: u32) -> bool {
        self.max_attempts
            .map_or(true, |max_attempts| attempts_made < max_attempts)
    }

    pub fn wait(&self) {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::unbounded(DEFAULT_RETRY_DELAY)
    }
}
