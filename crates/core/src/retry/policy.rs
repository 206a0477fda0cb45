//! Backoff computation and retry decisions.

use std::time::Duration;

use crate::backend::{AdapterError, ErrorClass};

use super::RetryConfig;

/// What to do with a job after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Schedule another attempt after `delay`.
    Retry { delay: Duration },
    /// Give up on this job.
    Abandon { reason: String },
    /// Stop the whole run.
    Halt { reason: String },
}

/// Bounded exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Zero means unlimited.
    pub max_total_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_total_wait: Duration::from_secs(config.max_total_wait_secs),
        }
    }
}

impl RetryPolicy {
    /// `min(base * 2^retry, max)` where `retry` is the zero-based retry number.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.min(31)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Decide how to handle `error` after `attempts` attempts.
    ///
    /// `waited` is how long the job has been outstanding since it was enqueued.
    pub fn decide(&self, error: &AdapterError, attempts: u32, waited: Duration) -> RetryDecision {
        match error.class() {
            ErrorClass::Operational => RetryDecision::Halt {
                reason: error.to_string(),
            },
            ErrorClass::Permanent => RetryDecision::Abandon {
                reason: error.to_string(),
            },
            ErrorClass::Transient => {
                if attempts >= self.max_attempts {
                    return RetryDecision::Abandon {
                        reason: format!(
                            "retries exhausted after {} attempts: {}",
                            attempts, error
                        ),
                    };
                }

                let mut delay = self.backoff(attempts.saturating_sub(1));
                if let Some(hint) = error.retry_after() {
                    delay = delay.max(hint);
                }

                if !self.max_total_wait.is_zero() && waited + delay > self.max_total_wait {
                    return RetryDecision::Abandon {
                        reason: format!(
                            "maximum total wait of {}s exceeded: {}",
                            self.max_total_wait.as_secs(),
                            error
                        ),
                    };
                }

                RetryDecision::Retry { delay }
            }
        }
    }
}
