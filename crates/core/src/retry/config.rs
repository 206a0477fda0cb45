//! Retry and circuit breaker configuration.

use serde::{Deserialize, Serialize};

/// Retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per job, including the first (default: 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (milliseconds). Doubles per retry.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Upper bound for the computed backoff (milliseconds).
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// A retry that would land later than this after the job was enqueued is
    /// abandoned instead (seconds, 0 = unlimited).
    #[serde(default = "default_max_total_wait")]
    pub max_total_wait_secs: u64,

    /// Stop dispatching once this many credits have been spent.
    #[serde(default)]
    pub budget_credits: Option<u64>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    2_000
}

fn default_max_delay() -> u64 {
    60_000
}

fn default_max_total_wait() -> u64 {
    3_600
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            max_total_wait_secs: default_max_total_wait(),
            budget_credits: None,
        }
    }
}

/// Per-backend circuit breaker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive rate-limit failures that open the circuit (default: 3).
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Failures older than this no longer count (seconds).
    #[serde(default = "default_window")]
    pub window_secs: u64,

    /// How long the circuit stays open before a trial (seconds).
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_window() -> u64 {
    300
}

fn default_cooldown() -> u64 {
    120
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            window_secs: default_window(),
            cooldown_secs: default_cooldown(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay_ms, 2000);
        assert_eq!(config.max_delay_ms, 60000);
        assert!(config.budget_credits.is_none());

        let breaker = CircuitBreakerConfig::default();
        assert_eq!(breaker.failure_threshold, 3);
        assert_eq!(breaker.cooldown_secs, 120);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: RetryConfig = toml::from_str("max_attempts = 5\nbudget_credits = 400").unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.base_delay_ms, 2000);
        assert_eq!(config.budget_credits, Some(400));
    }
}
