//! Per-backend circuit breaker driven by rate-limit responses.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::backend::AdapterError;

use super::CircuitBreakerConfig;

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

/// Result of asking the breaker whether a dispatch may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerCheck {
    Allowed,
    /// Cooldown elapsed; this dispatch is the single trial.
    Trial,
    /// Circuit open; try again after `remaining`.
    Deferred { remaining: Duration },
}

#[derive(Debug)]
enum Phase {
    Closed,
    Open { until: Instant },
    HalfOpen { probing: bool },
}

#[derive(Debug)]
struct Inner {
    phase: Phase,
    /// Timestamps of the current run of consecutive rate-limit failures.
    failures: VecDeque<Instant>,
}

/// Circuit breaker for one backend.
///
/// Opens after `failure_threshold` consecutive rate-limit failures inside
/// the sliding window, stays open for the cooldown, then allows one trial.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: usize,
    window: Duration,
    cooldown: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            threshold: config.failure_threshold.max(1) as usize,
            window: Duration::from_secs(config.window_secs),
            cooldown: Duration::from_secs(config.cooldown_secs),
            inner: Mutex::new(Inner {
                phase: Phase::Closed,
                failures: VecDeque::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn state(&self, now: Instant) -> BreakerState {
        match self.lock().phase {
            Phase::Closed => BreakerState::Closed,
            Phase::Open { until } if now >= until => BreakerState::HalfOpen,
            Phase::Open { .. } => BreakerState::Open,
            Phase::HalfOpen { .. } => BreakerState::HalfOpen,
        }
    }

    /// Ask whether a dispatch may start now.
    pub fn check(&self, now: Instant) -> BreakerCheck {
        let mut inner = self.lock();
        match inner.phase {
            Phase::Closed => BreakerCheck::Allowed,
            Phase::Open { until } if now >= until => {
                inner.phase = Phase::HalfOpen { probing: true };
                BreakerCheck::Trial
            }
            Phase::Open { until } => BreakerCheck::Deferred {
                remaining: until - now,
            },
            Phase::HalfOpen { probing: true } => BreakerCheck::Deferred {
                remaining: Duration::from_secs(1),
            },
            Phase::HalfOpen { probing: false } => {
                inner.phase = Phase::HalfOpen { probing: true };
                BreakerCheck::Trial
            }
        }
    }

    /// Record a successful call. Returns true when this closed the circuit.
    pub fn record_success(&self) -> bool {
        let mut inner = self.lock();
        inner.failures.clear();
        let was_closed = matches!(inner.phase, Phase::Closed);
        inner.phase = Phase::Closed;
        !was_closed
    }

    /// Record a failed call. Returns true when this opened the circuit.
    pub fn record_failure(&self, error: &AdapterError, now: Instant) -> bool {
        let mut inner = self.lock();

        if !error.is_rate_limited() {
            // Any non-rate-limit answer breaks the consecutive run.
            inner.failures.clear();
            if matches!(inner.phase, Phase::HalfOpen { .. }) {
                inner.phase = Phase::Closed;
            }
            return false;
        }

        if matches!(inner.phase, Phase::HalfOpen { .. }) {
            inner.phase = Phase::Open {
                until: now + self.cooldown,
            };
            inner.failures.clear();
            return true;
        }

        inner.failures.push_back(now);
        let window = self.window;
        while let Some(&oldest) = inner.failures.front() {
            if now.saturating_duration_since(oldest) > window {
                inner.failures.pop_front();
            } else {
                break;
            }
        }

        if matches!(inner.phase, Phase::Closed) && inner.failures.len() >= self.threshold {
            inner.phase = Phase::Open {
                until: now + self.cooldown,
            };
            inner.failures.clear();
            return true;
        }
        false
    }

    /// Release an unused trial slot (the dispatch found no work).
    pub fn release_trial(&self) {
        let mut inner = self.lock();
        if matches!(inner.phase, Phase::HalfOpen { probing: true }) {
            inner.phase = Phase::HalfOpen { probing: false };
        }
    }
}
