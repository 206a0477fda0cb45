//! Retry controller: backoff policy, circuit breakers and the credit ledger.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::backend::AdapterError;

use super::{
    BreakerCheck, BreakerState, CircuitBreaker, CircuitBreakerConfig, CreditLedger, RetryConfig,
    RetryDecision, RetryPolicy,
};

/// Whether a backend's dispatch loop may claim a job right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchPermit {
    Proceed {
        /// This dispatch is the half-open trial.
        trial: bool,
    },
    /// Circuit open. No job is claimed and no attempt is consumed.
    Deferred { remaining: Duration },
    /// Credit budget reached; the run must halt.
    BudgetExhausted { spent: u64, budget: u64 },
}

/// Outcome of handling one failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureResolution {
    pub decision: RetryDecision,
    /// This failure opened the backend's circuit.
    pub circuit_opened: bool,
}

/// Breaker state of one backend (for status reporting).
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub backend: String,
    pub state: BreakerState,
}

/// Central retry authority shared by all dispatch loops.
pub struct RetryController {
    policy: RetryPolicy,
    breaker_config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    ledger: CreditLedger,
}

impl RetryController {
    pub fn new(
        retry: &RetryConfig,
        breaker: &CircuitBreakerConfig,
        credits_already_spent: u64,
    ) -> Self {
        Self {
            policy: RetryPolicy::from(retry),
            breaker_config: breaker.clone(),
            breakers: Mutex::new(HashMap::new()),
            ledger: CreditLedger::new(credits_already_spent, retry.budget_credits),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn ledger(&self) -> &CreditLedger {
        &self.ledger
    }

    pub fn breaker_config(&self) -> &CircuitBreakerConfig {
        &self.breaker_config
    }

    pub fn breaker(&self, backend: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap_or_else(|e| e.into_inner());
        breakers
            .entry(backend.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(&self.breaker_config)))
            .clone()
    }

    pub fn permit(&self, backend: &str, now: Instant) -> DispatchPermit {
        if let Some(budget) = self.ledger.budget() {
            if self.ledger.is_exhausted() {
                return DispatchPermit::BudgetExhausted {
                    spent: self.ledger.spent(),
                    budget,
                };
            }
        }

        match self.breaker(backend).check(now) {
            BreakerCheck::Allowed => DispatchPermit::Proceed { trial: false },
            BreakerCheck::Trial => DispatchPermit::Proceed { trial: true },
            BreakerCheck::Deferred { remaining } => DispatchPermit::Deferred { remaining },
        }
    }

    /// Hand back a trial permit that found no job to dispatch.
    pub fn release(&self, backend: &str) {
        self.breaker(backend).release_trial();
    }

    /// Record a confirmed success and charge its credits.
    ///
    /// Returns true when the success closed the backend's circuit.
    pub fn on_success(&self, backend: &str, credits: u64) -> bool {
        if credits > 0 {
            self.ledger.charge(credits);
        }
        self.breaker(backend).record_success()
    }

    pub fn on_failure(
        &self,
        backend: &str,
        error: &AdapterError,
        attempts: u32,
        waited: Duration,
        now: Instant,
    ) -> FailureResolution {
        let circuit_opened = self.breaker(backend).record_failure(error, now);
        FailureResolution {
            decision: self.policy.decide(error, attempts, waited),
            circuit_opened,
        }
    }

    pub fn breaker_states(&self, now: Instant) -> Vec<BreakerStatus> {
        let breakers = self.breakers.lock().unwrap_or_else(|e| e.into_inner());
        let mut states: Vec<BreakerStatus> = breakers
            .iter()
            .map(|(name, breaker)| BreakerStatus {
                backend: name.clone(),
                state: breaker.state(now),
            })
            .collect();
        states.sort_by(|a, b| a.backend.cmp(&b.backend));
        states
    }
}
