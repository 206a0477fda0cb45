//! Retry/backoff control for backend invocations.
//!
//! Failures are classified by `ErrorClass`:
//! - **Transient**: retried with exponential backoff up to `max_attempts`
//! - **Permanent**: abandoned without retry
//! - **Operational**: the run halts
//!
//! Rate limits additionally feed a per-backend circuit breaker.

mod breaker;
mod config;
mod controller;
mod ledger;
mod policy;

pub use breaker::{BreakerCheck, BreakerState, CircuitBreaker};
pub use config::{CircuitBreakerConfig, RetryConfig};
pub use controller::{BreakerStatus, DispatchPermit, FailureResolution, RetryController};
pub use ledger::{CreditLedger, LedgerSnapshot};
pub use policy::{RetryDecision, RetryPolicy};
