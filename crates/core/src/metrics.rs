//! Prometheus metrics for core components.
//!
//! - Dispatch (backend invocations, durations, credits, retries)
//! - Job lifecycle transitions
//! - Circuit breakers and quality gate verdicts

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts};

// =============================================================================
// Dispatch Metrics
// =============================================================================

/// Backend invocations by outcome ("succeeded", "transient", "permanent", "operational", "timeout").
pub static BACKEND_INVOCATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "reelforge_backend_invocations_total",
            "Total generation backend invocations",
        ),
        &["backend", "outcome"],
    )
    .expect("valid metric definition")
});

/// Duration of one backend invocation in seconds.
pub static BACKEND_INVOCATION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "reelforge_backend_invocation_duration_seconds",
            "Duration of generation backend invocations",
        )
        .buckets(vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 900.0]),
        &["backend"],
    )
    .expect("valid metric definition")
});

/// Credits charged by backend after confirmed success.
pub static CREDITS_SPENT: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("reelforge_credits_spent_total", "Total credits charged"),
        &["backend"],
    )
    .expect("valid metric definition")
});

/// Automatic retries scheduled.
pub static RETRIES_SCHEDULED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("reelforge_retries_scheduled_total", "Total retries scheduled"),
        &["backend"],
    )
    .expect("valid metric definition")
});

/// Dispatch attempts deferred by an open circuit.
pub static DISPATCH_DEFERRED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "reelforge_dispatch_deferred_total",
            "Dispatch attempts deferred by an open circuit breaker",
        ),
        &["backend"],
    )
    .expect("valid metric definition")
});

/// Run halts (operational errors, budget exhaustion).
pub static RUN_HALTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("reelforge_run_halts_total", "Total dispatch halts")
        .expect("valid metric definition")
});

// =============================================================================
// Job Lifecycle Metrics
// =============================================================================

/// Job state transitions by target state.
pub static JOB_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("reelforge_job_transitions_total", "Total job state transitions"),
        &["to_state"],
    )
    .expect("valid metric definition")
});

/// Jobs recovered after restart by remote outcome.
pub static JOBS_RECOVERED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "reelforge_jobs_recovered_total",
            "Dispatched jobs resolved during crash recovery",
        ),
        &["remote_outcome"],
    )
    .expect("valid metric definition")
});

/// Artifacts written to durable storage.
pub static ARTIFACTS_PERSISTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "reelforge_artifacts_persisted_total",
        "Total artifacts persisted",
    )
    .expect("valid metric definition")
});

// =============================================================================
// Breaker and Gate Metrics
// =============================================================================

/// Circuit breaker state per backend (0 closed, 1 open, 2 half-open).
pub static CIRCUIT_STATE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("reelforge_circuit_state", "Circuit breaker state per backend"),
        &["backend"],
    )
    .expect("valid metric definition")
});

/// Times a circuit opened.
pub static CIRCUIT_OPENS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("reelforge_circuit_opens_total", "Total circuit breaker openings"),
        &["backend"],
    )
    .expect("valid metric definition")
});

/// Gate evaluations by verdict.
pub static GATE_VERDICTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("reelforge_gate_verdicts_total", "Total quality gate evaluations"),
        &["verdict"],
    )
    .expect("valid metric definition")
});

/// Hard-fail conditions triggered.
pub static GATE_HARD_FAILS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "reelforge_gate_hard_fails_total",
            "Total quality gate hard-fail conditions triggered",
        ),
        &["condition"],
    )
    .expect("valid metric definition")
});

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(BACKEND_INVOCATIONS.clone()),
        Box::new(BACKEND_INVOCATION_DURATION.clone()),
        Box::new(CREDITS_SPENT.clone()),
        Box::new(RETRIES_SCHEDULED.clone()),
        Box::new(DISPATCH_DEFERRED.clone()),
        Box::new(RUN_HALTS.clone()),
        Box::new(JOB_TRANSITIONS.clone()),
        Box::new(JOBS_RECOVERED.clone()),
        Box::new(ARTIFACTS_PERSISTED.clone()),
        Box::new(CIRCUIT_STATE.clone()),
        Box::new(CIRCUIT_OPENS.clone()),
        Box::new(GATE_VERDICTS.clone()),
        Box::new(GATE_HARD_FAILS.clone()),
    ]
}
