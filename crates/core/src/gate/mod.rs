//! Quality gate: a deterministic PASS/FAIL verdict per episode revision.
//!
//! The aggregate score is a weighted mean of externally computed sub-scores.
//! Hard-fail conditions are absolute vetoes and are always reported.

mod evaluator;
mod service;
mod store;
mod types;

pub use evaluator::evaluate;
pub use service::QualityGate;
pub use store::{GateStore, SqliteGateStore};
pub use types::{
    GateConfig, GateError, GateRecord, GateWeights, HardFail, QualityGateResult, ScoreInputs,
    Verdict,
};
