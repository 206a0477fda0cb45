//! Credit spending ledger.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Point-in-time view of the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub spent: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u64>,
}

/// Running total of credits charged by backends.
///
/// Only the retry controller charges credits, after a confirmed success.
#[derive(Debug)]
pub struct CreditLedger {
    spent: AtomicU64,
    budget: Option<u64>,
}

impl CreditLedger {
    pub fn new(already_spent: u64, budget: Option<u64>) -> Self {
        Self {
            spent: AtomicU64::new(already_spent),
            budget,
        }
    }

    pub fn spent(&self) -> u64 {
        self.spent.load(Ordering::SeqCst)
    }

    pub fn budget(&self) -> Option<u64> {
        self.budget
    }

    pub fn remaining(&self) -> Option<u64> {
        self.budget.map(|b| b.saturating_sub(self.spent()))
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.remaining(), Some(0))
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            spent: self.spent(),
            budget: self.budget,
            remaining: self.remaining(),
        }
    }

    /// Add `credits` and return the new total.
    pub(crate) fn charge(&self, credits: u64) -> u64 {
        self.spent.fetch_add(credits, Ordering::SeqCst) + credits
    }
}
