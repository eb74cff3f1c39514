use serde::Serialize;

use crate::core::models::ledger::{RunEntry, Totals};

/// Outcome of a budget gate check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetStatus {
    pub within_budget: bool,
    pub total_so_far: f64,
    pub limit: f64,
    /// `limit - total_so_far`, floored at zero.
    pub remaining: f64,
}

impl BudgetStatus {
    pub fn over_budget(&self) -> bool {
        !self.within_budget
    }

    /// Share of the limit already spent, in percent. A zero limit is always 100%.
    pub fn used_percent(&self) -> f64 {
        if self.limit <= 0.0 {
            100.0
        } else {
            (self.total_so_far / self.limit * 100.0).max(0.0)
        }
    }
}

/// Read-only rollup of a ledger, as printed by `summary` and `report`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerSummary {
    pub currency: Option<String>,
    pub totals: Totals,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub converted: Option<ConvertedTotal>,
    pub history_len: usize,
    /// Most recent entries, oldest first.
    pub recent: Vec<RunEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConvertedTotal {
    pub currency: String,
    pub amount: f64,
}
