use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::pricing::PricingConfig;

/// Usage reported for one pipeline run. Missing fields count as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub minutes: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Pipeline metadata attached to a run entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunMeta {
    pub run_id: Option<String>,
    pub git_ref: Option<String>,
}

/// One recorded pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEntry {
    pub timestamp: DateTime<Utc>,
    pub period: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub minutes: f64,
    pub token_cost: f64,
    pub compute_cost: f64,
    pub cost: f64,
}

/// Running totals for the active accounting period.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    /// Month key, "YYYY-MM". Empty until the first run is recorded.
    #[serde(default)]
    pub period: String,
    #[serde(default)]
    pub total_cost: f64,
    #[serde(default)]
    pub token_cost: f64,
    #[serde(default)]
    pub compute_cost: f64,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub minutes: f64,
    #[serde(default)]
    pub runs: u64,
    #[serde(default)]
    pub first_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
}

impl Totals {
    /// Fresh totals for a new period.
    pub fn for_period(period: &str) -> Self {
        Self {
            period: period.to_string(),
            ..Self::default()
        }
    }
}

/// The persisted ledger file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pricing: Option<PricingConfig>,
    #[serde(default)]
    pub totals: Totals,
    #[serde(default)]
    pub history: Vec<RunEntry>,
}

impl LedgerState {
    pub fn period(&self) -> &str {
        &self.totals.period
    }

    pub fn total_cost(&self) -> f64 {
        self.totals.total_cost
    }
}

/// Why `load` fell back to a default state.
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultReason {
    /// No ledger file yet; the normal first-run case.
    Missing,
    /// The file exists but could not be read or parsed.
    Corrupt(String),
}

/// Result of reading the ledger from disk.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Loaded(LedgerState),
    Default {
        state: LedgerState,
        reason: DefaultReason,
    },
}

impl LoadOutcome {
    pub fn state(&self) -> &LedgerState {
        match self {
            LoadOutcome::Loaded(state) => state,
            LoadOutcome::Default { state, .. } => state,
        }
    }

    pub fn into_state(self) -> LedgerState {
        match self {
            LoadOutcome::Loaded(state) => state,
            LoadOutcome::Default { state, .. } => state,
        }
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(
            self,
            LoadOutcome::Default {
                reason: DefaultReason::Corrupt(_),
                ..
            }
        )
    }
}
