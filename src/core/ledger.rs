//! Month-scoped cost ledger persisted as a single JSON file.
//!
//! Every mutating invocation is one `load -> apply -> save` cycle. Reads
//! degrade to a default state when the file is missing or unparsable; writes
//! fail loudly. There is no locking: two concurrent writers race and the
//! last rename wins.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::config::AppConfig;
use crate::core::models::budget::{BudgetStatus, ConvertedTotal, LedgerSummary};
use crate::core::models::ledger::{
    DefaultReason, LedgerState, LoadOutcome, RunEntry, RunMeta, Totals, Usage,
};
use crate::core::pricing::{PricingConfig, PricingError};

pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Number of history entries included in a summary.
pub const SUMMARY_RECENT: usize = 10;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error(transparent)]
    Pricing(#[from] PricingError),
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),
    #[error("Pricing produced an invalid cost ({0}); rates must be finite and >= 0")]
    InvalidCost(f64),
    #[error("Failed to serialize ledger: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Failed to write ledger to {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Handle on the ledger file.
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
    history_limit: usize,
}

/// Accounting period key for a timestamp: "YYYY-MM".
pub fn period_key(now: &DateTime<Utc>) -> String {
    now.format("%Y-%m").to_string()
}

impl Ledger {
    pub fn new(path: impl Into<PathBuf>, history_limit: usize) -> Self {
        Self {
            path: path.into(),
            history_limit: history_limit.max(1),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.ledger.path, config.ledger.history_limit)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the ledger. Never fails: a missing or corrupt file yields a default state.
    pub fn load(&self) -> LoadOutcome {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no ledger file yet, starting fresh");
                return LoadOutcome::Default {
                    state: LedgerState::default(),
                    reason: DefaultReason::Missing,
                };
            }
            Err(e) => return self.corrupt(e.to_string()),
        };
        match serde_json::from_str::<LedgerState>(&content) {
            Ok(state) => LoadOutcome::Loaded(state),
            Err(e) => self.corrupt(e.to_string()),
        }
    }

    fn corrupt(&self, reason: String) -> LoadOutcome {
        warn!(
            path = %self.path.display(),
            error = %reason,
            "ledger unreadable, continuing from an empty ledger"
        );
        LoadOutcome::Default {
            state: LedgerState::default(),
            reason: DefaultReason::Corrupt(reason),
        }
    }

    /// Rewrite the whole ledger file: write a sibling temp file, then rename it over the target.
    pub fn save(&self, state: &LedgerState) -> Result<(), LedgerError> {
        let write_err = |source: std::io::Error| LedgerError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(write_err)?;
            }
        }
        let mut json = serde_json::to_string_pretty(state)?;
        json.push('\n');

        let tmp = self.tmp_path();
        std::fs::write(&tmp, json).map_err(write_err)?;
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(write_err(e));
        }
        debug!(path = %self.path.display(), entries = state.history.len(), "ledger saved");
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "ledger.json".to_string());
        self.path.with_file_name(format!(".{}.tmp", name))
    }

    /// Record one pipeline run and persist the result.
    ///
    /// `pricing` takes precedence over pricing embedded in the ledger file.
    /// Each call appends a new entry; calling twice records two runs.
    pub fn record_run(
        &self,
        usage: &Usage,
        pricing: Option<&PricingConfig>,
        now: DateTime<Utc>,
        meta: &RunMeta,
    ) -> Result<LedgerState, LedgerError> {
        let mut state = self.load().into_state();
        apply_run(&mut state, usage, pricing, now, meta, self.history_limit)?;
        self.save(&state)?;
        Ok(state)
    }
}

/// Apply one run to an in-memory state. Returns the appended entry.
pub fn apply_run(
    state: &mut LedgerState,
    usage: &Usage,
    pricing: Option<&PricingConfig>,
    now: DateTime<Utc>,
    meta: &RunMeta,
    history_limit: usize,
) -> Result<RunEntry, LedgerError> {
    if !usage.minutes.is_finite() || usage.minutes < 0.0 {
        return Err(LedgerError::InvalidUsage(format!(
            "minutes must be finite and >= 0, got {}",
            usage.minutes
        )));
    }
    let pricing = match pricing {
        Some(p) => p.clone(),
        None => state.pricing.clone().ok_or(PricingError::Missing)?,
    };
    let cost = pricing.cost(
        usage.model.as_deref(),
        usage.input_tokens,
        usage.output_tokens,
        usage.minutes,
    )?;
    let total = cost.total();
    if !total.is_finite() || cost.token_cost < 0.0 || cost.compute_cost < 0.0 {
        return Err(LedgerError::InvalidCost(total));
    }

    let period = period_key(&now);
    if state.totals.period != period {
        if !state.totals.period.is_empty() {
            debug!(
                from = %state.totals.period,
                to = %period,
                closed_total = state.totals.total_cost,
                "period rollover, resetting totals"
            );
        }
        state.totals = Totals::for_period(&period);
    }

    let entry = RunEntry {
        timestamp: now,
        period: period.clone(),
        run_id: meta.run_id.clone(),
        git_ref: meta.git_ref.clone(),
        model: usage.model.clone(),
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
        minutes: usage.minutes,
        token_cost: cost.token_cost,
        compute_cost: cost.compute_cost,
        cost: total,
    };

    state.history.push(entry.clone());
    let limit = history_limit.max(1);
    if state.history.len() > limit {
        let excess = state.history.len() - limit;
        state.history.drain(..excess);
        debug!(evicted = excess, limit, "trimmed run history");
    }

    let totals = &mut state.totals;
    totals.total_cost += total;
    totals.token_cost += cost.token_cost;
    totals.compute_cost += cost.compute_cost;
    totals.input_tokens += usage.input_tokens;
    totals.output_tokens += usage.output_tokens;
    totals.minutes += usage.minutes;
    totals.runs += 1;
    if totals.first_run.is_none() {
        totals.first_run = Some(now);
    }
    totals.last_run = Some(now);

    Ok(entry)
}

/// Compare the stored total against a limit. Reaching the limit counts as over budget.
pub fn check_budget(state: &LedgerState, limit: f64) -> BudgetStatus {
    status_for(state.total_cost(), limit)
}

/// Like [`check_budget`], but a total from an earlier period counts as zero spend.
pub fn check_budget_at(state: &LedgerState, limit: f64, now: &DateTime<Utc>) -> BudgetStatus {
    if state.period() == period_key(now) {
        status_for(state.total_cost(), limit)
    } else {
        status_for(0.0, limit)
    }
}

fn status_for(total: f64, limit: f64) -> BudgetStatus {
    BudgetStatus {
        within_budget: total < limit,
        total_so_far: total,
        limit,
        remaining: (limit - total).max(0.0),
    }
}

/// Rollup of totals and the last [`SUMMARY_RECENT`] runs.
pub fn summarize(state: &LedgerState, pricing: Option<&PricingConfig>) -> LedgerSummary {
    let pricing = pricing.or(state.pricing.as_ref());
    let converted = pricing
        .and_then(|p| p.convert(state.total_cost()))
        .map(|(amount, currency)| ConvertedTotal {
            currency: currency.to_string(),
            amount,
        });
    let start = state.history.len().saturating_sub(SUMMARY_RECENT);
    LedgerSummary {
        currency: pricing.map(|p| p.currency.clone()),
        totals: state.totals.clone(),
        converted,
        history_len: state.history.len(),
        recent: state.history[start..].to_vec(),
    }
}
