use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::cli::output::{OutputFormat, OutputOptions};
use crate::cli::renderer;
use crate::core::config::AppConfig;
use crate::core::ledger::{self, period_key, Ledger};
use crate::core::models::budget::BudgetStatus;
use crate::core::models::ledger::{RunEntry, RunMeta, Usage};
use crate::core::pipeline::PipelineOutput;

pub const OUT_SKIP_HEAVY: &str = "budget_skip_heavy";
pub const OUT_OVER: &str = "budget_over";
pub const OUT_TOTAL: &str = "budget_total";

const WARN_PERCENT: f64 = 80.0;

#[derive(Serialize)]
struct GuardPayload<'a> {
    phase: &'static str,
    period: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    run: Option<&'a RunEntry>,
    #[serde(flatten)]
    budget: &'a BudgetStatus,
}

fn currency(config: &AppConfig) -> &str {
    config
        .pricing
        .as_ref()
        .map(|p| p.currency.as_str())
        .unwrap_or("USD")
}

fn warn_if_close(status: &BudgetStatus) {
    if status.within_budget && status.used_percent() >= WARN_PERCENT {
        warn!(
            total = status.total_so_far,
            limit = status.limit,
            "approaching monthly budget (80%+)"
        );
    }
}

/// Minutes elapsed since a unix timestamp, clamped at zero.
pub fn minutes_since(started_at: i64, now: &DateTime<Utc>) -> f64 {
    let elapsed_ms = now
        .timestamp_millis()
        .saturating_sub(started_at.saturating_mul(1000));
    (elapsed_ms as f64 / 60_000.0).max(0.0)
}

/// Minutes to record for `guard post`: an explicit value wins over a start timestamp.
pub fn elapsed_minutes(minutes: Option<f64>, started_at: Option<i64>, now: &DateTime<Utc>) -> f64 {
    match (minutes, started_at) {
        (Some(m), _) => m,
        (None, Some(ts)) => minutes_since(ts, now),
        (None, None) => 0.0,
    }
}

/// Pre-run gate: decide whether heavy steps should be skipped. Never mutates the ledger.
pub fn pre(
    config: &AppConfig,
    now: &DateTime<Utc>,
    out: &PipelineOutput,
    opts: &OutputOptions,
) -> Result<()> {
    let ledger = Ledger::from_config(config);
    let outcome = ledger.load();
    let status = ledger::check_budget_at(outcome.state(), config.budget.limit, now);
    warn_if_close(&status);

    let period = period_key(now);
    out.set(OUT_SKIP_HEAVY, status.over_budget())?;
    out.set(OUT_TOTAL, format!("{:.2}", status.total_so_far))?;
    out.summary(&renderer::guard_pre_lines(&period, &status, currency(config)))?;

    emit(opts, "pre", OUT_SKIP_HEAVY, period, None, &status)
}

/// Post-run check: record the run's compute minutes, then report whether the budget is exhausted.
pub fn post(
    config: &AppConfig,
    minutes: f64,
    now: DateTime<Utc>,
    meta: &RunMeta,
    out: &PipelineOutput,
    opts: &OutputOptions,
) -> Result<()> {
    let ledger = Ledger::from_config(config);
    let usage = Usage {
        minutes,
        ..Usage::default()
    };
    let state = ledger
        .record_run(&usage, config.pricing.as_ref(), now, meta)
        .with_context(|| format!("Failed to record run in {}", ledger.path().display()))?;
    let status = ledger::check_budget(&state, config.budget.limit);
    warn_if_close(&status);

    out.set(OUT_OVER, status.over_budget())?;
    out.set(OUT_TOTAL, format!("{:.2}", status.total_so_far))?;
    let entry = state.history.last();
    if let Some(entry) = entry {
        out.summary(&renderer::guard_post_lines(entry, &status, currency(config)))?;
    }

    emit(opts, "post", OUT_OVER, state.period().to_string(), entry, &status)
}

fn emit(
    opts: &OutputOptions,
    phase: &'static str,
    flag_key: &str,
    period: String,
    run: Option<&RunEntry>,
    status: &BudgetStatus,
) -> Result<()> {
    match opts.format {
        OutputFormat::Text => {
            println!("{}={}", flag_key, status.over_budget());
            println!("{}={:.2}", OUT_TOTAL, status.total_so_far);
        }
        OutputFormat::Json => {
            let payload = GuardPayload {
                phase,
                period,
                run,
                budget: status,
            };
            println!("{}", opts.to_json(&payload)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::output::OutputFormat;
    use crate::core::models::ledger::{LedgerState, Totals};
    use crate::core::pricing::PricingConfig;
    use chrono::TimeZone;
    use std::path::PathBuf;

    struct Fixture {
        dir: PathBuf,
        config: AppConfig,
        out: PipelineOutput,
    }

    impl Fixture {
        fn new(name: &str) -> Self {
            let dir = std::env::temp_dir().join(format!("ci_budget_test_guard_{}", name));
            let _ = std::fs::remove_dir_all(&dir);
            std::fs::create_dir_all(&dir).unwrap();
            let mut config = AppConfig::default();
            config.ledger.path = dir.join("ledger.json");
            config.budget.limit = 10.0;
            config.pricing = Some(PricingConfig {
                compute_per_minute: 0.5,
                ..PricingConfig::default()
            });
            let out = PipelineOutput::new(Some(dir.join("output")), Some(dir.join("summary.md")));
            Self { dir, config, out }
        }

        fn seed(&self, period: &str, total: f64) {
            let state = LedgerState {
                totals: Totals {
                    total_cost: total,
                    compute_cost: total,
                    runs: 1,
                    ..Totals::for_period(period)
                },
                ..LedgerState::default()
            };
            Ledger::from_config(&self.config).save(&state).unwrap();
        }

        fn ledger_bytes(&self) -> Vec<u8> {
            std::fs::read(&self.config.ledger.path).unwrap()
        }

        fn outputs(&self) -> String {
            std::fs::read_to_string(self.dir.join("output")).unwrap()
        }
    }

    fn opts() -> OutputOptions {
        OutputOptions {
            format: OutputFormat::Json,
            pretty: false,
            use_color: false,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 3, 12, 0, 0).unwrap()
    }

    #[test]
    fn pre_leaves_ledger_bytes_unchanged() {
        let fx = Fixture::new("pre_readonly");
        fx.seed("2025-06", 4.0);
        let before = fx.ledger_bytes();
        pre(&fx.config, &now(), &fx.out, &opts()).unwrap();
        assert_eq!(fx.ledger_bytes(), before);
        assert_eq!(fx.outputs(), "budget_skip_heavy=false\nbudget_total=4.00\n");
    }

    #[test]
    fn pre_on_missing_ledger_creates_nothing() {
        let fx = Fixture::new("pre_missing");
        pre(&fx.config, &now(), &fx.out, &opts()).unwrap();
        assert!(!fx.config.ledger.path.exists());
        assert!(fx.outputs().starts_with("budget_skip_heavy=false\n"));
    }

    #[test]
    fn pre_skips_heavy_steps_at_the_limit() {
        let fx = Fixture::new("pre_at_limit");
        fx.seed(&period_key(&now()), 10.0);
        pre(&fx.config, &now(), &fx.out, &opts()).unwrap();
        assert_eq!(fx.outputs(), "budget_skip_heavy=true\nbudget_total=10.00\n");
        let summary = std::fs::read_to_string(fx.dir.join("summary.md")).unwrap();
        assert!(!summary.is_empty());
    }

    #[test]
    fn pre_ignores_last_months_total() {
        let fx = Fixture::new("pre_rollover");
        fx.seed("2025-05", 50.0);
        pre(&fx.config, &now(), &fx.out, &opts()).unwrap();
        assert!(fx.outputs().starts_with("budget_skip_heavy=false\n"));
    }

    #[test]
    fn post_appends_one_entry_and_flags_over_budget() {
        let fx = Fixture::new("post");
        fx.seed(&period_key(&now()), 9.0);
        let meta = RunMeta {
            run_id: Some("42".into()),
            git_ref: None,
        };
        post(&fx.config, 4.0, now(), &meta, &fx.out, &opts()).unwrap();

        let state = Ledger::from_config(&fx.config).load().into_state();
        assert_eq!(state.history.len(), 1);
        assert_eq!(state.history[0].run_id.as_deref(), Some("42"));
        assert_eq!(state.history[0].compute_cost, 2.0);
        assert_eq!(state.total_cost(), 11.0);
        assert_eq!(fx.outputs(), "budget_over=true\nbudget_total=11.00\n");
    }

    #[test]
    fn post_within_budget_is_not_over() {
        let fx = Fixture::new("post_within");
        post(&fx.config, 1.0, now(), &RunMeta::default(), &fx.out, &opts()).unwrap();
        assert_eq!(fx.outputs(), "budget_over=false\nbudget_total=0.50\n");
    }

    #[test]
    fn explicit_minutes_win_over_start_time() {
        let start = now().timestamp() - 600;
        assert_eq!(elapsed_minutes(Some(3.0), Some(start), &now()), 3.0);
        assert!((elapsed_minutes(None, Some(start), &now()) - 10.0).abs() < 1e-9);
        assert_eq!(elapsed_minutes(None, None, &now()), 0.0);
    }

    #[test]
    fn minutes_since_extreme_start_does_not_overflow() {
        let m = minutes_since(i64::MIN, &now());
        assert!(m.is_finite() && m > 0.0);
        assert_eq!(minutes_since(i64::MAX, &now()), 0.0);
    }

    #[test]
    fn minutes_since_start() {
        let now = Utc.with_ymd_and_hms(2025, 6, 3, 12, 30, 0).unwrap();
        let start = Utc.with_ymd_and_hms(2025, 6, 3, 12, 0, 0).unwrap().timestamp();
        assert!((minutes_since(start, &now) - 30.0).abs() < 1e-9);
    }

    #[test]
    fn minutes_since_future_start_is_zero() {
        let now = Utc.with_ymd_and_hms(2025, 6, 3, 12, 0, 0).unwrap();
        assert_eq!(minutes_since(now.timestamp() + 60, &now), 0.0);
    }

    #[test]
    fn minutes_since_epoch_start() {
        let now = Utc.with_ymd_and_hms(1970, 1, 1, 0, 10, 0).unwrap();
        assert!((minutes_since(0, &now) - 10.0).abs() < 1e-9);
    }
}
