use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::cli::output::{OutputFormat, OutputOptions};
use crate::cli::renderer;
use crate::core::config::AppConfig;
use crate::core::ledger::{self, Ledger};
use crate::core::models::budget::{BudgetStatus, LedgerSummary};
use crate::core::models::ledger::{LedgerState, RunMeta, Usage};

pub const DEFAULT_REPORT_PATH: &str = ".github/reports/cost_report.md";

#[derive(Serialize)]
struct SummaryPayload<'a> {
    ledger: &'a Path,
    #[serde(flatten)]
    summary: LedgerSummary,
    budget: BudgetStatus,
}

/// Print the summary of `state` in the requested format.
pub fn print_summary(
    config: &AppConfig,
    ledger: &Ledger,
    state: &LedgerState,
    now: &DateTime<Utc>,
    opts: &OutputOptions,
) -> Result<()> {
    let summary = ledger::summarize(state, config.pricing.as_ref());
    let status = ledger::check_budget_at(state, config.budget.limit, now);
    match opts.format {
        OutputFormat::Text => {
            println!(
                "{}",
                renderer::render_summary(&summary, Some(&status), opts.use_color)
            );
        }
        OutputFormat::Json => {
            let payload = SummaryPayload {
                ledger: ledger.path(),
                summary,
                budget: status,
            };
            println!("{}", opts.to_json(&payload)?);
        }
    }
    Ok(())
}

fn load_for_read(ledger: &Ledger) -> LedgerState {
    let outcome = ledger.load();
    if outcome.is_corrupt() {
        eprintln!(
            "Ledger at {} is unreadable, showing an empty ledger.",
            ledger.path().display()
        );
    }
    outcome.into_state()
}

pub fn update(
    config: &AppConfig,
    usage: Usage,
    now: DateTime<Utc>,
    meta: &RunMeta,
    opts: &OutputOptions,
) -> Result<()> {
    let ledger = Ledger::from_config(config);
    let state = ledger
        .record_run(&usage, config.pricing.as_ref(), now, meta)
        .with_context(|| format!("Failed to record run in {}", ledger.path().display()))?;
    if let Some(entry) = state.history.last() {
        info!(
            cost = entry.cost,
            total = state.total_cost(),
            period = %state.period(),
            "run recorded"
        );
    }
    print_summary(config, &ledger, &state, &now, opts)
}

pub fn summary(config: &AppConfig, now: &DateTime<Utc>, opts: &OutputOptions) -> Result<()> {
    let ledger = Ledger::from_config(config);
    let state = load_for_read(&ledger);
    print_summary(config, &ledger, &state, now, opts)
}

/// Write the Markdown cost report. Read-only on the ledger.
pub fn report(
    config: &AppConfig,
    output: Option<&Path>,
    now: &DateTime<Utc>,
    opts: &OutputOptions,
) -> Result<()> {
    let ledger = Ledger::from_config(config);
    let state = load_for_read(&ledger);

    let summary = ledger::summarize(&state, config.pricing.as_ref());
    let status = ledger::check_budget_at(&state, config.budget.limit, now);
    let markdown = renderer::render_report(&summary, &status, now);

    let path = output.unwrap_or_else(|| Path::new(DEFAULT_REPORT_PATH));
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create report directory: {}", parent.display())
            })?;
        }
    }
    std::fs::write(path, markdown)
        .with_context(|| format!("Failed to write report to {}", path.display()))?;
    eprintln!("Report written to {}", path.display());

    print_summary(config, &ledger, &state, now, opts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pricing::PricingConfig;
    use chrono::TimeZone;
    use std::path::PathBuf;

    fn setup(name: &str) -> (PathBuf, AppConfig) {
        let dir = std::env::temp_dir().join(format!("ci_budget_test_cmd_{}", name));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let mut config = AppConfig::default();
        config.ledger.path = dir.join("ledger.json");
        config.pricing = Some(PricingConfig::default());
        (dir, config)
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
    fn update_records_run_metadata() {
        let (_dir, config) = setup("update");
        let usage = Usage {
            input_tokens: 1000,
            output_tokens: 500,
            ..Usage::default()
        };
        let meta = RunMeta {
            run_id: Some("7".into()),
            git_ref: Some("refs/heads/main".into()),
        };
        update(&config, usage, now(), &meta, &opts()).unwrap();
        let state = Ledger::from_config(&config).load().into_state();
        assert_eq!(state.history.len(), 1);
        assert_eq!(state.history[0].run_id.as_deref(), Some("7"));
        assert_eq!(state.history[0].timestamp, now());
        assert_eq!(state.period(), "2025-06");
    }

    #[test]
    fn report_leaves_ledger_untouched() {
        let (dir, config) = setup("report");
        let usage = Usage {
            input_tokens: 2000,
            ..Usage::default()
        };
        update(&config, usage, now(), &RunMeta::default(), &opts()).unwrap();
        let before = std::fs::read(&config.ledger.path).unwrap();

        let path = dir.join("reports").join("cost_report.md");
        report(&config, Some(&path), &now(), &opts()).unwrap();

        assert_eq!(std::fs::read(&config.ledger.path).unwrap(), before);
        let markdown = std::fs::read_to_string(&path).unwrap();
        assert!(markdown.contains("2025-06"));
    }

    #[test]
    fn report_on_missing_ledger_creates_no_ledger() {
        let (dir, config) = setup("report_missing");
        let path = dir.join("cost_report.md");
        report(&config, Some(&path), &now(), &opts()).unwrap();
        assert!(path.exists());
        assert!(!config.ledger.path.exists());
    }
}
