use chrono::{DateTime, Utc};
use colored::{control, ColoredString, Colorize};

use crate::core::formatter::{
    format_budget_bar, format_minutes, format_money, format_thousands, format_tokens,
};
use crate::core::models::budget::{BudgetStatus, LedgerSummary};
use crate::core::models::ledger::RunEntry;

const BAR_WIDTH: usize = 12;
const DEFAULT_CURRENCY: &str = "USD";

fn currency(summary: &LedgerSummary) -> &str {
    summary.currency.as_deref().unwrap_or(DEFAULT_CURRENCY)
}

fn format_when(ts: Option<&DateTime<Utc>>) -> String {
    ts.map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "N/A".to_string())
}

fn run_label(entry: &RunEntry) -> &str {
    entry.run_id.as_deref().unwrap_or("local")
}

/// Render the ledger summary as a colored (or plain) block.
///
/// Layout:
/// ```text
///  Cost ledger (2025-06)
///   Runs      3
///   First     2025-06-01 08:00 UTC
///   Last      2025-06-03 12:00 UTC
///   Tokens    1.5K in / 500 out  $0.0105
///   Compute   12.5 min  $0.0000
///   Total     $0.0105 (€0.0097)
///   Budget    $0.01 / $200.00 [░░░░░░░░░░░░]
///   Recent:
///     2025-06-03  17        1000/500      $0.0105
/// ```
pub fn render_summary(
    summary: &LedgerSummary,
    status: Option<&BudgetStatus>,
    use_color: bool,
) -> String {
    control::set_override(use_color);

    let cur = currency(summary);
    let totals = &summary.totals;
    let mut lines: Vec<String> = Vec::new();

    let period = if totals.period.is_empty() {
        "no runs yet"
    } else {
        totals.period.as_str()
    };
    lines.push(format!(" Cost ledger ({})", period).bold().to_string());

    lines.push(format!("  {}      {}", "Runs".cyan(), totals.runs));
    lines.push(format!("  {}     {}", "First".cyan(), format_when(totals.first_run.as_ref())));
    lines.push(format!("  {}      {}", "Last".cyan(), format_when(totals.last_run.as_ref())));
    lines.push(format!(
        "  {}    {} in / {} out  {}",
        "Tokens".cyan(),
        format_tokens(totals.input_tokens),
        format_tokens(totals.output_tokens),
        format_money(totals.token_cost, cur, 4)
    ));
    lines.push(format!(
        "  {}   {}  {}",
        "Compute".cyan(),
        format_minutes(totals.minutes),
        format_money(totals.compute_cost, cur, 4)
    ));

    let converted = summary
        .converted
        .as_ref()
        .map(|c| format!(" ({})", format_money(c.amount, &c.currency, 4)))
        .unwrap_or_default();
    lines.push(format!(
        "  {}     {}{}",
        "Total".cyan(),
        format_money(totals.total_cost, cur, 4).bold(),
        converted
    ));

    if let Some(status) = status {
        let text = format!(
            "{} / {}",
            format_money(status.total_so_far, cur, 2),
            format_money(status.limit, cur, 2)
        );
        lines.push(format!(
            "  {}    {} {}",
            "Budget".cyan(),
            color_by_usage(status, &text),
            format_budget_bar(status.used_percent(), BAR_WIDTH).magenta()
        ));
    }

    if !summary.recent.is_empty() {
        lines.push(format!("  {}:", "Recent".cyan()));
        for entry in &summary.recent {
            let tokens = format!("{}/{}", entry.input_tokens, entry.output_tokens);
            lines.push(format!(
                "    {}  {:<8}  {:<12}  {}",
                entry.timestamp.format("%Y-%m-%d"),
                run_label(entry),
                tokens,
                format_money(entry.cost, cur, 4)
            ));
        }
    }

    lines.join("\n")
}

/// Green below 80% of the limit, yellow from 80%, red once over budget.
fn color_by_usage(status: &BudgetStatus, text: &str) -> ColoredString {
    if status.over_budget() {
        text.red()
    } else if status.used_percent() >= 80.0 {
        text.yellow()
    } else {
        text.green()
    }
}

/// Render the Markdown cost report written by `report`.
pub fn render_report(
    summary: &LedgerSummary,
    status: &BudgetStatus,
    generated_at: &DateTime<Utc>,
) -> String {
    let cur = currency(summary);
    let totals = &summary.totals;
    let mut out = String::new();

    out.push_str("# Cost Report\n\n");
    out.push_str(&format!(
        "**Generated:** {} UTC\n\n",
        generated_at.format("%Y-%m-%d %H:%M:%S")
    ));

    out.push_str("## Summary\n\n");
    out.push_str("| Metric | Value |\n|--------|-------|\n");
    out.push_str(&format!("| Period | {} |\n", or_na(&totals.period)));
    out.push_str(&format!("| Runs | {} |\n", totals.runs));
    out.push_str(&format!("| First run | {} |\n", format_when(totals.first_run.as_ref())));
    out.push_str(&format!("| Last run | {} |\n\n", format_when(totals.last_run.as_ref())));

    out.push_str("## LLM API\n\n");
    out.push_str("| Component | Value | Cost |\n|-----------|-------|------|\n");
    out.push_str(&format!(
        "| Input tokens | {} | - |\n",
        format_thousands(totals.input_tokens)
    ));
    out.push_str(&format!(
        "| Output tokens | {} | - |\n",
        format_thousands(totals.output_tokens)
    ));
    out.push_str(&format!(
        "| **Subtotal** | - | **{}** |\n\n",
        format_money(totals.token_cost, cur, 4)
    ));

    out.push_str("## Pipeline compute\n\n");
    out.push_str("| Component | Value | Cost |\n|-----------|-------|------|\n");
    out.push_str(&format!(
        "| Minutes used | {:.1} | {} |\n\n",
        totals.minutes,
        format_money(totals.compute_cost, cur, 4)
    ));

    out.push_str("## Total\n\n");
    out.push_str("| Currency | Amount |\n|----------|--------|\n");
    out.push_str(&format!(
        "| **{}** | **{}** |\n",
        cur,
        format_money(totals.total_cost, cur, 4)
    ));
    if let Some(c) = &summary.converted {
        out.push_str(&format!(
            "| **{}** | **{}** |\n",
            c.currency,
            format_money(c.amount, &c.currency, 4)
        ));
    }
    out.push('\n');

    out.push_str("## Budget\n\n");
    out.push_str(&format!(
        "{} of {} used ({:.0}%), status: **{}**\n\n",
        format_money(status.total_so_far, cur, 2),
        format_money(status.limit, cur, 2),
        status.used_percent(),
        if status.within_budget { "OK" } else { "OVER" }
    ));

    out.push_str(&format!(
        "## History (last {} runs)\n\n",
        summary.recent.len()
    ));
    out.push_str("| Run | Date | Tokens (in/out) | Minutes | Cost |\n");
    out.push_str("|-----|------|-----------------|---------|------|\n");
    for entry in &summary.recent {
        out.push_str(&format!(
            "| {} | {} | {}/{} | {:.1} | {} |\n",
            run_label(entry),
            entry.timestamp.format("%Y-%m-%d"),
            entry.input_tokens,
            entry.output_tokens,
            entry.minutes,
            format_money(entry.cost, cur, 4)
        ));
    }

    out
}

fn or_na(s: &str) -> &str {
    if s.is_empty() {
        "N/A"
    } else {
        s
    }
}

/// Step summary lines for the pre-run budget gate.
pub fn guard_pre_lines(period: &str, status: &BudgetStatus, currency: &str) -> Vec<String> {
    vec![
        "## Budget guard (pre-run)".to_string(),
        format!("- Month: **{}**", period),
        format!(
            "- Current total: **{}** / **{}**",
            format_money(status.total_so_far, currency, 2),
            format_money(status.limit, currency, 2)
        ),
        format!(
            "- Heavy steps: **{}**",
            if status.within_budget { "RUN" } else { "SKIP" }
        ),
    ]
}

/// Step summary lines for the post-run budget check.
pub fn guard_post_lines(entry: &RunEntry, status: &BudgetStatus, currency: &str) -> Vec<String> {
    vec![
        "## Budget guard (post-run)".to_string(),
        format!("- Duration: **{}**", format_minutes(entry.minutes)),
        format!(
            "- Estimated run cost: **{}**",
            format_money(entry.cost, currency, 4)
        ),
        format!(
            "- Month total: **{}** / **{}**",
            format_money(status.total_so_far, currency, 2),
            format_money(status.limit, currency, 2)
        ),
        format!(
            "- Status: **{}**",
            if status.within_budget { "OK" } else { "OVER BUDGET" }
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::budget::ConvertedTotal;
    use crate::core::models::ledger::Totals;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 3, 12, 0, 0).unwrap()
    }

    fn make_entry() -> RunEntry {
        RunEntry {
            timestamp: ts(),
            period: "2025-06".into(),
            run_id: Some("17".into()),
            git_ref: None,
            model: None,
            input_tokens: 1000,
            output_tokens: 500,
            minutes: 4.0,
            token_cost: 0.0105,
            compute_cost: 0.0,
            cost: 0.0105,
        }
    }

    fn make_summary() -> LedgerSummary {
        LedgerSummary {
            currency: Some("USD".into()),
            totals: Totals {
                period: "2025-06".into(),
                total_cost: 0.0105,
                token_cost: 0.0105,
                compute_cost: 0.0,
                input_tokens: 1000,
                output_tokens: 500,
                minutes: 4.0,
                runs: 1,
                first_run: Some(ts()),
                last_run: Some(ts()),
            },
            converted: Some(ConvertedTotal {
                currency: "EUR".into(),
                amount: 0.00966,
            }),
            history_len: 1,
            recent: vec![make_entry()],
        }
    }

    fn make_status(total: f64, limit: f64) -> BudgetStatus {
        BudgetStatus {
            within_budget: total < limit,
            total_so_far: total,
            limit,
            remaining: (limit - total).max(0.0),
        }
    }

    #[test]
    fn summary_contains_period_and_totals() {
        let output = render_summary(&make_summary(), None, false);
        assert!(output.contains("Cost ledger (2025-06)"));
        assert!(output.contains("$0.0105"));
        assert!(output.contains("€0.0097"));
        assert!(output.contains("1.0K in / 500 out"));
    }

    #[test]
    fn summary_lists_recent_runs() {
        let output = render_summary(&make_summary(), None, false);
        assert!(output.contains("Recent"));
        assert!(output.contains("2025-06-03  17"));
    }

    #[test]
    fn summary_shows_budget_when_given() {
        let status = make_status(150.0, 200.0);
        let output = render_summary(&make_summary(), Some(&status), false);
        assert!(output.contains("$150.00 / $200.00"));
        assert!(output.contains("[█████████░░░]"));
    }

    #[test]
    fn empty_summary_has_placeholder_period() {
        let summary = LedgerSummary {
            currency: None,
            totals: Totals::default(),
            converted: None,
            history_len: 0,
            recent: vec![],
        };
        let output = render_summary(&summary, None, false);
        assert!(output.contains("no runs yet"));
        assert!(output.contains("N/A"));
        assert!(!output.contains("Recent"));
    }

    #[test]
    fn summary_no_ansi_when_color_false() {
        let output = render_summary(&make_summary(), Some(&make_status(1.0, 2.0)), false);
        assert!(!output.contains('\x1b'), "output should not contain ANSI codes");
    }

    #[test]
    fn report_has_sections_and_history_rows() {
        let report = render_report(&make_summary(), &make_status(0.0105, 200.0), &ts());
        assert!(report.starts_with("# Cost Report"));
        assert!(report.contains("**Generated:** 2025-06-03 12:00:00 UTC"));
        assert!(report.contains("| Input tokens | 1,000 | - |"));
        assert!(report.contains("| **EUR** | **€0.0097** |"));
        assert!(report.contains("| 17 | 2025-06-03 | 1000/500 | 4.0 | $0.0105 |"));
        assert!(report.contains("status: **OK**"));
    }

    #[test]
    fn guard_lines_reflect_decision() {
        let over = make_status(200.0, 200.0);
        let pre = guard_pre_lines("2025-06", &over, "EUR");
        assert!(pre.iter().any(|l| l.contains("SKIP")));
        assert!(pre.iter().any(|l| l.contains("€200.00")));

        let post = guard_post_lines(&make_entry(), &make_status(1.0, 200.0), "USD");
        assert!(post.iter().any(|l| l.contains("4.0 min")));
        assert!(post.iter().any(|l| l.ends_with("**OK**")));
    }
}
