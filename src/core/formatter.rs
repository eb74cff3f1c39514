/// Returns "1.2M", "3.4K" or the plain count for small numbers.
pub fn format_tokens(count: u64) -> String {
    if count >= 1_000_000 {
        format!("{:.1}M", count as f64 / 1_000_000.0)
    } else if count >= 1_000 {
        format!("{:.1}K", count as f64 / 1_000.0)
    } else {
        format!("{}", count)
    }
}

/// Returns "12,345,678".
pub fn format_thousands(count: u64) -> String {
    let digits = count.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Returns "$1.2345", "€1.2345" or "1.2345 CHF".
pub fn format_money(amount: f64, currency: &str, decimals: usize) -> String {
    match currency_symbol(currency) {
        Some(symbol) => format!("{}{:.*}", symbol, decimals, amount),
        None => format!("{:.*} {}", decimals, amount, currency),
    }
}

fn currency_symbol(currency: &str) -> Option<&'static str> {
    match currency.to_ascii_uppercase().as_str() {
        "USD" => Some("$"),
        "EUR" => Some("€"),
        "GBP" => Some("£"),
        _ => None,
    }
}

/// Returns "12.5 min".
pub fn format_minutes(minutes: f64) -> String {
    format!("{:.1} min", minutes)
}

/// Returns "[████████░░░░]" where █ = spent portion of the budget.
pub fn format_budget_bar(used_percent: f64, width: usize) -> String {
    let used_percent = used_percent.clamp(0.0, 100.0);
    let used_blocks = ((used_percent / 100.0) * width as f64).round() as usize;
    let free_blocks = width.saturating_sub(used_blocks);

    format!("[{}{}]", "█".repeat(used_blocks), "░".repeat(free_blocks))
}
