use std::path::Path;

use anyhow::Result;

use crate::cli::output::{OutputFormat, OutputOptions};
use crate::core::config::AppConfig;

pub fn init(path: &Path, force: bool, _opts: &OutputOptions) -> Result<()> {
    if path.exists() && !force {
        eprintln!("Config file already exists at {}", path.display());
        eprintln!("Pass --force to overwrite it.");
        return Ok(());
    }

    AppConfig::template().save(path)?;
    println!("Generated config at {}", path.display());
    println!("  Review the [pricing] rates before the first `ci-budget update`.");
    Ok(())
}

pub fn check(path: &Path, config: &AppConfig, _opts: &OutputOptions) -> Result<()> {
    if !path.exists() {
        eprintln!("No config file found at {} (using defaults)", path.display());
    }

    let issues = config.validate();
    if issues.is_empty() {
        println!("Config is valid: {}", path.display());
        println!("  Ledger: {}", config.ledger.path.display());
        match &config.pricing {
            Some(p) => println!(
                "  Pricing: {} model{} in {}",
                p.models.len(),
                if p.models.len() == 1 { "" } else { "s" },
                p.currency
            ),
            None => println!("  Pricing: none (updates fall back to the ledger file's pricing)"),
        }
    } else {
        eprintln!("Config issues found in {}:", path.display());
        for issue in &issues {
            eprintln!("  - {}", issue);
        }
        std::process::exit(1);
    }
    Ok(())
}

/// Print the effective config, after environment and flag overrides.
pub fn show(config: &AppConfig, opts: &OutputOptions) -> Result<()> {
    match opts.format {
        OutputFormat::Text => print!("{}", toml::to_string_pretty(config)?),
        OutputFormat::Json => println!("{}", opts.to_json(config)?),
    }
    Ok(())
}
