use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::core::ledger::DEFAULT_HISTORY_LIMIT;
use crate::core::pricing::PricingConfig;

pub const ENV_CONFIG: &str = "CI_BUDGET_CONFIG";
pub const ENV_LEDGER_FILE: &str = "CI_BUDGET_FILE";
pub const ENV_BUDGET_LIMIT: &str = "CI_BUDGET_LIMIT";
pub const ENV_RATE_PER_MINUTE: &str = "CI_BUDGET_RATE_PER_MINUTE";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Invalid value for {name}: '{value}' is not a number")]
    InvalidEnv { name: &'static str, value: String },
    #[error("Invalid config: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSettings {
    #[serde(default = "default_ledger_path")]
    pub path: PathBuf,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from(".github/budget/ledger.json")
}
fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            path: default_ledger_path(),
            history_limit: default_history_limit(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetSettings {
    /// Monthly spend limit, in the pricing currency.
    #[serde(default = "default_limit")]
    pub limit: f64,
}

fn default_limit() -> f64 {
    200.0
}

impl Default for BudgetSettings {
    fn default() -> Self {
        Self {
            limit: default_limit(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub ledger: LedgerSettings,
    #[serde(default)]
    pub budget: BudgetSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pricing: Option<PricingConfig>,
}

impl AppConfig {
    /// Default config file path, respecting XDG_CONFIG_HOME
    pub fn default_path() -> PathBuf {
        let config_dir = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("~"))
                    .join(".config")
            });
        config_dir.join("ci-budget").join("config.toml")
    }

    /// Resolve the config path: explicit flag, then $CI_BUDGET_CONFIG, then the XDG default.
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        match std::env::var(ENV_CONFIG) {
            Ok(p) if !p.is_empty() => PathBuf::from(p),
            _ => Self::default_path(),
        }
    }

    /// Load config from `path`, falling back to defaults if not found
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// The template written by `config init`: defaults plus a starter rate table.
    pub fn template() -> Self {
        Self {
            pricing: Some(PricingConfig::default()),
            ..Self::default()
        }
    }

    /// Serialize and write this config to `path`.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply environment overrides. `lookup` is `std::env::var(..).ok()` in production.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_LEDGER_FILE).filter(|v| !v.is_empty()) {
            self.ledger.path = PathBuf::from(path);
        }
        if let Some(limit) = parse_env(&lookup, ENV_BUDGET_LIMIT)? {
            self.budget.limit = limit;
        }
        if let Some(rate) = parse_env(&lookup, ENV_RATE_PER_MINUTE)? {
            self.pricing
                .get_or_insert_with(|| PricingConfig {
                    models: Default::default(),
                    exchange: None,
                    ..PricingConfig::default()
                })
                .compute_per_minute = rate;
        }
        Ok(())
    }

    /// Validate the config
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.ledger.path.as_os_str().is_empty() {
            issues.push("ledger.path must not be empty".to_string());
        }
        if self.ledger.history_limit == 0 {
            issues.push("ledger.history_limit must be greater than 0".to_string());
        }
        if !self.budget.limit.is_finite() || self.budget.limit < 0.0 {
            issues.push(format!(
                "Invalid budget.limit: {} (must be finite and >= 0)",
                self.budget.limit
            ));
        }
        if let Some(pricing) = &self.pricing {
            issues.extend(pricing.validate().into_iter().map(|i| format!("pricing: {}", i)));
        }
        issues
    }

    /// `validate` as an error. Call after `apply_env` so overrides are covered.
    pub fn ensure_valid(&self) -> Result<(), ConfigError> {
        let issues = self.validate();
        if issues.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(issues))
        }
    }
}

fn parse_env<F>(lookup: &F, name: &'static str) -> Result<Option<f64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(v) if v.trim().is_empty() => Ok(None),
        Some(v) => v
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { name, value: v }),
    }
}
