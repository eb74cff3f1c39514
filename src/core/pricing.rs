use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum PricingError {
    #[error("No pricing configured; add a [pricing] section to the config or ledger file")]
    Missing,
    #[error("No rates for model '{model}' and no rates for default model '{default_model}'")]
    UnknownModel {
        model: String,
        default_model: String,
    },
}

/// Token rates for one model, in the pricing currency per 1000 tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRates {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

/// Conversion into a secondary display currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRate {
    pub currency: String,
    pub rate: f64,
}

/// Rate table used to turn usage into money. Read-only for the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingConfig {
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default)]
    pub compute_per_minute: f64,
    #[serde(default)]
    pub models: BTreeMap<String, ModelRates>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange: Option<ExchangeRate>,
}

fn default_currency() -> String {
    "USD".to_string()
}
fn default_model() -> String {
    "claude-sonnet-4".to_string()
}

impl Default for PricingConfig {
    /// Template rates written by `config init`.
    fn default() -> Self {
        let mut models = BTreeMap::new();
        models.insert(
            "claude-sonnet-4".to_string(),
            ModelRates {
                input_per_1k: 0.003,
                output_per_1k: 0.015,
            },
        );
        models.insert(
            "claude-opus-4".to_string(),
            ModelRates {
                input_per_1k: 0.015,
                output_per_1k: 0.075,
            },
        );
        models.insert(
            "claude-haiku-4-5".to_string(),
            ModelRates {
                input_per_1k: 0.001,
                output_per_1k: 0.005,
            },
        );
        Self {
            currency: default_currency(),
            default_model: default_model(),
            models,
            compute_per_minute: 0.0,
            exchange: Some(ExchangeRate {
                currency: "EUR".to_string(),
                rate: 0.92,
            }),
        }
    }
}

/// Cost of a single run, split by source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunCost {
    pub token_cost: f64,
    pub compute_cost: f64,
}

impl RunCost {
    pub fn total(&self) -> f64 {
        self.token_cost + self.compute_cost
    }
}

/// Normalize a model name by stripping common prefixes and suffixes.
/// Examples:
///   "anthropic.claude-sonnet-4-v1:0" -> "claude-sonnet-4"
///   "claude-sonnet-4-20250514" -> "claude-sonnet-4"
fn normalize_model(model: &str) -> String {
    let mut name = model.trim().to_ascii_lowercase();

    if let Some(stripped) = name.strip_prefix("anthropic.") {
        name = stripped.to_string();
    }

    // Bedrock / Vertex suffixes like ":0" and "@001"
    if let Some(idx) = name.find(|c: char| c == ':' || c == '@') {
        name.truncate(idx);
    }
    if let Some(idx) = name.rfind("-v") {
        let tail = &name[idx + 2..];
        if !tail.is_empty() && tail.chars().all(|c| c.is_ascii_digit()) {
            name.truncate(idx);
        }
    }

    // Date suffix "-YYYYMMDD"
    let cut = name.len().saturating_sub(9);
    if cut > 0 {
        if let Some(tail) = name.get(cut..) {
            if tail.starts_with('-') && tail[1..].chars().all(|c| c.is_ascii_digit()) {
                name.truncate(cut);
            }
        }
    }

    name
}

impl PricingConfig {
    /// Look up rates for a model, falling back to `default_model`.
    pub fn rates_for(&self, model: Option<&str>) -> Result<&ModelRates, PricingError> {
        if let Some(model) = model {
            let normalized = normalize_model(model);
            if let Some(rates) = self
                .models
                .iter()
                .find(|(id, _)| normalize_model(id) == normalized)
                .map(|(_, r)| r)
            {
                return Ok(rates);
            }
        }
        self.models
            .get(&self.default_model)
            .ok_or_else(|| PricingError::UnknownModel {
                model: model.unwrap_or(&self.default_model).to_string(),
                default_model: self.default_model.clone(),
            })
    }

    /// Compute the cost of one run.
    ///
    /// `input/1000 * input_per_1k + output/1000 * output_per_1k + minutes * compute_per_minute`
    pub fn cost(
        &self,
        model: Option<&str>,
        input_tokens: u64,
        output_tokens: u64,
        minutes: f64,
    ) -> Result<RunCost, PricingError> {
        let token_cost = if input_tokens == 0 && output_tokens == 0 {
            0.0
        } else {
            let rates = self.rates_for(model)?;
            (input_tokens as f64 / 1000.0) * rates.input_per_1k
                + (output_tokens as f64 / 1000.0) * rates.output_per_1k
        };
        Ok(RunCost {
            token_cost,
            compute_cost: minutes * self.compute_per_minute,
        })
    }

    /// Convert an amount into the exchange currency, if one is configured.
    pub fn convert(&self, amount: f64) -> Option<(f64, &str)> {
        self.exchange
            .as_ref()
            .map(|x| (amount * x.rate, x.currency.as_str()))
    }

    /// Validation issues in the rate table (negative or non-finite rates).
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        for (id, rates) in &self.models {
            if !valid_rate(rates.input_per_1k) || !valid_rate(rates.output_per_1k) {
                issues.push(format!("Model '{}': rates must be finite and >= 0", id));
            }
        }
        if !valid_rate(self.compute_per_minute) {
            issues.push("compute_per_minute must be finite and >= 0".to_string());
        }
        // A compute-only table has no models and no default to resolve.
        if !self.models.is_empty() && !self.models.contains_key(&self.default_model) {
            issues.push(format!(
                "default_model '{}' has no entry in [pricing.models]",
                self.default_model
            ));
        }
        if let Some(x) = &self.exchange {
            if !valid_rate(x.rate) {
                issues.push(format!("Exchange rate to {} must be finite and >= 0", x.currency));
            }
        }
        issues
    }
}

fn valid_rate(rate: f64) -> bool {
    rate.is_finite() && rate >= 0.0
}
