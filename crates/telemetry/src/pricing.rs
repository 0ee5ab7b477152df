//! Per-model price table.
//!
//! Each model has an input and output unit price plus a price unit, so
//! `amount = tokens × unit_price × price_unit`. Built-in prices are in USD
//! per 1 million tokens (`unit = 0.000001`). Custom pricing can be added at
//! runtime from the TOML config.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Currency used when a model has no configured price.
pub const DEFAULT_CURRENCY: &str = "USD";

/// Unit prices for one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Price per unit of prompt tokens.
    pub input: Decimal,
    /// Price per unit of completion tokens.
    pub output: Decimal,
    /// Scale applied to both prices.
    #[serde(default = "default_unit")]
    pub unit: Decimal,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_unit() -> Decimal {
    Decimal::ONE
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.into()
}

impl ModelPricing {
    /// Prices quoted per 1M tokens.
    pub fn per_million(input: Decimal, output: Decimal) -> Self {
        Self {
            input,
            output,
            unit: Decimal::new(1, 6),
            currency: DEFAULT_CURRENCY.into(),
        }
    }

    /// Zero prices, used for models without an entry.
    pub fn free() -> Self {
        Self {
            input: Decimal::ZERO,
            output: Decimal::ZERO,
            unit: Decimal::ZERO,
            currency: DEFAULT_CURRENCY.into(),
        }
    }
}

/// Thread-safe pricing table with built-in defaults and custom overrides.
pub struct PricingTable {
    prices: RwLock<HashMap<String, ModelPricing>>,
}

impl PricingTable {
    /// Create a pricing table with built-in model prices.
    pub fn with_defaults() -> Self {
        let mut prices = HashMap::new();
        let mut add = |name: &str, input: i64, output: i64, scale: u32| {
            prices.insert(
                name.to_string(),
                ModelPricing::per_million(Decimal::new(input, scale), Decimal::new(output, scale)),
            );
        };

        // ── OpenAI ─────────────────────────────────────────────────
        add("openai/gpt-4o", 250, 1000, 2);
        add("openai/gpt-4o-mini", 15, 60, 2);
        add("openai/gpt-4-turbo", 1000, 3000, 2);
        add("openai/gpt-3.5-turbo", 50, 150, 2);

        // ── DeepSeek ───────────────────────────────────────────────
        add("deepseek/deepseek-chat", 27, 110, 2);
        add("deepseek/deepseek-reasoner", 55, 219, 2);

        // ── Groq ───────────────────────────────────────────────────
        add("groq/llama-3.1-8b-instant", 5, 8, 2);
        add("groq/llama-3.3-70b-versatile", 59, 79, 2);
        add("groq/mixtral-8x7b-32768", 24, 24, 2);

        // ── Zhipu AI (CNY) ─────────────────────────────────────────
        for (name, input, output) in [
            ("zhipuai/glm-4", 100, 100),
            ("zhipuai/glm-4-air", 1, 1),
            ("zhipuai/glm-4-flash", 0, 0),
        ] {
            let mut pricing =
                ModelPricing::per_million(Decimal::new(input, 0), Decimal::new(output, 0));
            pricing.currency = "CNY".into();
            prices.insert(name.to_string(), pricing);
        }

        Self {
            prices: RwLock::new(prices),
        }
    }

    /// Create an empty pricing table.
    pub fn empty() -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
        }
    }

    /// Exact-name lookup.
    pub fn get(&self, model: &str) -> Option<ModelPricing> {
        let prices = self.prices.read().unwrap_or_else(PoisonError::into_inner);
        prices.get(model).cloned()
    }

    /// Add or update pricing for a model.
    pub fn set(&self, model: impl Into<String>, pricing: ModelPricing) {
        let mut prices = self.prices.write().unwrap_or_else(PoisonError::into_inner);
        prices.insert(model.into(), pricing);
    }

    /// Find the pricing for a model name as reported by a provider.
    ///
    /// Tries an exact match first, then the bare name under any provider
    /// prefix (`gpt-4o` → `openai/gpt-4o`), then the longest key whose bare
    /// name prefixes the model (`gpt-4o-mini-2024-07-18` → `gpt-4o-mini`).
    pub fn resolve(&self, model: &str) -> Option<ModelPricing> {
        let prices = self.prices.read().unwrap_or_else(PoisonError::into_inner);

        if let Some(p) = prices.get(model) {
            return Some(p.clone());
        }

        let model_lower = model.to_lowercase();
        let bare_model = model_lower.rsplit('/').next().unwrap_or(&model_lower);

        if let Some(p) = prices
            .iter()
            .find(|(key, _)| key.rsplit('/').next() == Some(bare_model))
            .map(|(_, p)| p)
        {
            return Some(p.clone());
        }

        prices
            .iter()
            .filter_map(|(key, pricing)| {
                let bare_key = key.rsplit('/').next().unwrap_or(key).to_lowercase();
                bare_model
                    .starts_with(&bare_key)
                    .then_some((bare_key.len(), pricing))
            })
            .max_by_key(|(len, _)| *len)
            .map(|(_, p)| p.clone())
    }

    /// List all known model names, sorted.
    pub fn models(&self) -> Vec<String> {
        let prices = self.prices.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = prices.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.prices.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_has_models() {
        let table = PricingTable::with_defaults();
        assert!(table.len() >= 10);
        assert!(table.get("openai/gpt-4o").is_some());
    }

    #[test]
    fn resolve_strips_provider_prefix() {
        let table = PricingTable::with_defaults();
        let p = table.resolve("gpt-4o").unwrap();
        assert_eq!(p.input, Decimal::new(250, 2));
        assert_eq!(p.unit, Decimal::new(1, 6));
    }

    #[test]
    fn resolve_matches_versioned_names_to_longest_key() {
        let table = PricingTable::with_defaults();
        let p = table.resolve("gpt-4o-mini-2024-07-18").unwrap();
        assert_eq!(p.input, Decimal::new(15, 2));
    }

    #[test]
    fn unknown_model_resolves_to_none() {
        let table = PricingTable::with_defaults();
        assert!(table.resolve("unknown/model-xyz").is_none());
    }

    #[test]
    fn set_overrides_existing() {
        let table = PricingTable::with_defaults();
        table.set(
            "openai/gpt-4o",
            ModelPricing::per_million(Decimal::new(5, 0), Decimal::new(20, 0)),
        );
        assert_eq!(table.resolve("gpt-4o").unwrap().input, Decimal::new(5, 0));
    }

    #[test]
    fn zhipu_prices_are_in_cny() {
        let table = PricingTable::with_defaults();
        assert_eq!(table.resolve("glm-4").unwrap().currency, "CNY");
    }

    #[test]
    fn pricing_deserializes_with_defaults() {
        let p: ModelPricing = toml::from_str("input = \"0.001\"\noutput = \"0.002\"").unwrap();
        assert_eq!(p.unit, Decimal::ONE);
        assert_eq!(p.currency, "USD");
        assert_eq!(p.output, Decimal::new(2, 3));
    }
}
