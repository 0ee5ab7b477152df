//! Usage settlement: raw provider token counts in, priced [`LlmUsage`] out.
//!
//! Providers report token counts as integers, floats or numeric strings,
//! and some omit them entirely. Counts are coerced to integers; anything
//! missing or unparseable falls back to a fixed default so a finished
//! answer is never thrown away over bookkeeping.

use std::sync::Arc;

use convogen_core::{GenerationError, LlmUsage};
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::Value;
use tracing::debug;

use crate::pricing::{ModelPricing, PricingTable};

/// Prompt tokens assumed when the provider does not report them.
pub const FALLBACK_PROMPT_TOKENS: u64 = 10;
/// Completion tokens assumed when the provider does not report them.
pub const FALLBACK_COMPLETION_TOKENS: u64 = 20;
/// Latency reported for streamed generations, in seconds.
pub const LATENCY_PLACEHOLDER_SECS: f64 = 1.0;

const PRICE_DECIMAL_PLACES: u32 = 7;

/// Which side of the exchange a price applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceType {
    Input,
    Output,
}

/// The priced amount for one token class.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceInfo {
    pub unit_price: Decimal,
    pub unit: Decimal,
    pub total_amount: Decimal,
    pub currency: String,
}

/// Coerce a raw token count.
///
/// Floats are truncated toward zero, strings are parsed as numbers.
/// Negative, non-finite or non-numeric values yield `None`.
pub fn coerce_token_count(value: &Value) -> Option<u64> {
    let as_float = match value {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                return Some(u);
            }
            n.as_f64()?
        }
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    (as_float.is_finite() && as_float >= 0.0 && as_float <= u64::MAX as f64)
        .then(|| as_float.trunc() as u64)
}

/// Converts token counts into a priced usage record.
#[derive(Clone)]
pub struct UsageAccountant {
    prices: Arc<PricingTable>,
}

impl UsageAccountant {
    pub fn new(prices: Arc<PricingTable>) -> Self {
        Self { prices }
    }

    /// Settle a provider's raw `usage` object for `model`.
    ///
    /// Each class falls back independently to its default count.
    pub fn settle(&self, model: &str, raw_usage: Option<&Value>) -> Result<LlmUsage, GenerationError> {
        let count = |key: &str, fallback: u64| {
            let coerced = raw_usage.and_then(|u| u.get(key)).and_then(coerce_token_count);
            coerced.unwrap_or_else(|| {
                debug!(model, field = key, fallback, "Token count missing, using fallback");
                fallback
            })
        };
        let prompt_tokens = count("prompt_tokens", FALLBACK_PROMPT_TOKENS);
        let completion_tokens = count("completion_tokens", FALLBACK_COMPLETION_TOKENS);
        self.calc_usage(model, prompt_tokens, completion_tokens)
    }

    /// Price known token counts for `model`.
    pub fn calc_usage(
        &self,
        model: &str,
        prompt_tokens: u64,
        completion_tokens: u64,
    ) -> Result<LlmUsage, GenerationError> {
        let pricing = self.prices.resolve(model).unwrap_or_else(|| {
            debug!(model, "No pricing configured, usage is free");
            ModelPricing::free()
        });

        let prompt = price(&pricing, PriceType::Input, prompt_tokens)?;
        let completion = price(&pricing, PriceType::Output, completion_tokens)?;

        let total_tokens = prompt_tokens
            .checked_add(completion_tokens)
            .ok_or_else(|| GenerationError::Accounting("total token count overflows".into()))?;
        let total_price = prompt
            .total_amount
            .checked_add(completion.total_amount)
            .ok_or_else(|| GenerationError::Accounting("total price overflows".into()))?
            .normalize();

        Ok(LlmUsage {
            prompt_tokens,
            prompt_unit_price: prompt.unit_price,
            prompt_price_unit: prompt.unit,
            prompt_price: prompt.total_amount,
            completion_tokens,
            completion_unit_price: completion.unit_price,
            completion_price_unit: completion.unit,
            completion_price: completion.total_amount,
            total_tokens,
            total_price,
            currency: pricing.currency,
            latency: LATENCY_PLACEHOLDER_SECS,
        })
    }
}

/// `tokens × unit_price × unit`, rounded to 7 places, midpoint away from zero.
pub fn price(pricing: &ModelPricing, kind: PriceType, tokens: u64) -> Result<PriceInfo, GenerationError> {
    let unit_price = match kind {
        PriceType::Input => pricing.input,
        PriceType::Output => pricing.output,
    };
    let overflow = || GenerationError::Accounting(format!("price of {tokens} tokens overflows"));

    let amount = Decimal::from(tokens)
        .checked_mul(unit_price)
        .and_then(|a| a.checked_mul(pricing.unit))
        .ok_or_else(overflow)?
        .round_dp_with_strategy(PRICE_DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
        .normalize();

    Ok(PriceInfo {
        unit_price,
        unit: pricing.unit,
        total_amount: amount,
        currency: pricing.currency.clone(),
    })
}
