//! Usage and cost accounting for convogen generations.
//!
//! Converts provider-reported token counts into priced usage records with
//! fixed-point decimal arithmetic, using a per-model price table that ships
//! with built-in defaults and accepts overrides from the config file.

pub mod accountant;
pub mod pricing;

pub use accountant::{
    FALLBACK_COMPLETION_TOKENS, FALLBACK_PROMPT_TOKENS, LATENCY_PLACEHOLDER_SECS, PriceInfo,
    PriceType, UsageAccountant, coerce_token_count,
};
pub use pricing::{DEFAULT_CURRENCY, ModelPricing, PricingTable};
