//! Startup wiring shared by the commands: pricing, registry, stores, runner.

use std::sync::Arc;
use std::time::Duration;

use convogen_chat::GenerationRunner;
use convogen_config::AppConfig;
use convogen_core::AnnotationRecord;
use convogen_memory::{InMemoryAnnotationStore, InMemoryHistoryStore};
use convogen_providers::ModelRegistry;
use convogen_telemetry::{DEFAULT_CURRENCY, ModelPricing, PricingTable, UsageAccountant};
use rust_decimal::Decimal;
use tracing::debug;

/// Built-in prices plus the `[pricing.<model>]` sections.
pub fn pricing_table(config: &AppConfig) -> Arc<PricingTable> {
    let table = PricingTable::with_defaults();
    for (model, price) in &config.pricing {
        table.set(
            model.clone(),
            ModelPricing {
                input: price.input,
                output: price.output,
                unit: price.unit.unwrap_or(Decimal::ONE),
                currency: price
                    .currency
                    .clone()
                    .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
            },
        );
    }
    debug!(models = table.len(), "Pricing table ready");
    Arc::new(table)
}

pub fn registry(config: &AppConfig) -> ModelRegistry {
    let accountant = UsageAccountant::new(pricing_table(config));
    ModelRegistry::with_builtin(
        accountant,
        Duration::from_secs(config.generation.request_timeout_secs),
    )
}

/// Load `[[annotations]]` seeds into the store for the configured app.
pub async fn seed_annotations(config: &AppConfig, store: &InMemoryAnnotationStore) {
    for seed in &config.annotations {
        store
            .insert(AnnotationRecord {
                id: seed.id.clone().unwrap_or_default(),
                app_id: config.app_id.clone(),
                question: seed.question.clone(),
                content: seed.content.clone(),
            })
            .await;
    }
    debug!(count = config.annotations.len(), "Seeded annotations");
}

/// Everything a chat session needs.
pub struct Session {
    pub runner: Arc<GenerationRunner>,
    pub history: Arc<InMemoryHistoryStore>,
}

pub async fn session(config: &AppConfig) -> Session {
    let history = Arc::new(InMemoryHistoryStore::new());
    let annotations = Arc::new(InMemoryAnnotationStore::new());
    seed_annotations(config, &annotations).await;

    let runner = GenerationRunner::from_config(
        config,
        Arc::new(registry(config)),
        history.clone(),
        annotations,
    );
    Session {
        runner: Arc::new(runner),
        history,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convogen_config::{AnnotationSeed, PricingConfig};
    use convogen_core::AnnotationStore;

    #[test]
    fn config_prices_override_defaults() {
        let mut config = AppConfig::default();
        config.pricing.insert(
            "my-model".into(),
            PricingConfig {
                input: Decimal::new(1, 3),
                output: Decimal::new(2, 3),
                unit: None,
                currency: Some("EUR".into()),
            },
        );
        let table = pricing_table(&config);
        let price = table.resolve("my-model").unwrap();
        assert_eq!(price.unit, Decimal::ONE);
        assert_eq!(price.currency, "EUR");
    }

    #[test]
    fn builtin_presets_are_registered() {
        let registry = registry(&AppConfig::default());
        for name in ["zhipuai", "groq", "deepseek"] {
            assert!(registry.get(name).is_ok());
        }
    }

    #[tokio::test]
    async fn seeds_are_scoped_to_the_app() {
        let mut config = AppConfig::default();
        config.app_id = "demo".into();
        config.annotations.push(AnnotationSeed {
            id: Some("faq-1".into()),
            question: "Who are you?".into(),
            content: "A demo bot.".into(),
        });

        let store = InMemoryAnnotationStore::new();
        seed_annotations(&config, &store).await;
        let found = store.candidates("demo").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "faq-1");
    }
}
