//! Model registry: the explicit map from provider name to model backend.
//!
//! Built once at startup and handed to the generation runner.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use convogen_core::{GenerationError, LargeLanguageModel};
use convogen_telemetry::UsageAccountant;
use tracing::debug;

use crate::openai_compat::OpenAiCompatModel;
use crate::preset::VendorPreset;

/// Registry name of the generic OpenAI-compatible backend.
pub const OPENAI_COMPATIBLE: &str = "openai_api_compatible";

/// Resolves provider names to model backends.
#[derive(Default)]
pub struct ModelRegistry {
    models: HashMap<String, Arc<dyn LargeLanguageModel>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The generic OpenAI-compatible backend plus the built-in vendor presets.
    pub fn with_builtin(accountant: UsageAccountant, timeout: Duration) -> Self {
        let generic: Arc<dyn LargeLanguageModel> =
            Arc::new(OpenAiCompatModel::new(OPENAI_COMPATIBLE, accountant, timeout));

        let mut registry = Self::new();
        registry.register(generic.clone());
        registry.register(Arc::new(VendorPreset::zhipuai(generic.clone())));
        registry.register(Arc::new(VendorPreset::groq(generic.clone())));
        registry.register(Arc::new(VendorPreset::deepseek(generic)));
        registry
    }

    /// Register a model under its own name, replacing any previous entry.
    pub fn register(&mut self, model: Arc<dyn LargeLanguageModel>) {
        let name = model.name().to_string();
        debug!(provider = %name, "Registering model");
        self.models.insert(name, model);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn LargeLanguageModel>, GenerationError> {
        self.models
            .get(name)
            .cloned()
            .ok_or_else(|| GenerationError::ModelNotRegistered(name.to_string()))
    }

    /// All registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.models.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
