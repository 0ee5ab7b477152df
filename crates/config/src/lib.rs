//! Configuration loading, validation, and management for convogen.
//!
//! Loads configuration from `~/.convogen/config.toml` with environment
//! variable overrides. Validates all settings at startup, and turns provider
//! sections into typed [`Credentials`] so nothing downstream reads raw maps.

use convogen_core::{CompletionMode, Credentials, CredentialsError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.convogen/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Registry name of the model backend to use
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Model name sent upstream
    #[serde(default = "default_model")]
    pub default_model: String,

    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Max tokens per response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Context window of the default model, in tokens
    #[serde(default = "default_context_size")]
    pub context_size: u32,

    /// Scope for annotations
    #[serde(default = "default_app_id")]
    pub app_id: String,

    /// Provider credential sections, keyed by registry name
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub annotation: AnnotationConfig,

    /// Seed annotations loaded into the in-memory store
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<AnnotationSeed>,

    /// Model price overrides, keyed by model name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pricing: BTreeMap<String, PricingConfig>,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub prompt: PromptConfig,
}

fn default_provider() -> String {
    "openai_api_compatible".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    512
}
fn default_context_size() -> u32 {
    4096
}
fn default_app_id() -> String {
    "default".into()
}
fn default_true() -> bool {
    true
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

/// One `[providers.<name>]` section.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// "chat" or "completion"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,

    /// Frame delimiter for streamed responses (default: two newlines)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_mode_delimiter: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_headers: BTreeMap<String, String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("endpoint_url", &self.endpoint_url)
            .field("api_key", &redact(&self.api_key))
            .field("mode", &self.mode)
            .field("stream_mode_delimiter", &self.stream_mode_delimiter)
            .field("extra_headers", &self.extra_headers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ProviderConfig {
    /// Validate and convert into typed credentials.
    pub fn to_credentials(&self) -> Result<Credentials, CredentialsError> {
        let mut builder = Credentials::builder().extra_headers(self.extra_headers.clone());
        if let Some(url) = &self.endpoint_url {
            builder = builder.endpoint_url(url.as_str());
        }
        if let Some(key) = &self.api_key {
            builder = builder.api_key(key.as_str());
        }
        if let Some(mode) = &self.mode {
            builder = builder.mode(mode.parse::<CompletionMode>()?);
        }
        if let Some(delimiter) = &self.stream_mode_delimiter {
            builder = builder.stream_mode_delimiter(delimiter.as_str());
        }
        builder.build()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Upper bound on history tokens included in a prompt
    #[serde(default = "default_max_token_limit")]
    pub max_token_limit: usize,

    /// Max turns fetched from the history store
    #[serde(default = "default_message_limit")]
    pub message_limit: usize,
}

fn default_max_token_limit() -> usize {
    2000
}
fn default_message_limit() -> usize {
    500
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_token_limit: default_max_token_limit(),
            message_limit: default_message_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Minimum similarity for a stored question to answer a query
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
}

fn default_score_threshold() -> f32 {
    0.9
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            score_threshold: default_score_threshold(),
        }
    }
}

/// A `[[annotations]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationSeed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub question: String,
    pub content: String,
}

/// A `[pricing.<model>]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    pub input: Decimal,
    pub output: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Upstream request timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Pacing of replayed annotation answers
    #[serde(default = "default_annotation_char_delay_ms")]
    pub annotation_char_delay_ms: u64,
}

fn default_request_timeout_secs() -> u64 {
    300
}
fn default_annotation_char_delay_ms() -> u64 {
    10
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            annotation_char_delay_ms: default_annotation_char_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptConfig {
    /// Instructions placed before the conversation; may use `{{variables}}`
    #[serde(default)]
    pub pre_prompt: String,
}

impl AppConfig {
    /// Load configuration from the default path (~/.convogen/config.toml).
    ///
    /// Environment variables override the file:
    /// - `CONVOGEN_PROVIDER`, `CONVOGEN_MODEL`
    /// - `CONVOGEN_API_KEY`, `CONVOGEN_ENDPOINT_URL` (applied to the
    ///   default provider's section)
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production).
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(provider) = lookup("CONVOGEN_PROVIDER") {
            self.default_provider = provider;
        }
        if let Some(model) = lookup("CONVOGEN_MODEL") {
            self.default_model = model;
        }

        let api_key = lookup("CONVOGEN_API_KEY");
        let endpoint_url = lookup("CONVOGEN_ENDPOINT_URL");
        if api_key.is_none() && endpoint_url.is_none() {
            return;
        }
        let section = self
            .providers
            .entry(self.default_provider.clone())
            .or_default();
        if api_key.is_some() {
            section.api_key = api_key;
        }
        if endpoint_url.is_some() {
            section.endpoint_url = endpoint_url;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".convogen")
    }

    /// Credentials for a provider. A provider without a section gets empty
    /// credentials, which fail at invocation for lack of an endpoint.
    pub fn credentials_for(&self, provider: &str) -> Result<Credentials, ConfigError> {
        match self.providers.get(provider) {
            Some(section) => section.to_credentials().map_err(|e| {
                ConfigError::ValidationError(format!("providers.{provider}: {e}"))
            }),
            None => Ok(Credentials::default()),
        }
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.default_max_tokens >= self.context_size {
            return Err(ConfigError::ValidationError(
                "default_max_tokens must be smaller than context_size".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.annotation.score_threshold) {
            return Err(ConfigError::ValidationError(
                "annotation.score_threshold must be between 0.0 and 1.0".into(),
            ));
        }

        if self.memory.message_limit == 0 {
            return Err(ConfigError::ValidationError(
                "memory.message_limit must be > 0".into(),
            ));
        }

        if self.generation.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "generation.request_timeout_secs must be > 0".into(),
            ));
        }

        for (name, pricing) in &self.pricing {
            if pricing.input.is_sign_negative() || pricing.output.is_sign_negative() {
                return Err(ConfigError::ValidationError(format!(
                    "pricing.{name}: prices must not be negative"
                )));
            }
        }

        for name in self.providers.keys() {
            self.credentials_for(name)?;
        }

        Ok(())
    }

    /// Generate a default config TOML string (for the `config` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        let mut providers = BTreeMap::new();
        providers.insert(
            default_provider(),
            ProviderConfig {
                endpoint_url: Some("https://api.openai.com/v1".into()),
                mode: Some(CompletionMode::Chat.as_str().into()),
                ..ProviderConfig::default()
            },
        );

        Self {
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            context_size: default_context_size(),
            app_id: default_app_id(),
            providers,
            memory: MemoryConfig::default(),
            annotation: AnnotationConfig::default(),
            annotations: vec![],
            pricing: BTreeMap::new(),
            generation: GenerationConfig::default(),
            prompt: PromptConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
