//! Typed provider credentials.
//!
//! Everything the streaming client needs to reach an endpoint, validated
//! once at construction so invocation code never inspects raw maps.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CredentialsError, GenerationError};

/// Default frame delimiter for streamed responses.
pub const DEFAULT_STREAM_DELIMITER: &str = "\n\n";

/// Which upstream endpoint family a model is served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionMode {
    #[default]
    Chat,
    Completion,
}

impl CompletionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Completion => "completion",
        }
    }

    /// Path appended to the endpoint URL.
    pub fn endpoint_path(&self) -> &'static str {
        match self {
            Self::Chat => "chat/completions",
            Self::Completion => "completions",
        }
    }
}

impl FromStr for CompletionMode {
    type Err = CredentialsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chat" => Ok(Self::Chat),
            "completion" => Ok(Self::Completion),
            other => Err(CredentialsError::UnknownMode(other.to_string())),
        }
    }
}

impl fmt::Display for CompletionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated credentials for one provider.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    endpoint_url: Option<String>,
    api_key: Option<String>,
    mode: CompletionMode,
    stream_mode_delimiter: String,
    extra_headers: BTreeMap<String, String>,
}

impl Credentials {
    pub fn builder() -> CredentialsBuilder {
        CredentialsBuilder::default()
    }

    /// The endpoint URL, always ending in `/`.
    ///
    /// A missing endpoint is a configuration error of the generation, not
    /// of construction: it surfaces as one error event when invoked.
    pub fn endpoint(&self) -> Result<&str, GenerationError> {
        self.endpoint_url
            .as_deref()
            .ok_or_else(|| GenerationError::Config("endpoint_url is not configured".into()))
    }

    pub fn endpoint_url(&self) -> Option<&str> {
        self.endpoint_url.as_deref()
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub fn mode(&self) -> CompletionMode {
        self.mode
    }

    pub fn stream_mode_delimiter(&self) -> &str {
        &self.stream_mode_delimiter
    }

    pub fn extra_headers(&self) -> &BTreeMap<String, String> {
        &self.extra_headers
    }

    /// Copy with the mode and endpoint pinned, used by vendor presets.
    pub fn pinned(&self, mode: CompletionMode, endpoint_url: &str) -> Self {
        Self {
            endpoint_url: normalize_endpoint(Some(endpoint_url)),
            mode,
            ..self.clone()
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("endpoint_url", &self.endpoint_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("mode", &self.mode)
            .field("stream_mode_delimiter", &self.stream_mode_delimiter)
            .field("extra_headers", &self.extra_headers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            endpoint_url: None,
            api_key: None,
            mode: CompletionMode::Chat,
            stream_mode_delimiter: DEFAULT_STREAM_DELIMITER.to_string(),
            extra_headers: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct CredentialsBuilder {
    endpoint_url: Option<String>,
    api_key: Option<String>,
    mode: CompletionMode,
    stream_mode_delimiter: Option<String>,
    extra_headers: BTreeMap<String, String>,
}

impl CredentialsBuilder {
    pub fn endpoint_url(mut self, url: impl Into<String>) -> Self {
        self.endpoint_url = Some(url.into());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn mode(mut self, mode: CompletionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn stream_mode_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.stream_mode_delimiter = Some(delimiter.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(name.into(), value.into());
        self
    }

    pub fn extra_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.extra_headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn build(self) -> Result<Credentials, CredentialsError> {
        let stream_mode_delimiter = match self.stream_mode_delimiter {
            Some(d) if d.is_empty() => return Err(CredentialsError::EmptyDelimiter),
            Some(d) => d,
            None => DEFAULT_STREAM_DELIMITER.to_string(),
        };

        for (name, value) in &self.extra_headers {
            validate_header(name, value)?;
        }

        let api_key = self
            .api_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());

        Ok(Credentials {
            endpoint_url: normalize_endpoint(self.endpoint_url.as_deref()),
            api_key,
            mode: self.mode,
            stream_mode_delimiter,
            extra_headers: self.extra_headers,
        })
    }
}

fn normalize_endpoint(url: Option<&str>) -> Option<String> {
    let url = url?.trim();
    if url.is_empty() {
        return None;
    }
    if url.ends_with('/') {
        Some(url.to_string())
    } else {
        Some(format!("{url}/"))
    }
}

fn validate_header(name: &str, value: &str) -> Result<(), CredentialsError> {
    let invalid = |reason: &str| CredentialsError::InvalidHeader {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("empty name"));
    }
    // RFC 9110 token characters
    let token = |c: char| c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c);
    if !name.chars().all(token) {
        return Err(invalid("name is not a valid token"));
    }
    if value.chars().any(|c| (c.is_control() && c != '\t') || !c.is_ascii()) {
        return Err(invalid("value contains control or non-ASCII characters"));
    }
    Ok(())
}
