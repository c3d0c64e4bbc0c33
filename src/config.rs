//! Configuration types for receipt scanning and meal-plan generation.
//!
//! Two kinds of configuration live here:
//!
//! * [`ProviderConfig`] — the user's provider choice and API key. Persisted
//!   through [`crate::settings::SettingsStore`] and changed at runtime.
//! * [`PlannerConfig`] — deployment knobs (endpoints, models, timeouts, OCR
//!   language, Gemini fallback key), built once via [`PlannerConfigBuilder`].

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ── Providers ────────────────────────────────────────────────────────────

/// The generation providers the gateway can talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    /// Google Gemini. Works without a user key when a default key is configured.
    #[default]
    Gemini,
    /// DeepSeek chat completions. Requires a key.
    DeepSeek,
    /// OpenAI chat completions. Requires a key.
    #[serde(rename = "openai")]
    OpenAI,
}

impl ProviderId {
    pub const ALL: [ProviderId; 3] = [ProviderId::Gemini, ProviderId::DeepSeek, ProviderId::OpenAI];

    /// Stable identifier used in settings and on the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderId::Gemini => "gemini",
            ProviderId::DeepSeek => "deepseek",
            ProviderId::OpenAI => "openai",
        }
    }

    /// Whether a request cannot be sent without a user-supplied key.
    pub fn requires_api_key(self) -> bool {
        !matches!(self, ProviderId::Gemini)
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(ProviderId::Gemini),
            "deepseek" => Ok(ProviderId::DeepSeek),
            "openai" => Ok(ProviderId::OpenAI),
            other => Err(ConfigError::InvalidConfig(format!(
                "unknown provider '{other}' (expected gemini, deepseek or openai)"
            ))),
        }
    }
}

/// The user's provider selection.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ProviderConfig {
    pub provider_id: ProviderId,
    pub api_key: Option<String>,
}

impl ProviderConfig {
    pub fn new(provider_id: ProviderId, api_key: Option<String>) -> Self {
        Self {
            provider_id,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    /// The key, if one is set and not blank.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("provider_id", &self.provider_id)
            .field("api_key", &self.api_key().map(|_| "<redacted>"))
            .finish()
    }
}

// ── Planner configuration ────────────────────────────────────────────────

pub const DEFAULT_GEMINI_ENDPOINT: &str =
    "https://generativelanguage.googleapis.com/v1beta/models";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash-preview-09-2025";
pub const DEFAULT_DEEPSEEK_ENDPOINT: &str = "https://api.deepseek.com/chat/completions";
pub const DEFAULT_DEEPSEEK_MODEL: &str = "deepseek-chat";
pub const DEFAULT_OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

/// Deployment configuration shared by the OCR pipeline and provider gateway.
///
/// # Example
/// ```rust
/// use receipt2plan::PlannerConfig;
///
/// let config = PlannerConfig::builder()
///     .api_timeout_secs(30)
///     .ocr_language("deu")
///     .build()
///     .unwrap();
/// assert_eq!(config.ocr_language, "deu");
/// ```
#[derive(Clone)]
pub struct PlannerConfig {
    /// Base URL for Gemini models; the model and `:generateContent` are appended.
    pub gemini_endpoint: String,
    pub gemini_model: String,
    /// Key used for Gemini when the user has not supplied one.
    ///
    /// This is a configuration input (e.g. `GEMINI_API_KEY`); the library never
    /// invents one. When absent, Gemini requests are sent without a key.
    pub gemini_default_key: Option<String>,

    /// Full chat-completions URL for DeepSeek.
    pub deepseek_endpoint: String,
    pub deepseek_model: String,

    /// Full chat-completions URL for OpenAI.
    pub openai_endpoint: String,
    pub openai_model: String,

    /// Per-provider-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Download timeout for URL image inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Tesseract language code passed to the OCR engine. Default: `eng`.
    pub ocr_language: String,

    /// Convert the receipt to grayscale PNG before OCR. Default: false.
    ///
    /// Thermal-paper receipts photographed under coloured light often have a
    /// tinted background; flattening to luma helps Tesseract's binarisation.
    pub ocr_grayscale: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            gemini_endpoint: DEFAULT_GEMINI_ENDPOINT.to_string(),
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            gemini_default_key: None,
            deepseek_endpoint: DEFAULT_DEEPSEEK_ENDPOINT.to_string(),
            deepseek_model: DEFAULT_DEEPSEEK_MODEL.to_string(),
            openai_endpoint: DEFAULT_OPENAI_ENDPOINT.to_string(),
            openai_model: DEFAULT_OPENAI_MODEL.to_string(),
            api_timeout_secs: 60,
            download_timeout_secs: 120,
            ocr_language: "eng".to_string(),
            ocr_grayscale: false,
        }
    }
}

impl fmt::Debug for PlannerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlannerConfig")
            .field("gemini_endpoint", &self.gemini_endpoint)
            .field("gemini_model", &self.gemini_model)
            .field(
                "gemini_default_key",
                &self.gemini_default_key.as_ref().map(|_| "<redacted>"),
            )
            .field("deepseek_endpoint", &self.deepseek_endpoint)
            .field("deepseek_model", &self.deepseek_model)
            .field("openai_endpoint", &self.openai_endpoint)
            .field("openai_model", &self.openai_model)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("ocr_language", &self.ocr_language)
            .field("ocr_grayscale", &self.ocr_grayscale)
            .finish()
    }
}

impl PlannerConfig {
    /// Create a new builder for `PlannerConfig`.
    pub fn builder() -> PlannerConfigBuilder {
        PlannerConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PlannerConfig`].
#[derive(Debug)]
pub struct PlannerConfigBuilder {
    config: PlannerConfig,
}

impl PlannerConfigBuilder {
    pub fn gemini_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.gemini_endpoint = url.into();
        self
    }

    pub fn gemini_model(mut self, model: impl Into<String>) -> Self {
        self.config.gemini_model = model.into();
        self
    }

    pub fn gemini_default_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.config.gemini_default_key = if key.trim().is_empty() { None } else { Some(key) };
        self
    }

    pub fn deepseek_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.deepseek_endpoint = url.into();
        self
    }

    pub fn deepseek_model(mut self, model: impl Into<String>) -> Self {
        self.config.deepseek_model = model.into();
        self
    }

    pub fn openai_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.openai_endpoint = url.into();
        self
    }

    pub fn openai_model(mut self, model: impl Into<String>) -> Self {
        self.config.openai_model = model.into();
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs.max(1);
        self
    }

    pub fn ocr_language(mut self, lang: impl Into<String>) -> Self {
        self.config.ocr_language = lang.into();
        self
    }

    pub fn ocr_grayscale(mut self, v: bool) -> Self {
        self.config.ocr_grayscale = v;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PlannerConfig, ConfigError> {
        let c = &self.config;
        for (name, url) in [
            ("gemini_endpoint", &c.gemini_endpoint),
            ("deepseek_endpoint", &c.deepseek_endpoint),
            ("openai_endpoint", &c.openai_endpoint),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidConfig(format!(
                    "{name} must be an http(s) URL, got '{url}'"
                )));
            }
        }
        for (name, model) in [
            ("gemini_model", &c.gemini_model),
            ("deepseek_model", &c.deepseek_model),
            ("openai_model", &c.openai_model),
        ] {
            if model.trim().is_empty() {
                return Err(ConfigError::InvalidConfig(format!("{name} must not be empty")));
            }
        }
        if c.ocr_language.trim().is_empty()
            || !c
                .ocr_language
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '+')
        {
            return Err(ConfigError::InvalidConfig(format!(
                "OCR language must look like 'eng' or 'eng+deu', got '{}'",
                c.ocr_language
            )));
        }
        Ok(self.config)
    }
}
