//! Configuration for a menu-digitisation run.
//!
//! All behaviour is controlled through [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`] or loaded with [`PipelineConfig::from_env`].
//! Each external service gets its own credential block so a stage can be
//! constructed from exactly the settings it needs, and test doubles can be
//! wired in without touching the process environment.

use crate::error::MenuError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

// ── Environment variable names ───────────────────────────────────────────

pub const ENV_DOCUMENT_ENDPOINT: &str = "AZURE_ENDPOINT";
pub const ENV_DOCUMENT_KEY: &str = "AZURE_KEY";
pub const ENV_CHAT_ENDPOINT: &str = "AZURE_OPENAI_ENDPOINT";
pub const ENV_CHAT_KEY: &str = "AZURE_OPENAI_KEY";
pub const ENV_CHAT_DEPLOYMENT: &str = "AZURE_OPENAI_DEPLOYMENT_NAME";
pub const ENV_IMAGE_ENDPOINT: &str = "DALLE_3_ENDPOINT";
pub const ENV_IMAGE_KEY: &str = "DALLE_3_KEY";
pub const ENV_IMAGE_DEPLOYMENT: &str = "DALLE_3_DEPLOYMENT_NAME";

/// Credentials and options for the document-analysis (OCR) service.
#[derive(Clone, Serialize, Deserialize)]
pub struct DocumentAnalysisConfig {
    pub endpoint: String,
    #[serde(skip_serializing, default)]
    pub key: String,
    /// Analysis model. Default: `prebuilt-read`.
    pub model_id: String,
    /// Default: `2024-11-30`.
    pub api_version: String,
    /// Delay between polls of the long-running analyze operation. Default: 1000.
    pub poll_interval_ms: u64,
    /// Give up after this many polls. Default: 120.
    pub max_polls: u32,
    /// Analyze only page 1 of multi-page documents. Default: true.
    pub first_page_only: bool,
}

impl Default for DocumentAnalysisConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            key: String::new(),
            model_id: "prebuilt-read".into(),
            api_version: "2024-11-30".into(),
            poll_interval_ms: 1000,
            max_polls: 120,
            first_page_only: true,
        }
    }
}

/// Credentials and options for the chat-completion service.
#[derive(Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    pub endpoint: String,
    #[serde(skip_serializing, default)]
    pub key: String,
    pub deployment: String,
    /// Default: `2024-03-01-preview`.
    pub api_version: String,
    /// Default: 0.2. Grouping should stay close to the OCR text.
    pub temperature: f32,
    /// Default: 4096. Long menus produce long JSON.
    pub max_tokens: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            key: String::new(),
            deployment: String::new(),
            api_version: "2024-03-01-preview".into(),
            temperature: 0.2,
            max_tokens: 4096,
        }
    }
}

/// Credentials and options for the image-generation service.
#[derive(Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    pub endpoint: String,
    #[serde(skip_serializing, default)]
    pub key: String,
    pub deployment: String,
    /// Default: `2024-02-01`.
    pub api_version: String,
    /// Square output size. Default: `1024x1024`.
    pub size: String,
    /// Default: `standard`.
    pub quality: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            key: String::new(),
            deployment: String::new(),
            api_version: "2024-02-01".into(),
            size: "1024x1024".into(),
            quality: "standard".into(),
        }
    }
}

/// Configuration for a full pipeline run.
///
/// # Example
/// ```rust
/// use menu_visualiser::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .document_credentials("https://ocr.example.net/", "ocr-key")
///     .chat_credentials("https://chat.example.net/", "chat-key", "gpt-4o")
///     .image_credentials("https://img.example.net/", "img-key", "dall-e-3")
///     .max_retries(2)
///     .build()
///     .unwrap();
/// assert!(config.validate_credentials().is_ok());
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    pub document: DocumentAnalysisConfig,
    pub chat: ChatConfig,
    pub image: ImageConfig,

    /// Pre-constructed LLM provider used instead of the Azure chat deployment.
    /// When set, the `chat` credentials are not required.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Retries per external call on a transient failure. Default: 0.
    ///
    /// Zero keeps every stage single-shot; content-policy, auth and other
    /// 4xx failures are never retried regardless of this value.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled after each attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-request timeout for API calls in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Timeout for downloading a generated image in seconds. Default: 60.
    pub download_timeout_secs: u64,

    /// JPEG quality used when a generated image must be transcoded. Default: 90.
    pub jpeg_quality: u8,

    /// Optional progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            document: DocumentAnalysisConfig::default(),
            chat: ChatConfig::default(),
            image: ImageConfig::default(),
            provider: None,
            max_retries: 0,
            retry_backoff_ms: 500,
            api_timeout_secs: 120,
            download_timeout_secs: 60,
            jpeg_quality: 90,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("document_endpoint", &self.document.endpoint)
            .field("document_key", &redact(&self.document.key))
            .field("chat_endpoint", &self.chat.endpoint)
            .field("chat_key", &redact(&self.chat.key))
            .field("chat_deployment", &self.chat.deployment)
            .field("image_endpoint", &self.image.endpoint)
            .field("image_key", &redact(&self.image.key))
            .field("image_deployment", &self.image.deployment)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("jpeg_quality", &self.jpeg_quality)
            .finish()
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}

impl PipelineConfig {
    /// Create a new builder with defaults and no credentials.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Load credentials from the process environment.
    ///
    /// Missing variables are left empty rather than rejected here so the
    /// caller gets one [`MenuError::Configuration`] naming all of them from
    /// [`validate_credentials`](Self::validate_credentials).
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load credentials through an arbitrary lookup function.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).unwrap_or_default();
        let mut config = Self::default();
        config.document.endpoint = get(ENV_DOCUMENT_ENDPOINT);
        config.document.key = get(ENV_DOCUMENT_KEY);
        config.chat.endpoint = get(ENV_CHAT_ENDPOINT);
        config.chat.key = get(ENV_CHAT_KEY);
        config.chat.deployment = get(ENV_CHAT_DEPLOYMENT);
        config.image.endpoint = get(ENV_IMAGE_ENDPOINT);
        config.image.key = get(ENV_IMAGE_KEY);
        config.image.deployment = get(ENV_IMAGE_DEPLOYMENT);
        config
    }

    /// Credentials needed by the document-analysis service that are missing.
    pub fn missing_document_credentials(&self) -> Vec<String> {
        missing(&[
            (ENV_DOCUMENT_ENDPOINT, &self.document.endpoint),
            (ENV_DOCUMENT_KEY, &self.document.key),
        ])
    }

    /// Credentials needed by the chat service that are missing.
    ///
    /// Always empty when a pre-built provider is configured.
    pub fn missing_chat_credentials(&self) -> Vec<String> {
        if self.provider.is_some() {
            return Vec::new();
        }
        missing(&[
            (ENV_CHAT_ENDPOINT, &self.chat.endpoint),
            (ENV_CHAT_KEY, &self.chat.key),
            (ENV_CHAT_DEPLOYMENT, &self.chat.deployment),
        ])
    }

    /// Credentials needed by the image service that are missing.
    pub fn missing_image_credentials(&self) -> Vec<String> {
        missing(&[
            (ENV_IMAGE_ENDPOINT, &self.image.endpoint),
            (ENV_IMAGE_KEY, &self.image.key),
            (ENV_IMAGE_DEPLOYMENT, &self.image.deployment),
        ])
    }

    /// Fail with every missing credential at once.
    pub fn validate_credentials(&self) -> Result<(), MenuError> {
        let mut all = self.missing_document_credentials();
        all.extend(self.missing_chat_credentials());
        all.extend(self.missing_image_credentials());
        if all.is_empty() {
            Ok(())
        } else {
            Err(MenuError::Configuration { missing: all })
        }
    }
}

fn missing(fields: &[(&str, &String)]) -> Vec<String> {
    fields
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name.to_string())
        .collect()
}

/// Builder for [`PipelineConfig`].
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl fmt::Debug for PipelineConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl PipelineConfigBuilder {
    pub fn document_credentials(mut self, endpoint: impl Into<String>, key: impl Into<String>) -> Self {
        self.config.document.endpoint = endpoint.into();
        self.config.document.key = key.into();
        self
    }

    pub fn chat_credentials(
        mut self,
        endpoint: impl Into<String>,
        key: impl Into<String>,
        deployment: impl Into<String>,
    ) -> Self {
        self.config.chat.endpoint = endpoint.into();
        self.config.chat.key = key.into();
        self.config.chat.deployment = deployment.into();
        self
    }

    pub fn image_credentials(
        mut self,
        endpoint: impl Into<String>,
        key: impl Into<String>,
        deployment: impl Into<String>,
    ) -> Self {
        self.config.image.endpoint = endpoint.into();
        self.config.image.key = key.into();
        self.config.image.deployment = deployment.into();
        self
    }

    pub fn document(mut self, document: DocumentAnalysisConfig) -> Self {
        self.config.document = document;
        self
    }

    pub fn chat(mut self, chat: ChatConfig) -> Self {
        self.config.chat = chat;
        self
    }

    pub fn image(mut self, image: ImageConfig) -> Self {
        self.config.image = image;
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.chat.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.chat.max_tokens = n;
        self
    }

    pub fn image_size(mut self, size: impl Into<String>) -> Self {
        self.config.image.size = size.into();
        self
    }

    pub fn first_page_only(mut self, v: bool) -> Self {
        self.config.document.first_page_only = v;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    ///
    /// Credentials are not checked here; see
    /// [`PipelineConfig::validate_credentials`].
    pub fn build(self) -> Result<PipelineConfig, MenuError> {
        let c = &self.config;
        if !(1..=100).contains(&c.jpeg_quality) {
            return Err(MenuError::InvalidConfig(format!(
                "JPEG quality must be 1–100, got {}",
                c.jpeg_quality
            )));
        }
        if !is_square_size(&c.image.size) {
            return Err(MenuError::InvalidConfig(format!(
                "Image size must be square WIDTHxHEIGHT, got '{}'",
                c.image.size
            )));
        }
        if c.api_timeout_secs == 0 || c.download_timeout_secs == 0 {
            return Err(MenuError::InvalidConfig("Timeouts must be ≥ 1 second".into()));
        }
        if c.document.max_polls == 0 {
            return Err(MenuError::InvalidConfig("max_polls must be ≥ 1".into()));
        }
        Ok(self.config)
    }
}

/// `"1024x1024"` → true; `"1792x1024"` → false.
fn is_square_size(size: &str) -> bool {
    match size.split_once('x') {
        Some((w, h)) => match (w.parse::<u32>(), h.parse::<u32>()) {
            (Ok(w), Ok(h)) => w == h && w > 0,
            _ => false,
        },
        None => false,
    }
}
