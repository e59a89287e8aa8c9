//! External services the pipeline depends on.
//!
//! Each service is a trait so stages hold an `Arc<dyn …>` and never know
//! whether they talk to Azure, another provider, or a test double:
//!
//! | Trait | Production implementation |
//! |-------|---------------------------|
//! | [`DocumentAnalyzer`] | [`document::AzureDocumentClient`] (Document Intelligence `prebuilt-read`) |
//! | [`TextGenerator`] | [`chat::AzureChatClient`], or [`provider::ProviderTextGenerator`] over any `edgequake_llm` provider |
//! | [`ImageGenerator`] | [`image::AzureImageClient`] (DALL·E 3 deployment) |
//!
//! All three return [`CapabilityError`]; [`retry::with_retries`] can wrap
//! any call with bounded exponential backoff for transient failures.

pub mod chat;
pub mod document;
pub mod image;
pub mod provider;
pub mod retry;

use crate::error::CapabilityError;
use async_trait::async_trait;
use std::time::Duration;

/// Text recognised on one page, line by line in reading order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalyzedPage {
    pub lines: Vec<String>,
}

/// Result of a document analysis: pages in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalyzedDocument {
    pub pages: Vec<AnalyzedPage>,
}

impl AnalyzedDocument {
    /// Convenience for a single-page document.
    pub fn single_page<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            pages: vec![AnalyzedPage {
                lines: lines.into_iter().map(Into::into).collect(),
            }],
        }
    }
}

/// One image-generation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub prompt: String,
    /// Number of images. The pipeline always asks for 1.
    pub count: u8,
    /// Square resolution, e.g. `1024x1024`.
    pub size: String,
}

/// OCR: raw document bytes in, paginated lines out.
#[async_trait]
pub trait DocumentAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        document: &[u8],
        content_type: &str,
    ) -> Result<AnalyzedDocument, CapabilityError>;
}

/// Chat completion: one system instruction and one user message in,
/// one completion out.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String, CapabilityError>;
}

/// Text-to-image: a prompt in, the downloaded image bytes out.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, request: &ImageRequest) -> Result<Vec<u8>, CapabilityError>;
}

// ── Shared HTTP helpers ──────────────────────────────────────────────────

/// Build a `reqwest` client with a per-request timeout.
pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
}

/// Join an endpoint base URL and a path without doubling slashes.
pub(crate) fn join_url(endpoint: &str, path: &str) -> String {
    format!(
        "{}/{}",
        endpoint.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Pass a successful response through; turn anything else into a
/// classified [`CapabilityError`].
pub(crate) async fn check_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, CapabilityError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status.as_u16(), body, retry_after))
}

/// Map an HTTP error status and body to a [`CapabilityError`].
pub(crate) fn classify_status(status: u16, body: String, retry_after: Option<u64>) -> CapabilityError {
    match status {
        400 if is_content_policy_body(&body) => CapabilityError::ContentPolicy(body),
        401 | 403 => CapabilityError::Auth(body),
        429 => CapabilityError::RateLimited {
            retry_after_secs: retry_after,
        },
        500..=599 => CapabilityError::Server { status, body },
        _ => CapabilityError::Rejected { status, body },
    }
}

fn is_content_policy_body(body: &str) -> bool {
    body.contains("content_policy_violation") || body.contains("contentFilter")
}
