//! Azure OpenAI image-generations client (DALL·E 3).
//!
//! Requests one square image with `response_format = "url"`, then downloads
//! the rendered file with a separate, shorter timeout.

use super::{check_status, http_client, join_url, ImageGenerator, ImageRequest};
use crate::config::ImageConfig;
use crate::error::CapabilityError;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// REST client for an image-generation deployment.
pub struct AzureImageClient {
    http: reqwest::Client,
    download: reqwest::Client,
    config: ImageConfig,
    timeout_secs: u64,
    download_timeout_secs: u64,
}

impl AzureImageClient {
    pub fn new(
        config: ImageConfig,
        timeout_secs: u64,
        download_timeout_secs: u64,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: http_client(timeout_secs)?,
            download: http_client(download_timeout_secs)?,
            config,
            timeout_secs,
            download_timeout_secs,
        })
    }

    fn generations_url(&self) -> String {
        join_url(
            &self.config.endpoint,
            &format!(
                "openai/deployments/{}/images/generations?api-version={}",
                self.config.deployment, self.config.api_version
            ),
        )
    }

    fn request_body<'a>(&'a self, request: &'a ImageRequest) -> GenerationRequest<'a> {
        GenerationRequest {
            prompt: &request.prompt,
            model: &self.config.deployment,
            n: request.count,
            size: &request.size,
            quality: &self.config.quality,
            response_format: "url",
        }
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, CapabilityError> {
        let response = self
            .download
            .get(url)
            .send()
            .await
            .map_err(|e| CapabilityError::from_reqwest(e, self.download_timeout_secs))?;
        let bytes = check_status(response)
            .await?
            .bytes()
            .await
            .map_err(|e| CapabilityError::from_reqwest(e, self.download_timeout_secs))?;
        debug!("Downloaded generated image: {} bytes", bytes.len());
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ImageGenerator for AzureImageClient {
    async fn generate(&self, request: &ImageRequest) -> Result<Vec<u8>, CapabilityError> {
        let response = self
            .http
            .post(self.generations_url())
            .header("api-key", &self.config.key)
            .json(&self.request_body(request))
            .send()
            .await
            .map_err(|e| CapabilityError::from_reqwest(e, self.timeout_secs))?;

        let body: GenerationResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| CapabilityError::MalformedResponse(e.to_string()))?;

        match body.into_source()? {
            ImageSource::Url(url) => self.download(&url).await,
            ImageSource::Inline(bytes) => Ok(bytes),
        }
    }
}

// ── Wire format ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct GenerationRequest<'a> {
    prompt: &'a str,
    model: &'a str,
    n: u8,
    size: &'a str,
    quality: &'a str,
    response_format: &'static str,
}

#[derive(Debug, Deserialize)]
struct GenerationResponse {
    #[serde(default)]
    data: Vec<GeneratedImage>,
}

#[derive(Debug, Deserialize)]
struct GeneratedImage {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    b64_json: Option<String>,
    #[serde(default)]
    revised_prompt: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum ImageSource {
    Url(String),
    Inline(Vec<u8>),
}

impl GenerationResponse {
    fn into_source(self) -> Result<ImageSource, CapabilityError> {
        let image = self
            .data
            .into_iter()
            .next()
            .ok_or_else(|| CapabilityError::MalformedResponse("no images in response".into()))?;
        if let Some(revised) = &image.revised_prompt {
            debug!("Revised prompt: {}", revised);
        }
        // Some deployments ignore response_format and inline the payload.
        match (image.url, image.b64_json) {
            (Some(url), _) => Ok(ImageSource::Url(url)),
            (None, Some(b64)) => STANDARD
                .decode(b64.as_bytes())
                .map(ImageSource::Inline)
                .map_err(|e| CapabilityError::MalformedResponse(format!("bad b64_json: {e}"))),
            (None, None) => Err(CapabilityError::MalformedResponse(
                "image has neither url nor b64_json".into(),
            )),
        }
    }
}
