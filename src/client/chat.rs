//! Azure OpenAI chat-completions client.

use super::{check_status, http_client, join_url, TextGenerator};
use crate::config::ChatConfig;
use crate::error::CapabilityError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// REST client for a chat-completion deployment.
pub struct AzureChatClient {
    http: reqwest::Client,
    config: ChatConfig,
    timeout_secs: u64,
}

impl AzureChatClient {
    pub fn new(config: ChatConfig, timeout_secs: u64) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: http_client(timeout_secs)?,
            config,
            timeout_secs,
        })
    }

    fn completions_url(&self) -> String {
        join_url(
            &self.config.endpoint,
            &format!(
                "openai/deployments/{}/chat/completions?api-version={}",
                self.config.deployment, self.config.api_version
            ),
        )
    }

    fn request_body<'a>(&self, system: &'a str, user: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            messages: vec![
                WireMessage {
                    role: "system",
                    content: system,
                },
                WireMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        }
    }
}

#[async_trait]
impl TextGenerator for AzureChatClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String, CapabilityError> {
        let response = self
            .http
            .post(self.completions_url())
            .header("api-key", &self.config.key)
            .json(&self.request_body(system, user))
            .send()
            .await
            .map_err(|e| CapabilityError::from_reqwest(e, self.timeout_secs))?;

        let body: ChatResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| CapabilityError::MalformedResponse(e.to_string()))?;

        if let Some(usage) = &body.usage {
            debug!(
                "Chat completion: {} input tokens, {} output tokens",
                usage.prompt_tokens, usage.completion_tokens
            );
        }
        body.into_content()
    }
}

// ── Wire format ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    max_tokens: usize,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl ChatResponse {
    fn into_content(self) -> Result<String, CapabilityError> {
        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| CapabilityError::MalformedResponse("no choices in completion".into()))?;
        if choice.finish_reason.as_deref() == Some("content_filter") {
            return Err(CapabilityError::ContentPolicy(
                "completion stopped by content filter".into(),
            ));
        }
        choice
            .message
            .content
            .map(|c| c.trim().to_string())
            .ok_or_else(|| CapabilityError::MalformedResponse("completion has no content".into()))
    }
}
