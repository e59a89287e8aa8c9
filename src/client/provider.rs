//! [`TextGenerator`] backed by any `edgequake_llm` provider.
//!
//! Lets the structuring stage run against OpenAI, Anthropic, Gemini, Ollama
//! or anything else edgequake-llm supports, instead of an Azure deployment.

use super::TextGenerator;
use crate::error::CapabilityError;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, LlmError};
use std::sync::Arc;
use tracing::debug;

pub struct ProviderTextGenerator {
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    max_tokens: usize,
}

impl ProviderTextGenerator {
    pub fn new(provider: Arc<dyn LLMProvider>, temperature: f32, max_tokens: usize) -> Self {
        Self {
            provider,
            temperature,
            max_tokens,
        }
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

#[async_trait]
impl TextGenerator for ProviderTextGenerator {
    async fn complete(&self, system: &str, user: &str) -> Result<String, CapabilityError> {
        let messages = vec![ChatMessage::system(system), ChatMessage::user(user)];
        let response = self
            .provider
            .chat(&messages, Some(&self.options()))
            .await
            .map_err(classify_llm_error)?;
        debug!(
            "Provider completion: {} input tokens, {} output tokens",
            response.prompt_tokens, response.completion_tokens
        );
        if response.finish_reason.as_deref() == Some("content_filter") {
            return Err(CapabilityError::ContentPolicy(
                "completion stopped by content filter".into(),
            ));
        }
        Ok(response.content.trim().to_string())
    }
}

/// Map a provider error onto the shared taxonomy so retries and skip
/// decisions behave the same as on the Azure path.
fn classify_llm_error(err: LlmError) -> CapabilityError {
    match err {
        LlmError::RateLimited(_) => CapabilityError::RateLimited {
            retry_after_secs: None,
        },
        LlmError::NetworkError(msg) => CapabilityError::Transport(msg),
        LlmError::Timeout => CapabilityError::Transport("request timed out".into()),
        LlmError::AuthError(msg) => CapabilityError::Auth(msg),
        other => CapabilityError::OperationFailed(other.to_string()),
    }
}
