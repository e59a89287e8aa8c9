//! Structuring: ordered lines → raw JSON-ish text from the text generator.
//!
//! Exactly one round trip; the reply is untrusted text and goes through
//! [`super::parse`] before anything uses it.

use crate::client::retry::{with_retries, RetryPolicy};
use crate::client::TextGenerator;
use crate::error::MenuError;
use crate::model::TextLine;
use crate::prompts::{structuring_user_prompt, STRUCTURING_SYSTEM_PROMPT};
use std::sync::Arc;
use tracing::{debug, info};

/// Groups OCR lines into menu items through a [`TextGenerator`].
pub struct Structurer {
    generator: Arc<dyn TextGenerator>,
    retry: RetryPolicy,
}

impl Structurer {
    pub fn new(generator: Arc<dyn TextGenerator>, retry: RetryPolicy) -> Self {
        Self { generator, retry }
    }

    /// Ask the generator for a JSON list of items.
    ///
    /// An empty `lines` slice is sent as-is.
    pub async fn structure(&self, lines: &[TextLine]) -> Result<String, MenuError> {
        let prompt = structuring_user_prompt(lines);
        debug!("Structuring prompt: {} lines, {} chars", lines.len(), prompt.len());

        let generator = &self.generator;
        let user = prompt.as_str();
        let raw = with_retries("menu structuring", self.retry, move || {
            generator.complete(STRUCTURING_SYSTEM_PROMPT, user)
        })
        .await
        .map_err(MenuError::StructuringFailed)?;

        info!("Structuring returned {} chars", raw.len());
        Ok(raw)
    }
}
