//! Image synthesis: one dish photo per menu item.
//!
//! Items are rendered strictly one after another. A content-policy refusal
//! skips that item and the loop continues; any other failure aborts the
//! rest of the batch with [`MenuError::SynthesisFailed`].
//!
//! Generated payloads are normalised to JPEG in memory; nothing is staged on
//! disk.

use crate::client::retry::{with_retries, RetryPolicy};
use crate::client::{ImageGenerator, ImageRequest};
use crate::error::{CapabilityError, MenuError, SkipReason};
use crate::model::{ImageAsset, MenuItem, RenderedImage, SkippedItem};
use crate::progress::ProgressCallback;
use crate::prompts::dish_prompt;
use image::codecs::jpeg::JpegEncoder;
use std::sync::Arc;
use tracing::{debug, info, warn};

const JPEG_MAGIC: [u8; 3] = [0xFF, 0xD8, 0xFF];

/// What happened to one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Rendered(ImageAsset),
    Skipped(SkipReason),
}

/// One item's outcome together with its identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemReport {
    pub item_index: usize,
    pub item_name: String,
    pub outcome: ItemOutcome,
}

/// Everything a full synthesis pass produced.
#[derive(Debug, Clone, Default)]
pub struct Synthesis {
    pub images: Vec<RenderedImage>,
    pub skipped: Vec<SkippedItem>,
}

impl Synthesis {
    fn record(&mut self, report: ItemReport) {
        match report.outcome {
            ItemOutcome::Rendered(asset) => self.images.push(RenderedImage {
                item_index: report.item_index,
                item_name: report.item_name,
                asset,
            }),
            ItemOutcome::Skipped(reason) => self.skipped.push(SkippedItem {
                item_index: report.item_index,
                item_name: report.item_name,
                reason,
            }),
        }
    }
}

/// Renders dish photos through an [`ImageGenerator`].
pub struct Synthesizer {
    generator: Arc<dyn ImageGenerator>,
    size: String,
    jpeg_quality: u8,
    retry: RetryPolicy,
    progress: Option<ProgressCallback>,
}

impl Synthesizer {
    pub fn new(generator: Arc<dyn ImageGenerator>, size: impl Into<String>) -> Self {
        Self {
            generator,
            size: size.into(),
            jpeg_quality: 90,
            retry: RetryPolicy::NONE,
            progress: None,
        }
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Render every item in order.
    ///
    /// Returns the surviving images (each tagged with its source index) and
    /// the skipped items. Fails on the first non-policy error; later items
    /// are not attempted.
    pub async fn synthesize(&self, items: &[MenuItem]) -> Result<Synthesis, MenuError> {
        let mut synthesis = Synthesis::default();
        for (index, item) in items.iter().enumerate() {
            let report = self.render_item(index, items.len(), item).await?;
            synthesis.record(report);
        }
        info!(
            "Synthesis complete: {} rendered, {} skipped",
            synthesis.images.len(),
            synthesis.skipped.len()
        );
        Ok(synthesis)
    }

    /// Render one item, classifying the result.
    pub async fn render_item(
        &self,
        index: usize,
        total: usize,
        item: &MenuItem,
    ) -> Result<ItemReport, MenuError> {
        if let Some(cb) = &self.progress {
            cb.on_item_start(index, total, &item.name);
        }

        let outcome = match self.render(&item.name, item.description()).await {
            Ok(asset) => {
                if let Some(cb) = &self.progress {
                    cb.on_item_rendered(index, total, asset.len());
                }
                ItemOutcome::Rendered(asset)
            }
            Err(CapabilityError::ContentPolicy(detail)) => {
                warn!("Skipping '{}': content policy ({})", item.name, detail);
                let reason = SkipReason::ContentPolicy { detail };
                if let Some(cb) = &self.progress {
                    cb.on_item_skipped(index, total, &reason);
                }
                ItemOutcome::Skipped(reason)
            }
            Err(source) => {
                return Err(MenuError::SynthesisFailed {
                    item_index: index,
                    item_name: item.name.clone(),
                    source,
                })
            }
        };

        Ok(ItemReport {
            item_index: index,
            item_name: item.name.clone(),
            outcome,
        })
    }

    /// Generate and JPEG-encode one dish photo.
    pub async fn render(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<ImageAsset, CapabilityError> {
        let request = ImageRequest {
            prompt: dish_prompt(name, description),
            count: 1,
            size: self.size.clone(),
        };
        let generator = &self.generator;
        let request = &request;
        let bytes = with_retries("image generation", self.retry, move || {
            generator.generate(request)
        })
        .await?;
        debug!("Generated image for '{}': {} bytes", name, bytes.len());

        to_jpeg(bytes, self.jpeg_quality).map(ImageAsset::from_jpeg)
    }
}

/// Pass JPEG through untouched; re-encode anything else `image` can decode.
pub fn to_jpeg(bytes: Vec<u8>, quality: u8) -> Result<Vec<u8>, CapabilityError> {
    if bytes.starts_with(&JPEG_MAGIC) {
        return Ok(bytes);
    }
    let decoded = image::load_from_memory(&bytes)
        .map_err(|e| CapabilityError::MalformedResponse(format!("undecodable image: {e}")))?;
    let rgb = decoded.to_rgb8();

    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode_image(&rgb)
        .map_err(|e| CapabilityError::MalformedResponse(format!("JPEG encoding failed: {e}")))?;
    debug!("Transcoded {} bytes to {} bytes JPEG", bytes.len(), out.len());
    Ok(out)
}
