//! Text extraction: document file → ordered, cleaned [`TextLine`]s.
//!
//! Pages are flattened in document order and page boundaries dropped. Each
//! line loses its leading list markers (bullets, dashes, en-dashes, digits,
//! periods, whitespace) so "1. Chicken Salad" becomes "Chicken Salad", while
//! interior text such as "$12.99" is left alone.

use crate::client::retry::{with_retries, RetryPolicy};
use crate::client::{AnalyzedDocument, DocumentAnalyzer};
use crate::error::MenuError;
use crate::model::TextLine;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

const OCTET_STREAM: &str = "application/octet-stream";

static RE_LEADING_MARKERS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[•\-–\d\.\s]*").unwrap());

/// Runs OCR through a [`DocumentAnalyzer`].
pub struct Extractor {
    analyzer: Arc<dyn DocumentAnalyzer>,
    retry: RetryPolicy,
}

impl Extractor {
    pub fn new(analyzer: Arc<dyn DocumentAnalyzer>, retry: RetryPolicy) -> Self {
        Self { analyzer, retry }
    }

    /// Read `path`, submit it for analysis and return its cleaned lines.
    ///
    /// # Errors
    /// - [`MenuError::DocumentUnreadable`] if the file cannot be read
    /// - [`MenuError::ExtractionFailed`] if the analysis call fails
    pub async fn extract(&self, path: &Path) -> Result<Vec<TextLine>, MenuError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| MenuError::DocumentUnreadable {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        let content_type = content_type_for(path);
        self.extract_bytes(&bytes, content_type).await
    }

    /// Analyze an in-memory document with a known content type.
    pub async fn extract_bytes(
        &self,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<Vec<TextLine>, MenuError> {
        debug!("Extracting text from {} bytes ({})", bytes.len(), content_type);
        let analyzer = &self.analyzer;
        let document = with_retries("document analysis", self.retry, move || {
            analyzer.analyze(bytes, content_type)
        })
        .await
        .map_err(MenuError::ExtractionFailed)?;

        let lines = flatten(document);
        info!("Extracted {} lines", lines.len());
        Ok(lines)
    }
}

/// Flatten pages into one ordered sequence, dropping lines that are empty
/// after normalisation.
pub fn flatten(document: AnalyzedDocument) -> Vec<TextLine> {
    document
        .pages
        .into_iter()
        .flat_map(|page| page.lines)
        .filter_map(|raw| normalize_line(&raw))
        .collect()
}

/// Strip leading list markers and surrounding whitespace.
///
/// Returns `None` when nothing is left.
pub fn normalize_line(raw: &str) -> Option<TextLine> {
    let cleaned = RE_LEADING_MARKERS.replace(raw, "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(TextLine::new(cleaned))
    }
}

/// MIME type sent with `path`'s bytes.
///
/// Unknown or missing extensions are sent as `application/octet-stream` and
/// the service detects the format itself.
pub fn content_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "pdf" => "application/pdf",
        "tif" | "tiff" => "image/tiff",
        "bmp" => "image/bmp",
        _ => OCTET_STREAM,
    }
}
