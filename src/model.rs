//! Data types flowing between pipeline stages and returned to callers.

use crate::error::SkipReason;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Price used when the menu shows none.
pub const MISSING_PRICE: &str = "N/A";

/// One cleaned line of OCR output, in reading order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TextLine(String);

impl TextLine {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for TextLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TextLine {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl PartialEq<&str> for TextLine {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// A dish as grouped by the structuring model.
///
/// Deserialisation is lenient because the JSON is model-generated: numeric
/// prices are stringified, a missing price becomes [`MISSING_PRICE`], and a
/// missing description becomes the empty string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuItem {
    pub name: String,
    #[serde(default = "missing_price", deserialize_with = "deserialize_price")]
    pub price: String,
    #[serde(default, alias = "desc", deserialize_with = "deserialize_text")]
    pub description: String,
}

impl MenuItem {
    pub fn new(
        name: impl Into<String>,
        price: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            price: price.into(),
            description: description.into(),
        }
    }

    /// The description, or `None` when the menu printed none.
    pub fn description(&self) -> Option<&str> {
        let d = self.description.trim();
        (!d.is_empty()).then_some(d)
    }
}

fn missing_price() -> String {
    MISSING_PRICE.to_string()
}

fn deserialize_price<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => missing_price(),
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => missing_price(),
        Some(serde_json::Value::String(s)) => s.trim().to_string(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        Some(other) => other.to_string(),
    })
}

fn deserialize_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.map(|s| s.trim().to_string()).unwrap_or_default())
}

/// A generated dish photo. Always JPEG.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageAsset {
    bytes: Vec<u8>,
}

impl ImageAsset {
    pub const MIME_TYPE: &'static str = "image/jpeg";

    /// Wrap bytes that are already JPEG-encoded.
    pub(crate) fn from_jpeg(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// `data:image/jpeg;base64,…` for embedding in HTML or JSON.
    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", Self::MIME_TYPE, STANDARD.encode(&self.bytes))
    }
}

impl fmt::Debug for ImageAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageAsset")
            .field("mime_type", &Self::MIME_TYPE)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl Serialize for ImageAsset {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(&self.bytes))
    }
}

/// An image tagged with the index of the menu item it depicts.
#[derive(Debug, Clone, Serialize)]
pub struct RenderedImage {
    /// Index into [`PipelineResult::menu`].
    pub item_index: usize,
    pub item_name: String,
    #[serde(rename = "jpeg_base64")]
    pub asset: ImageAsset,
}

/// A menu item that has no image, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedItem {
    pub item_index: usize,
    pub item_name: String,
    pub reason: SkipReason,
}

/// How the structuring payload was interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadStatus {
    /// The payload parsed; `menu` holds its items.
    Parsed,
    /// The payload was not JSON; `menu` is empty.
    Malformed,
}

/// Timings and counts for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    pub line_count: usize,
    pub item_count: usize,
    pub rendered_count: usize,
    pub skipped_count: usize,
    pub extract_duration_ms: u64,
    pub structure_duration_ms: u64,
    pub synthesize_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Everything a pipeline run produces.
///
/// `images` keeps the relative order of `menu` but is **not** position-aligned
/// with it: an item refused by content policy has no entry in `images` and
/// one in `skipped` instead. Use [`PipelineResult::image_for`] or
/// [`PipelineResult::gallery`] to pair items with images.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub menu: Vec<MenuItem>,
    pub images: Vec<RenderedImage>,
    pub skipped: Vec<SkippedItem>,
    pub payload_status: PayloadStatus,
    pub stats: RunStats,
}

impl PipelineResult {
    /// The image generated for `menu[index]`, if any.
    pub fn image_for(&self, index: usize) -> Option<&ImageAsset> {
        self.images
            .iter()
            .find(|img| img.item_index == index)
            .map(|img| &img.asset)
    }

    /// Every menu item with its image (or `None` when skipped).
    pub fn gallery(&self) -> impl Iterator<Item = (&MenuItem, Option<&ImageAsset>)> + '_ {
        self.menu
            .iter()
            .enumerate()
            .map(move |(i, item)| (item, self.image_for(i)))
    }
}
