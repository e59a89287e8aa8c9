//! # menu-visualiser
//!
//! Turn a photographed or scanned restaurant menu into structured items,
//! each paired with a generated photo of the dish.
//!
//! ## Pipeline Overview
//!
//! ```text
//! menu.jpg / menu.pdf
//!  │
//!  ├─ 1. Extract     OCR via Azure Document Intelligence, list markers stripped
//!  ├─ 2. Structure   one chat completion groups lines into {name, price, description}
//!  ├─ 3. Parse       defensive JSON boundary: malformed reply → empty menu
//!  └─ 4. Synthesize  one DALL·E 3 photo per dish; content-policy refusals are skipped
//! ```
//!
//! Images in the result carry the index of the item they depict, so a
//! skipped dish never shifts the pairing of the others.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use menu_visualiser::{digitize, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // AZURE_ENDPOINT, AZURE_KEY, AZURE_OPENAI_*, DALLE_3_*
//!     let config = PipelineConfig::from_env();
//!     let result = digitize("menu.jpg", &config).await?;
//!     for (item, image) in result.gallery() {
//!         println!("{} {} ({})", item.name, item.price,
//!             if image.is_some() { "photo" } else { "no photo" });
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Testing without the cloud
//!
//! Every external service sits behind a trait in [`client`]; pass your own
//! implementations to [`MenuPipeline::new`].
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `menu-visualiser` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! menu-visualiser = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod client;
pub mod config;
pub mod digitize;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use client::{
    AnalyzedDocument, AnalyzedPage, DocumentAnalyzer, ImageGenerator, ImageRequest, TextGenerator,
};
pub use config::{
    ChatConfig, DocumentAnalysisConfig, ImageConfig, PipelineConfig, PipelineConfigBuilder,
};
pub use digitize::{
    digitize, digitize_sync, render_dish, sanitize_filename, MenuDraft, MenuPipeline,
    MANIFEST_FILE,
};
pub use error::{CapabilityError, MenuError, SkipReason};
pub use model::{
    ImageAsset, MenuItem, PayloadStatus, PipelineResult, RenderedImage, RunStats, SkippedItem,
    TextLine, MISSING_PRICE,
};
pub use pipeline::parse::{parse_structured_payload, StructuredPayload};
pub use pipeline::synthesize::{ItemOutcome, ItemReport, Synthesizer};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback, Stage};
pub use stream::{synthesize_stream, ItemStream};
