//! The pipeline coordinator and the caller-facing entry points.
//!
//! [`MenuPipeline::run`] sequences extract → structure → parse → synthesize
//! and returns a [`PipelineResult`]. Two failure modes degrade instead of
//! failing the run:
//!
//! - a structuring reply that is not usable JSON becomes an empty menu
//!   (`payload_status = malformed`), and synthesis still runs with zero items;
//! - an item refused by the image service's content policy lands in
//!   `skipped` and the batch continues.
//!
//! Everything else (missing credentials, unreadable document, service
//! failures) is a [`MenuError`].

use crate::client::chat::AzureChatClient;
use crate::client::document::AzureDocumentClient;
use crate::client::image::AzureImageClient;
use crate::client::provider::ProviderTextGenerator;
use crate::client::retry::RetryPolicy;
use crate::client::{DocumentAnalyzer, ImageGenerator, TextGenerator};
use crate::config::PipelineConfig;
use crate::error::MenuError;
use crate::model::{MenuItem, PayloadStatus, PipelineResult, RunStats, SkippedItem};
use crate::pipeline::extract::Extractor;
use crate::pipeline::parse::{parse_structured_payload, StructuredPayload};
use crate::pipeline::structure::Structurer;
use crate::pipeline::synthesize::Synthesizer;
use crate::progress::{ProgressCallback, Stage};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// File name of the manifest written by [`MenuPipeline::run_to_dir`].
pub const MANIFEST_FILE: &str = "menu.json";

static RE_FORBIDDEN_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[<>:"/\\|?*\s]"#).unwrap());
static RE_UNDERSCORE_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"_+").unwrap());

/// Extract, structure and synthesize a menu.
///
/// Holds one instance of each stage; a pipeline can be reused for any
/// number of runs and keeps no state between them.
pub struct MenuPipeline {
    extractor: Extractor,
    structurer: Structurer,
    synthesizer: Arc<Synthesizer>,
    progress: Option<ProgressCallback>,
}

impl MenuPipeline {
    /// Assemble a pipeline from explicit service implementations.
    ///
    /// Only the tuning fields of `config` are read (retries, image size,
    /// JPEG quality, progress callback); credentials are ignored.
    pub fn new(
        analyzer: Arc<dyn DocumentAnalyzer>,
        generator: Arc<dyn TextGenerator>,
        image_generator: Arc<dyn ImageGenerator>,
        config: &PipelineConfig,
    ) -> Self {
        let retry = RetryPolicy::new(config.max_retries, config.retry_backoff_ms);
        let synthesizer = Synthesizer::new(image_generator, config.image.size.clone())
            .with_jpeg_quality(config.jpeg_quality)
            .with_retry(retry)
            .with_progress(config.progress_callback.clone());
        Self {
            extractor: Extractor::new(analyzer, retry),
            structurer: Structurer::new(generator, retry),
            synthesizer: Arc::new(synthesizer),
            progress: config.progress_callback.clone(),
        }
    }

    /// Build the Azure-backed pipeline described by `config`.
    ///
    /// Fails with [`MenuError::Configuration`] listing every missing
    /// credential before any client is created.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, MenuError> {
        config.validate_credentials()?;

        let analyzer = AzureDocumentClient::new(config.document.clone(), config.api_timeout_secs)
            .map_err(http_setup_error)?;
        let generator: Arc<dyn TextGenerator> = match &config.provider {
            Some(provider) => {
                info!("Structuring through the configured LLM provider");
                Arc::new(ProviderTextGenerator::new(
                    Arc::clone(provider),
                    config.chat.temperature,
                    config.chat.max_tokens,
                ))
            }
            None => Arc::new(
                AzureChatClient::new(config.chat.clone(), config.api_timeout_secs)
                    .map_err(http_setup_error)?,
            ),
        };

        Ok(Self::new(
            Arc::new(analyzer),
            generator,
            Arc::new(image_client(config)?),
            config,
        ))
    }

    /// The synthesis stage, for use with [`crate::stream::synthesize_stream`].
    pub fn synthesizer(&self) -> Arc<Synthesizer> {
        Arc::clone(&self.synthesizer)
    }

    /// Run the whole pipeline on a document file.
    pub async fn run(&self, path: impl AsRef<Path>) -> Result<PipelineResult, MenuError> {
        let total_start = Instant::now();
        let path = path.as_ref();
        info!("Digitizing menu: {}", path.display());

        let draft = self.read_menu(path).await?;
        let MenuDraft {
            menu,
            payload_status,
            mut stats,
        } = draft;

        // ── Synthesize ───────────────────────────────────────────────────
        self.stage_start(Stage::Synthesize);
        let synth_start = Instant::now();
        let synthesis = self.synthesizer.synthesize(&menu).await?;
        stats.synthesize_duration_ms = synth_start.elapsed().as_millis() as u64;
        self.stage_complete(Stage::Synthesize, synthesis.images.len());

        stats.rendered_count = synthesis.images.len();
        stats.skipped_count = synthesis.skipped.len();
        stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

        if let Some(cb) = &self.progress {
            cb.on_run_complete(stats.rendered_count, stats.skipped_count);
        }
        info!(
            "Digitization complete: {} items, {} images, {} skipped, {}ms",
            stats.item_count, stats.rendered_count, stats.skipped_count, stats.total_duration_ms
        );

        Ok(PipelineResult {
            menu,
            images: synthesis.images,
            skipped: synthesis.skipped,
            payload_status,
            stats,
        })
    }

    /// Extract and structure a document without generating any images.
    ///
    /// A malformed structuring reply yields an empty item list.
    pub async fn read_menu(&self, path: impl AsRef<Path>) -> Result<MenuDraft, MenuError> {
        let path = path.as_ref();
        let mut stats = RunStats::default();

        // ── Extract ──────────────────────────────────────────────────────
        self.stage_start(Stage::Extract);
        let start = Instant::now();
        let lines = self.extractor.extract(path).await?;
        stats.extract_duration_ms = start.elapsed().as_millis() as u64;
        stats.line_count = lines.len();
        self.stage_complete(Stage::Extract, lines.len());

        // ── Structure ────────────────────────────────────────────────────
        self.stage_start(Stage::Structure);
        let start = Instant::now();
        let raw = self.structurer.structure(&lines).await?;
        stats.structure_duration_ms = start.elapsed().as_millis() as u64;

        // ── Parse ────────────────────────────────────────────────────────
        let payload = parse_structured_payload(&raw);
        let payload_status = payload.status();
        if let StructuredPayload::Malformed { raw, reason } = &payload {
            warn!(
                "Structured payload is not a menu ({}); continuing with zero items. Raw: {}",
                reason,
                truncate(raw, 500)
            );
        }
        let menu = payload.into_items();
        stats.item_count = menu.len();
        self.stage_complete(Stage::Structure, menu.len());
        info!("Structured {} lines into {} items", stats.line_count, menu.len());

        Ok(MenuDraft {
            menu,
            payload_status,
            stats,
        })
    }

    /// Run the pipeline on an in-memory document.
    ///
    /// `extension` (e.g. `"pdf"`, `".jpg"`, or `""` when unknown) selects the
    /// content type. The bytes are staged in a temporary file that is removed on return.
    pub async fn run_from_bytes(
        &self,
        bytes: &[u8],
        extension: &str,
    ) -> Result<PipelineResult, MenuError> {
        let extension = extension.trim_start_matches('.');
        let suffix = if extension.is_empty() {
            String::new()
        } else {
            format!(".{extension}")
        };
        let mut tmp = tempfile::Builder::new()
            .prefix("menu-")
            .suffix(&suffix)
            .tempfile()
            .map_err(|e| MenuError::Internal(format!("tempfile: {e}")))?;
        tmp.write_all(bytes)
            .map_err(|e| MenuError::Internal(format!("tempfile write: {e}")))?;
        debug!("Staged {} bytes at {}", bytes.len(), tmp.path().display());
        // `tmp` is dropped (and the file deleted) when `run` returns
        self.run(tmp.path()).await
    }

    /// Blocking wrapper around [`MenuPipeline::run`].
    ///
    /// Creates a temporary tokio runtime internally; do not call from
    /// inside an async context.
    pub fn run_sync(&self, path: impl AsRef<Path>) -> Result<PipelineResult, MenuError> {
        tokio::runtime::Runtime::new()
            .map_err(|e| MenuError::Internal(format!("Failed to create tokio runtime: {}", e)))?
            .block_on(self.run(path))
    }

    /// Run the pipeline and write the results under `out_dir`.
    ///
    /// Writes one JPEG per rendered item (`01_burger_deluxe.jpg`, …) and a
    /// [`MANIFEST_FILE`] describing the menu and which file belongs to which
    /// item. The manifest is written atomically.
    pub async fn run_to_dir(
        &self,
        path: impl AsRef<Path>,
        out_dir: impl AsRef<Path>,
    ) -> Result<PipelineResult, MenuError> {
        let result = self.run(path).await?;
        let out_dir = out_dir.as_ref();
        create_dir(out_dir).await?;

        let mut files = Vec::with_capacity(result.images.len());
        for image in &result.images {
            let file = format!(
                "{:02}_{}",
                image.item_index + 1,
                sanitize_filename(&image.item_name)
            );
            write_file(&out_dir.join(&file), image.asset.bytes()).await?;
            files.push(ManifestImage {
                item_index: image.item_index,
                item_name: &image.item_name,
                file,
            });
        }

        let manifest = Manifest {
            menu: &result.menu,
            images: files,
            skipped: &result.skipped,
            payload_status: result.payload_status,
            stats: &result.stats,
        };
        let json = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| MenuError::Internal(format!("manifest serialisation: {e}")))?;
        write_atomic(&out_dir.join(MANIFEST_FILE), &json).await?;

        info!(
            "Wrote {} images and {} to {}",
            result.images.len(),
            MANIFEST_FILE,
            out_dir.display()
        );
        Ok(result)
    }

    /// Generate a single dish photo and save it as
    /// `out_dir/<sanitized name>.jpg`.
    pub async fn render_dish(
        &self,
        name: &str,
        description: Option<&str>,
        out_dir: impl AsRef<Path>,
    ) -> Result<PathBuf, MenuError> {
        save_dish(&self.synthesizer, name, description, out_dir.as_ref()).await
    }

    fn stage_start(&self, stage: Stage) {
        debug!("Stage {} starting", stage);
        if let Some(cb) = &self.progress {
            cb.on_stage_start(stage);
        }
    }

    fn stage_complete(&self, stage: Stage, count: usize) {
        if let Some(cb) = &self.progress {
            cb.on_stage_complete(stage, count);
        }
    }
}

/// The output of extraction and structuring, before any image exists.
#[derive(Debug, Clone)]
pub struct MenuDraft {
    pub menu: Vec<MenuItem>,
    pub payload_status: PayloadStatus,
    /// Line/item counts and the extract/structure durations.
    pub stats: RunStats,
}

/// Digitize `path` with the Azure services described by `config`.
pub async fn digitize(
    path: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<PipelineResult, MenuError> {
    MenuPipeline::from_config(config)?.run(path).await
}

/// Synchronous wrapper around [`digitize`].
pub fn digitize_sync(
    path: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<PipelineResult, MenuError> {
    MenuPipeline::from_config(config)?.run_sync(path)
}

/// Generate one dish photo using only the image credentials in `config`.
///
/// Unlike [`MenuPipeline::from_config`], the document and chat credentials
/// are not required.
pub async fn render_dish(
    config: &PipelineConfig,
    name: &str,
    description: Option<&str>,
    out_dir: impl AsRef<Path>,
) -> Result<PathBuf, MenuError> {
    let missing = config.missing_image_credentials();
    if !missing.is_empty() {
        return Err(MenuError::Configuration { missing });
    }
    let synthesizer = Synthesizer::new(Arc::new(image_client(config)?), config.image.size.clone())
        .with_jpeg_quality(config.jpeg_quality)
        .with_retry(RetryPolicy::new(config.max_retries, config.retry_backoff_ms));
    save_dish(&synthesizer, name, description, out_dir.as_ref()).await
}

/// File name for a dish photo.
///
/// Filesystem-reserved characters and whitespace become `_`, the result is
/// lowercased, runs of `_` collapse, and leading/trailing `_` are dropped.
/// `"Fish & Chips / Large"` → `"fish_&_chips_large.jpg"`.
pub fn sanitize_filename(name: &str) -> String {
    let replaced = RE_FORBIDDEN_CHARS.replace_all(name, "_").to_lowercase();
    let collapsed = RE_UNDERSCORE_RUNS.replace_all(&replaced, "_");
    let stem = collapsed.trim_matches('_');
    if stem.is_empty() {
        "dish.jpg".to_string()
    } else {
        format!("{stem}.jpg")
    }
}

// ── Internal helpers ─────────────────────────────────────────────────────

#[derive(Serialize)]
struct Manifest<'a> {
    menu: &'a [MenuItem],
    images: Vec<ManifestImage<'a>>,
    skipped: &'a [SkippedItem],
    payload_status: PayloadStatus,
    stats: &'a RunStats,
}

#[derive(Serialize)]
struct ManifestImage<'a> {
    item_index: usize,
    item_name: &'a str,
    file: String,
}

fn image_client(config: &PipelineConfig) -> Result<AzureImageClient, MenuError> {
    AzureImageClient::new(
        config.image.clone(),
        config.api_timeout_secs,
        config.download_timeout_secs,
    )
    .map_err(http_setup_error)
}

fn http_setup_error(err: reqwest::Error) -> MenuError {
    MenuError::Internal(format!("Failed to build HTTP client: {err}"))
}

async fn save_dish(
    synthesizer: &Synthesizer,
    name: &str,
    description: Option<&str>,
    out_dir: &Path,
) -> Result<PathBuf, MenuError> {
    let asset = synthesizer
        .render(name, description)
        .await
        .map_err(|source| MenuError::SynthesisFailed {
            item_index: 0,
            item_name: name.to_string(),
            source,
        })?;
    create_dir(out_dir).await?;
    let path = out_dir.join(sanitize_filename(name));
    write_file(&path, asset.bytes()).await?;
    info!("Saved '{}' to {}", name, path.display());
    Ok(path)
}

async fn create_dir(dir: &Path) -> Result<(), MenuError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| MenuError::OutputWriteFailed {
            path: dir.to_path_buf(),
            source: e,
        })
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<(), MenuError> {
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| MenuError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Write to `<path>.tmp`, then rename over `path`.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), MenuError> {
    let tmp_path = path.with_extension("json.tmp");
    write_file(&tmp_path, bytes).await?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| MenuError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}
