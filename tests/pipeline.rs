//! Pipeline integration tests with in-process service doubles.
//!
//! No network: the three services are replaced by fakes that record what
//! they were asked and answer from a script.

use async_trait::async_trait;
use futures::StreamExt;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use menu_visualiser::{
    synthesize_stream, AnalyzedDocument, CapabilityError, DocumentAnalyzer, ImageGenerator,
    ImageRequest, ItemOutcome, MenuError, MenuItem, MenuPipeline, PayloadStatus, PipelineConfig,
    PipelineProgressCallback, ProgressCallback, SkipReason, Stage, TextGenerator, MANIFEST_FILE,
};
use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;

const BURGER_JSON: &str =
    r#"[{"name":"Burger Deluxe","price":"$12.99","description":"Fresh beef with fries"}]"#;

const THREE_ITEMS_JSON: &str = r#"[
    {"name":"Tomato Soup","price":"$5","description":""},
    {"name":"Steak Tartare","price":"$21","description":"raw beef"},
    {"name":"Lemon Tart","price":"$7"}
]"#;

// ── Service doubles ──────────────────────────────────────────────────────────

struct FakeAnalyzer {
    document: AnalyzedDocument,
    content_types: Mutex<Vec<String>>,
}

impl FakeAnalyzer {
    fn with_lines(lines: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            document: AnalyzedDocument::single_page(lines.iter().copied()),
            content_types: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.content_types.lock().unwrap().len()
    }
}

#[async_trait]
impl DocumentAnalyzer for FakeAnalyzer {
    async fn analyze(
        &self,
        _document: &[u8],
        content_type: &str,
    ) -> Result<AnalyzedDocument, CapabilityError> {
        self.content_types
            .lock()
            .unwrap()
            .push(content_type.to_string());
        Ok(self.document.clone())
    }
}

struct FakeGenerator {
    reply: String,
    user_prompts: Mutex<Vec<String>>,
}

impl FakeGenerator {
    fn replying(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            user_prompts: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl TextGenerator for FakeGenerator {
    async fn complete(&self, _system: &str, user: &str) -> Result<String, CapabilityError> {
        self.user_prompts.lock().unwrap().push(user.to_string());
        Ok(self.reply.clone())
    }
}

/// Returns a small PNG for every prompt, except prompts naming `refuse`
/// (content policy) or `fail` (quota exhausted).
#[derive(Default)]
struct FakeImages {
    refuse: Option<&'static str>,
    fail: Option<&'static str>,
    prompts: Mutex<Vec<String>>,
}

impl FakeImages {
    fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl ImageGenerator for FakeImages {
    async fn generate(&self, request: &ImageRequest) -> Result<Vec<u8>, CapabilityError> {
        assert_eq!(request.count, 1);
        self.prompts.lock().unwrap().push(request.prompt.clone());
        if self.refuse.is_some_and(|r| request.prompt.contains(r)) {
            return Err(CapabilityError::ContentPolicy(
                r#"{"error":{"code":"content_policy_violation"}}"#.into(),
            ));
        }
        if self.fail.is_some_and(|f| request.prompt.contains(f)) {
            return Err(CapabilityError::RateLimited {
                retry_after_secs: Some(60),
            });
        }
        Ok(dish_png())
    }
}

#[derive(Default)]
struct RecordingCallback {
    events: Mutex<Vec<String>>,
}

impl PipelineProgressCallback for RecordingCallback {
    fn on_stage_start(&self, stage: Stage) {
        self.events.lock().unwrap().push(format!("start:{stage}"));
    }
    fn on_stage_complete(&self, stage: Stage, count: usize) {
        self.events
            .lock()
            .unwrap()
            .push(format!("done:{stage}:{count}"));
    }
    fn on_item_rendered(&self, index: usize, _total: usize, _jpeg_len: usize) {
        self.events.lock().unwrap().push(format!("rendered:{index}"));
    }
    fn on_item_skipped(&self, index: usize, _total: usize, _reason: &SkipReason) {
        self.events.lock().unwrap().push(format!("skipped:{index}"));
    }
    fn on_run_complete(&self, rendered: usize, skipped: usize) {
        self.events
            .lock()
            .unwrap()
            .push(format!("complete:{rendered}:{skipped}"));
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn dish_png() -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 16, Rgb([180, 90, 30])));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .expect("encode PNG");
    buf
}

fn menu_file(suffix: &str) -> NamedTempFile {
    let mut f = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("tempfile");
    f.write_all(b"menu bytes").expect("write tempfile");
    f
}

fn pipeline(
    analyzer: Arc<FakeAnalyzer>,
    generator: Arc<FakeGenerator>,
    images: Arc<FakeImages>,
) -> MenuPipeline {
    MenuPipeline::new(analyzer, generator, images, &PipelineConfig::default())
}

// ── Coordinator behaviour ────────────────────────────────────────────────────

#[tokio::test]
async fn burger_end_to_end() {
    let analyzer = FakeAnalyzer::with_lines(&["Burger Deluxe", "$12.99", "Fresh beef with fries"]);
    let generator = FakeGenerator::replying(BURGER_JSON);
    let images = Arc::new(FakeImages::default());
    let p = pipeline(analyzer.clone(), generator.clone(), images.clone());

    let doc = menu_file(".jpg");
    let result = p.run(doc.path()).await.expect("run should succeed");

    assert_eq!(
        result.menu,
        vec![MenuItem::new("Burger Deluxe", "$12.99", "Fresh beef with fries")]
    );
    assert_eq!(result.images.len(), 1);
    assert_eq!(result.images[0].item_index, 0);
    assert!(result.image_for(0).is_some());
    assert!(result.skipped.is_empty());
    assert_eq!(result.payload_status, PayloadStatus::Parsed);

    assert_eq!(result.stats.line_count, 3);
    assert_eq!(result.stats.item_count, 1);
    assert_eq!(result.stats.rendered_count, 1);

    assert_eq!(*analyzer.content_types.lock().unwrap(), vec!["image/jpeg"]);
    let prompts = generator.user_prompts.lock().unwrap();
    assert!(prompts[0].contains("Burger Deluxe\n$12.99\nFresh beef with fries"));
    let image_prompts = images.prompts.lock().unwrap();
    assert_eq!(image_prompts.len(), 1);
    assert!(image_prompts[0].contains("Burger Deluxe"));
    assert!(image_prompts[0].contains("Fresh beef with fries"));
}

#[tokio::test]
async fn malformed_payload_yields_empty_result() {
    let images = Arc::new(FakeImages::default());
    let cb = Arc::new(RecordingCallback::default());
    let config = PipelineConfig::builder()
        .progress_callback(cb.clone() as ProgressCallback)
        .build()
        .unwrap();
    let p = MenuPipeline::new(
        FakeAnalyzer::with_lines(&["Burger Deluxe"]),
        FakeGenerator::replying("not json"),
        images.clone(),
        &config,
    );

    let doc = menu_file(".png");
    let result = p.run(doc.path()).await.expect("malformed JSON must not fail the run");

    assert!(result.menu.is_empty());
    assert!(result.images.is_empty());
    assert_eq!(result.payload_status, PayloadStatus::Malformed);
    assert_eq!(images.calls(), 0);

    // Synthesis still ran, over zero items.
    let events = cb.events.lock().unwrap();
    assert!(events.contains(&"start:synthesize".to_string()));
    assert!(events.contains(&"done:synthesize:0".to_string()));
    assert_eq!(events.last().unwrap(), "complete:0:0");
}

#[tokio::test]
async fn list_markers_are_stripped_before_structuring() {
    let generator = FakeGenerator::replying("[]");
    let p = pipeline(
        FakeAnalyzer::with_lines(&["1. Chicken Salad", "$12.99", "• Garlic Bread", "   "]),
        generator.clone(),
        Arc::new(FakeImages::default()),
    );

    let doc = menu_file(".jpg");
    let result = p.run(doc.path()).await.unwrap();

    assert_eq!(result.stats.line_count, 3);
    let prompt = generator.user_prompts.lock().unwrap()[0].clone();
    assert!(prompt.contains("Chicken Salad\n$12.99\nGarlic Bread"));
    assert!(!prompt.contains("1. Chicken"));
}

#[tokio::test]
async fn empty_document_still_calls_structurer() {
    let generator = FakeGenerator::replying("[]");
    let images = Arc::new(FakeImages::default());
    let p = pipeline(FakeAnalyzer::with_lines(&[]), generator.clone(), images.clone());

    let doc = menu_file(".pdf");
    let result = p.run(doc.path()).await.unwrap();

    assert_eq!(generator.user_prompts.lock().unwrap().len(), 1);
    assert!(result.menu.is_empty());
    assert_eq!(result.payload_status, PayloadStatus::Parsed);
    assert_eq!(images.calls(), 0);
}

#[tokio::test]
async fn content_policy_refusal_skips_only_that_dish() {
    let images = Arc::new(FakeImages {
        refuse: Some("Steak Tartare"),
        ..Default::default()
    });
    let p = pipeline(
        FakeAnalyzer::with_lines(&["menu"]),
        FakeGenerator::replying(THREE_ITEMS_JSON),
        images.clone(),
    );

    let doc = menu_file(".jpg");
    let result = p.run(doc.path()).await.expect("policy skip must not fail the run");

    assert_eq!(result.menu.len(), 3);
    assert_eq!(result.images.len(), 2);
    let indices: Vec<_> = result.images.iter().map(|i| i.item_index).collect();
    assert_eq!(indices, vec![0, 2]);
    assert_eq!(result.skipped.len(), 1);
    assert_eq!(result.skipped[0].item_index, 1);
    assert!(matches!(
        result.skipped[0].reason,
        SkipReason::ContentPolicy { .. }
    ));
    assert_eq!(images.calls(), 3);

    // Pairing by identity survives the skip.
    let gallery: Vec<_> = result
        .gallery()
        .map(|(item, img)| (item.name.as_str(), img.is_some()))
        .collect();
    assert_eq!(
        gallery,
        vec![
            ("Tomato Soup", true),
            ("Steak Tartare", false),
            ("Lemon Tart", true)
        ]
    );
}

#[tokio::test]
async fn non_policy_failure_aborts_batch() {
    let images = Arc::new(FakeImages {
        fail: Some("Steak Tartare"),
        ..Default::default()
    });
    let p = pipeline(
        FakeAnalyzer::with_lines(&["menu"]),
        FakeGenerator::replying(THREE_ITEMS_JSON),
        images.clone(),
    );

    let doc = menu_file(".jpg");
    let err = p.run(doc.path()).await.unwrap_err();

    match err {
        MenuError::SynthesisFailed {
            item_index,
            item_name,
            source,
        } => {
            assert_eq!(item_index, 1);
            assert_eq!(item_name, "Steak Tartare");
            assert!(matches!(source, CapabilityError::RateLimited { .. }));
        }
        other => panic!("expected SynthesisFailed, got {other}"),
    }
    // Lemon Tart was never attempted.
    assert_eq!(images.calls(), 2);
}

#[tokio::test]
async fn progress_events_follow_stage_order() {
    let cb = Arc::new(RecordingCallback::default());
    let config = PipelineConfig::builder()
        .progress_callback(cb.clone() as ProgressCallback)
        .build()
        .unwrap();
    let p = MenuPipeline::new(
        FakeAnalyzer::with_lines(&["a", "b"]),
        FakeGenerator::replying(THREE_ITEMS_JSON),
        Arc::new(FakeImages {
            refuse: Some("Lemon Tart"),
            ..Default::default()
        }),
        &config,
    );

    let doc = menu_file(".jpg");
    p.run(doc.path()).await.unwrap();

    let events = cb.events.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            "start:extract",
            "done:extract:2",
            "start:structure",
            "done:structure:3",
            "start:synthesize",
            "rendered:0",
            "rendered:1",
            "skipped:2",
            "done:synthesize:2",
            "complete:2:1",
        ]
    );
}

// ── Input handling ───────────────────────────────────────────────────────────

#[tokio::test]
async fn extensionless_upload_is_sent_as_octet_stream() {
    let analyzer = FakeAnalyzer::with_lines(&["Burger Deluxe", "$12.99"]);
    let p = pipeline(
        analyzer.clone(),
        FakeGenerator::replying(BURGER_JSON),
        Arc::new(FakeImages::default()),
    );

    let mut doc = NamedTempFile::new().expect("tempfile");
    doc.write_all(&[0xFF, 0xD8, 0xFF, 0xE0]).unwrap();
    let result = p.run(doc.path()).await.expect("service decides the format");

    assert_eq!(result.menu.len(), 1);
    assert_eq!(
        *analyzer.content_types.lock().unwrap(),
        vec!["application/octet-stream"]
    );
}

#[tokio::test]
async fn unlisted_extensions_reach_the_analyzer() {
    let analyzer = FakeAnalyzer::with_lines(&["x"]);
    let p = pipeline(
        analyzer.clone(),
        FakeGenerator::replying("[]"),
        Arc::new(FakeImages::default()),
    );

    let webp = menu_file(".webp");
    tokio_test::assert_ok!(p.run(webp.path()).await);
    tokio_test::assert_ok!(p.run_from_bytes(b"menu bytes", "").await);

    assert_eq!(analyzer.calls(), 2);
    assert!(analyzer
        .content_types
        .lock()
        .unwrap()
        .iter()
        .all(|ct| ct == "application/octet-stream"));
}

#[tokio::test]
async fn missing_document_is_unreadable() {
    let p = pipeline(
        FakeAnalyzer::with_lines(&[]),
        FakeGenerator::replying("[]"),
        Arc::new(FakeImages::default()),
    );
    let err = tokio_test::assert_err!(p.run("/no/such/dir/menu.jpg").await);
    assert!(matches!(err, MenuError::DocumentUnreadable { .. }));
}

#[tokio::test]
async fn run_from_bytes_uses_extension_for_content_type() {
    let analyzer = FakeAnalyzer::with_lines(&["Burger Deluxe", "$12.99"]);
    let p = pipeline(
        analyzer.clone(),
        FakeGenerator::replying(BURGER_JSON),
        Arc::new(FakeImages::default()),
    );

    let result = p.run_from_bytes(b"%PDF-1.7", ".pdf").await.unwrap();
    assert_eq!(result.menu.len(), 1);
    assert_eq!(*analyzer.content_types.lock().unwrap(), vec!["application/pdf"]);
}

#[test]
fn run_sync_outside_runtime() {
    let p = pipeline(
        FakeAnalyzer::with_lines(&["Burger Deluxe"]),
        FakeGenerator::replying(BURGER_JSON),
        Arc::new(FakeImages::default()),
    );
    let doc = menu_file(".jpg");
    let result = p.run_sync(doc.path()).unwrap();
    assert_eq!(result.images.len(), 1);
}

// ── Output ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn run_to_dir_writes_manifest_and_jpegs() {
    let p = pipeline(
        FakeAnalyzer::with_lines(&["menu"]),
        FakeGenerator::replying(THREE_ITEMS_JSON),
        Arc::new(FakeImages {
            refuse: Some("Steak Tartare"),
            ..Default::default()
        }),
    );
    let out = tempfile::tempdir().unwrap();
    let doc = menu_file(".jpg");
    let result = p.run_to_dir(doc.path(), out.path()).await.unwrap();
    assert_eq!(result.images.len(), 2);

    let soup = std::fs::read(out.path().join("01_tomato_soup.jpg")).unwrap();
    assert_eq!(&soup[..3], &[0xFF, 0xD8, 0xFF]);
    assert!(out.path().join("03_lemon_tart.jpg").exists());
    assert!(!out.path().join("02_steak_tartare.jpg").exists());

    let manifest: serde_json::Value =
        serde_json::from_slice(&std::fs::read(out.path().join(MANIFEST_FILE)).unwrap()).unwrap();
    assert_eq!(manifest["menu"].as_array().unwrap().len(), 3);
    assert_eq!(manifest["images"][1]["file"], "03_lemon_tart.jpg");
    assert_eq!(manifest["images"][1]["item_index"], 2);
    assert_eq!(manifest["skipped"][0]["item_name"], "Steak Tartare");
    assert_eq!(manifest["payload_status"], "parsed");
    assert!(!out.path().join("menu.json.tmp").exists());
}

#[tokio::test]
async fn render_dish_writes_sanitized_jpeg() {
    let images = Arc::new(FakeImages::default());
    let p = pipeline(
        FakeAnalyzer::with_lines(&[]),
        FakeGenerator::replying("[]"),
        images.clone(),
    );
    let out = tempfile::tempdir().unwrap();
    let path = p
        .render_dish("Fish & Chips", Some("beer batter"), out.path().join("assets"))
        .await
        .unwrap();

    assert_eq!(path, out.path().join("assets").join("fish_&_chips.jpg"));
    assert!(path.exists());
    assert!(images.prompts.lock().unwrap()[0].contains("beer batter"));
}

#[tokio::test]
async fn render_dish_refusal_is_an_error() {
    let p = pipeline(
        FakeAnalyzer::with_lines(&[]),
        FakeGenerator::replying("[]"),
        Arc::new(FakeImages {
            refuse: Some("Mystery"),
            ..Default::default()
        }),
    );
    let out = tempfile::tempdir().unwrap();
    let err = p.render_dish("Mystery Meat", None, out.path()).await.unwrap_err();
    assert!(matches!(
        err,
        MenuError::SynthesisFailed {
            source: CapabilityError::ContentPolicy(_),
            ..
        }
    ));
}

#[tokio::test]
async fn result_serialises_images_as_base64() {
    let p = pipeline(
        FakeAnalyzer::with_lines(&["Burger Deluxe"]),
        FakeGenerator::replying(BURGER_JSON),
        Arc::new(FakeImages::default()),
    );
    let doc = menu_file(".jpg");
    let result = p.run(doc.path()).await.unwrap();

    let json = serde_json::to_value(&result).unwrap();
    let b64 = json["images"][0]["jpeg_base64"].as_str().unwrap();
    assert!(b64.starts_with("/9j/"), "JPEG base64 starts with /9j/, got {b64:.8}");
    assert_eq!(json["menu"][0]["price"], "$12.99");
}

// ── Streaming ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn read_menu_then_stream() {
    let counter = Arc::new(AtomicUsize::new(0));
    let p = pipeline(
        FakeAnalyzer::with_lines(&["menu"]),
        FakeGenerator::replying(THREE_ITEMS_JSON),
        Arc::new(FakeImages {
            refuse: Some("Tomato Soup"),
            ..Default::default()
        }),
    );

    let doc = menu_file(".jpg");
    let draft = p.read_menu(doc.path()).await.unwrap();
    assert_eq!(draft.menu.len(), 3);
    assert_eq!(draft.stats.rendered_count, 0);

    let mut reports = synthesize_stream(p.synthesizer(), draft.menu);
    let mut outcomes = Vec::new();
    while let Some(report) = reports.next().await {
        counter.fetch_add(1, Ordering::SeqCst);
        let report = report.unwrap();
        outcomes.push((report.item_index, matches!(report.outcome, ItemOutcome::Rendered(_))));
    }
    assert_eq!(outcomes, vec![(0, false), (1, true), (2, true)]);
    assert_eq!(counter.load(Ordering::SeqCst), 3);
}
