//! CLI binary for menu-visualiser.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig` and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use menu_visualiser::config::{
    ENV_CHAT_DEPLOYMENT, ENV_CHAT_ENDPOINT, ENV_CHAT_KEY, ENV_DOCUMENT_ENDPOINT, ENV_DOCUMENT_KEY,
    ENV_IMAGE_DEPLOYMENT, ENV_IMAGE_ENDPOINT, ENV_IMAGE_KEY,
};
use menu_visualiser::{
    render_dish, MenuPipeline, PayloadStatus, PipelineConfig, PipelineProgressCallback,
    PipelineResult, ProgressCallback, SkipReason, Stage, MANIFEST_FILE,
};
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: a spinner through extraction and structuring, then a
/// bar over the dishes with one log line per rendered or skipped item.
struct CliProgressCallback {
    bar: ProgressBar,
    item_started: Mutex<Option<Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening menu…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            item_started: Mutex::new(None),
        })
    }

    /// Switch to the full progress-bar style once the item count is known.
    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} dishes  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Rendering");
        self.bar.reset_eta();
    }

    fn item_elapsed(&self) -> String {
        let secs = self
            .item_started
            .lock()
            .ok()
            .and_then(|mut started| started.take())
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        dim(&format!("{secs:.1}s"))
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, stage: Stage) {
        match stage {
            Stage::Extract => {
                self.bar.set_prefix("Reading");
                self.bar.set_message("Extracting text…");
            }
            Stage::Structure => {
                self.bar.set_prefix("Structuring");
                self.bar.set_message("Grouping lines into dishes…");
            }
            Stage::Synthesize => {}
        }
    }

    fn on_stage_complete(&self, stage: Stage, count: usize) {
        match stage {
            Stage::Extract => self
                .bar
                .println(format!("{} {} lines of text", cyan("◆"), bold(&count.to_string()))),
            Stage::Structure => {
                self.bar
                    .println(format!("{} {} dishes found", cyan("◆"), bold(&count.to_string())));
                self.activate_bar(count);
            }
            Stage::Synthesize => {}
        }
    }

    fn on_item_start(&self, _index: usize, _total: usize, name: &str) {
        if let Ok(mut started) = self.item_started.lock() {
            *started = Some(Instant::now());
        }
        self.bar.set_message(name.to_string());
    }

    fn on_item_rendered(&self, index: usize, total: usize, jpeg_len: usize) {
        self.bar.println(format!(
            "  {} Dish {:>3}/{:<3}  {:<10}  {}",
            green("✓"),
            index + 1,
            total,
            dim(&format!("{:>5} KiB", jpeg_len / 1024)),
            self.item_elapsed(),
        ));
        self.bar.inc(1);
    }

    fn on_item_skipped(&self, index: usize, total: usize, reason: &SkipReason) {
        self.bar.println(format!(
            "  {} Dish {:>3}/{:<3}  {}  {}",
            yellow("⚠"),
            index + 1,
            total,
            yellow(&format!("skipped ({reason})")),
            self.item_elapsed(),
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, rendered: usize, skipped: usize) {
        self.bar.finish_and_clear();
        if skipped == 0 {
            eprintln!("{} {} dishes rendered", green("✔"), bold(&rendered.to_string()));
        } else {
            eprintln!(
                "{} {} dishes rendered  ({} skipped by content policy)",
                yellow("⚠"),
                bold(&rendered.to_string()),
                yellow(&skipped.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Digitize a photographed menu and print the items
  menu-visualiser digitize menu.jpg

  # Write menu.json and one JPEG per dish
  menu-visualiser digitize menu.pdf --output-dir out/

  # Full result (images as base64) on stdout
  menu-visualiser digitize menu.png --json > result.json

  # A single dish photo
  menu-visualiser dish --name "Burger Deluxe" --description "Fresh beef with fries"

SUPPORTED DOCUMENTS:
  PNG, JPEG, TIFF, BMP, PDF (first page only unless --all-pages).
  Other files are sent as-is and the service detects the format.

ENVIRONMENT VARIABLES:
  AZURE_ENDPOINT                Document Intelligence endpoint
  AZURE_KEY                     Document Intelligence key
  AZURE_OPENAI_ENDPOINT         Azure OpenAI endpoint for structuring
  AZURE_OPENAI_KEY              Azure OpenAI key
  AZURE_OPENAI_DEPLOYMENT_NAME  Chat deployment (e.g. gpt-4o)
  DALLE_3_ENDPOINT              Azure OpenAI endpoint for images
  DALLE_3_KEY                   Image endpoint key
  DALLE_3_DEPLOYMENT_NAME       Image deployment (e.g. dall-e-3)

  The `dish` command only needs the three DALLE_3_* variables.
"#;

/// Digitize restaurant menus into structured items with a photo per dish.
#[derive(Parser, Debug)]
#[command(
    name = "menu-visualiser",
    version,
    about = "Turn a photographed menu into structured items and dish photos",
    long_about = "Reads a menu image or PDF with Azure Document Intelligence, groups the text \
into items (name, price, description) with an Azure OpenAI chat deployment, and renders one \
photo per dish with a DALL·E 3 deployment.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    credentials: Credentials,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "MENU_VISUALISER_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "MENU_VISUALISER_QUIET")]
    quiet: bool,

    /// Retries per service call on transient failures (429, 5xx, timeouts).
    #[arg(long, global = true, env = "MENU_VISUALISER_MAX_RETRIES", default_value_t = 0)]
    max_retries: u32,

    /// Per-call service timeout in seconds.
    #[arg(long, global = true, env = "MENU_VISUALISER_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Generated-image download timeout in seconds.
    #[arg(long, global = true, env = "MENU_VISUALISER_DOWNLOAD_TIMEOUT", default_value_t = 60)]
    download_timeout: u64,

    /// JPEG quality (1–100) for transcoded images.
    #[arg(long, global = true, env = "MENU_VISUALISER_JPEG_QUALITY", default_value_t = 90,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    jpeg_quality: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract, structure and illustrate a whole menu.
    Digitize(DigitizeArgs),
    /// Generate a single dish photo.
    Dish(DishArgs),
}

#[derive(Args, Debug)]
struct DigitizeArgs {
    /// Menu image or PDF.
    document: PathBuf,

    /// Write menu.json and the dish JPEGs to this directory.
    #[arg(short, long, env = "MENU_VISUALISER_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Print the full result as JSON (images base64-encoded).
    #[arg(long)]
    json: bool,

    /// Analyze every page of a PDF instead of only the first.
    #[arg(long)]
    all_pages: bool,

    /// Disable progress bar.
    #[arg(long, env = "MENU_VISUALISER_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Args, Debug)]
struct DishArgs {
    /// Dish name.
    #[arg(long)]
    name: String,

    /// Optional dish description.
    #[arg(long)]
    description: Option<String>,

    /// Directory the JPEG is written to.
    #[arg(long = "output-dir", visible_alias = "output_dir", default_value = "src/assets")]
    output_dir: PathBuf,
}

/// Service endpoints and keys; each falls back to its environment variable.
#[derive(Args, Debug)]
struct Credentials {
    #[arg(long, global = true, env = ENV_DOCUMENT_ENDPOINT, hide = true)]
    document_endpoint: Option<String>,
    #[arg(long, global = true, env = ENV_DOCUMENT_KEY, hide = true, hide_env_values = true)]
    document_key: Option<String>,
    #[arg(long, global = true, env = ENV_CHAT_ENDPOINT, hide = true)]
    chat_endpoint: Option<String>,
    #[arg(long, global = true, env = ENV_CHAT_KEY, hide = true, hide_env_values = true)]
    chat_key: Option<String>,
    #[arg(long, global = true, env = ENV_CHAT_DEPLOYMENT, hide = true)]
    chat_deployment: Option<String>,
    #[arg(long, global = true, env = ENV_IMAGE_ENDPOINT, hide = true)]
    image_endpoint: Option<String>,
    #[arg(long, global = true, env = ENV_IMAGE_KEY, hide = true, hide_env_values = true)]
    image_key: Option<String>,
    #[arg(long, global = true, env = ENV_IMAGE_DEPLOYMENT, hide = true)]
    image_deployment: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar provides the feedback that matters; library INFO logs
    // would only interleave with it.
    let show_progress = match &cli.command {
        Command::Digitize(args) => !cli.quiet && !args.no_progress && !args.json,
        Command::Dish(_) => false,
    };
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn PipelineProgressCallback>)
    } else {
        None
    };

    match &cli.command {
        Command::Digitize(args) => {
            let config = build_config(&cli, !args.all_pages, progress_cb)?;
            run_digitize(&cli, args, &config).await
        }
        Command::Dish(args) => {
            let config = build_config(&cli, true, None)?;
            let path = render_dish(
                &config,
                &args.name,
                args.description.as_deref(),
                &args.output_dir,
            )
            .await
            .with_context(|| format!("Failed to render '{}'", args.name))?;
            if !cli.quiet {
                eprintln!("{} Saved {}", green("✔"), bold(&path.display().to_string()));
            }
            Ok(())
        }
    }
}

async fn run_digitize(cli: &Cli, args: &DigitizeArgs, config: &PipelineConfig) -> Result<()> {
    let pipeline = MenuPipeline::from_config(config).context("Invalid configuration")?;

    let result = match &args.output_dir {
        Some(dir) => pipeline
            .run_to_dir(&args.document, dir)
            .await
            .context("Digitization failed")?,
        None => pipeline
            .run(&args.document)
            .await
            .context("Digitization failed")?,
    };

    if args.json {
        let json = serde_json::to_string_pretty(&result).context("Failed to serialise result")?;
        println!("{json}");
        return Ok(());
    }

    if !cli.quiet {
        print_menu(&result);
        if let Some(dir) = &args.output_dir {
            eprintln!(
                "   {} + {} images  →  {}",
                MANIFEST_FILE,
                result.images.len(),
                bold(&dir.display().to_string())
            );
        }
        eprintln!(
            "   {} lines  /  {} items  —  {}ms total",
            dim(&result.stats.line_count.to_string()),
            dim(&result.stats.item_count.to_string()),
            result.stats.total_duration_ms,
        );
    }
    Ok(())
}

fn print_menu(result: &PipelineResult) {
    if result.payload_status == PayloadStatus::Malformed {
        eprintln!(
            "{} The structuring reply was not valid JSON; no items were recovered.",
            yellow("⚠")
        );
    }
    for (item, image) in result.gallery() {
        let marker = if image.is_some() { green("●") } else { dim("○") };
        println!("{marker} {}  {}", bold(&item.name), cyan(&item.price));
        if let Some(desc) = item.description() {
            println!("    {}", dim(desc));
        }
    }
}

/// Map CLI args to `PipelineConfig`.
fn build_config(
    cli: &Cli,
    first_page_only: bool,
    progress: Option<ProgressCallback>,
) -> Result<PipelineConfig> {
    let c = &cli.credentials;
    let value = |v: &Option<String>| v.clone().unwrap_or_default();

    let mut builder = PipelineConfig::builder()
        .document_credentials(value(&c.document_endpoint), value(&c.document_key))
        .chat_credentials(
            value(&c.chat_endpoint),
            value(&c.chat_key),
            value(&c.chat_deployment),
        )
        .image_credentials(
            value(&c.image_endpoint),
            value(&c.image_key),
            value(&c.image_deployment),
        )
        .first_page_only(first_page_only)
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout)
        .jpeg_quality(cli.jpeg_quality);

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
