//! Progress-callback trait for pipeline stage and per-item events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the pipeline moves through extraction, structuring and
//! per-dish image synthesis.
//!
//! Callers can forward events to a channel, a WebSocket or a terminal
//! progress bar without the library knowing how the host application
//! communicates.
//!
//! # Example
//!
//! ```rust
//! use menu_visualiser::{PipelineProgressCallback, PipelineConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     rendered: AtomicUsize,
//! }
//!
//! impl PipelineProgressCallback for CountingCallback {
//!     fn on_item_rendered(&self, index: usize, total: usize, jpeg_len: usize) {
//!         self.rendered.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Dish {}/{} rendered ({} bytes)", index + 1, total, jpeg_len);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { rendered: AtomicUsize::new(0) });
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(counter as Arc<dyn PipelineProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::error::SkipReason;
use std::fmt;
use std::sync::Arc;

/// The three pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Extract,
    Structure,
    Synthesize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Extract => "extract",
            Stage::Structure => "structure",
            Stage::Synthesize => "synthesize",
        })
    }
}

/// Called by the pipeline as it runs.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Item indices are 0-based positions in the
/// structured menu.
pub trait PipelineProgressCallback: Send + Sync {
    /// A stage is about to start.
    fn on_stage_start(&self, stage: Stage) {
        let _ = stage;
    }

    /// A stage finished. `count` is lines extracted, items parsed, or
    /// images rendered, depending on the stage.
    fn on_stage_complete(&self, stage: Stage, count: usize) {
        let _ = (stage, count);
    }

    /// An image request for one dish is about to be sent.
    fn on_item_start(&self, index: usize, total: usize, name: &str) {
        let _ = (index, total, name);
    }

    /// A dish image was generated and encoded.
    fn on_item_rendered(&self, index: usize, total: usize, jpeg_len: usize) {
        let _ = (index, total, jpeg_len);
    }

    /// A dish was skipped; the batch continues.
    fn on_item_skipped(&self, index: usize, total: usize, reason: &SkipReason) {
        let _ = (index, total, reason);
    }

    /// Called once after the synthesizer finished every item.
    fn on_run_complete(&self, rendered: usize, skipped: usize) {
        let _ = (rendered, skipped);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;
