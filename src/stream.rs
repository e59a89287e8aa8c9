//! Streaming synthesis API: emit one report per item as it resolves.
//!
//! Image generation is the slow stage; a menu with twenty dishes takes
//! minutes. [`synthesize_stream`] lets callers show each photo as soon as it
//! exists instead of waiting for [`crate::MenuPipeline::run`] to finish.
//!
//! Items are processed in menu order, one at a time. A content-policy skip
//! is an `Ok` report whose outcome is
//! [`ItemOutcome::Skipped`](crate::pipeline::synthesize::ItemOutcome::Skipped).
//! The first hard failure is yielded as `Err` and ends the stream.

use crate::error::MenuError;
use crate::model::MenuItem;
use crate::pipeline::synthesize::{ItemReport, Synthesizer};
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of per-item reports.
pub type ItemStream = Pin<Box<dyn Stream<Item = Result<ItemReport, MenuError>> + Send>>;

struct StreamState {
    synthesizer: Arc<Synthesizer>,
    items: Vec<MenuItem>,
    next: usize,
    failed: bool,
}

/// Render `items` in order, yielding each outcome as it completes.
///
/// # Example
/// ```rust,no_run
/// use menu_visualiser::{synthesize_stream, MenuPipeline, PipelineConfig};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let pipeline = MenuPipeline::from_config(&PipelineConfig::from_env())?;
/// let draft = pipeline.read_menu("menu.jpg").await?;
/// let mut reports = synthesize_stream(pipeline.synthesizer(), draft.menu);
/// while let Some(report) = reports.next().await {
///     match report {
///         Ok(r) => println!("{}: {:?}", r.item_name, r.outcome),
///         Err(e) => eprintln!("Error: {e}"),
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub fn synthesize_stream(synthesizer: Arc<Synthesizer>, items: Vec<MenuItem>) -> ItemStream {
    info!("Starting streaming synthesis of {} items", items.len());
    let state = StreamState {
        synthesizer,
        items,
        next: 0,
        failed: false,
    };

    let s = stream::unfold(state, |mut state| async move {
        if state.failed || state.next >= state.items.len() {
            return None;
        }
        let index = state.next;
        state.next += 1;
        let total = state.items.len();
        let result = state
            .synthesizer
            .render_item(index, total, &state.items[index])
            .await;
        state.failed = result.is_err();
        Some((result, state))
    });

    s.boxed()
}
