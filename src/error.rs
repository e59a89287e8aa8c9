//! Error types for the menu-visualiser library.
//!
//! Three types reflect three distinct failure modes:
//!
//! * [`MenuError`] — **Fatal**: the run cannot produce a result at all
//!   (missing credentials, unreadable document, OCR or structuring call
//!   failed, a non-policy image-generation failure). Returned as
//!   `Err(MenuError)` from the `run*` entry points.
//!
//! * [`SkipReason`] — **Non-fatal**: one menu item could not be rendered
//!   because the image service refused its prompt. Stored in
//!   [`crate::model::PipelineResult::skipped`]; the batch keeps going.
//!
//! * [`CapabilityError`] — what an external service call returned. The
//!   stages wrap it into a `MenuError` or downgrade it to a `SkipReason`.
//!
//! A malformed structuring payload is not an error at all: it is the
//! [`crate::pipeline::parse::StructuredPayload::Malformed`] variant and the
//! run continues with zero items.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the menu-visualiser library.
#[derive(Debug, Error)]
pub enum MenuError {
    // ── Config errors ─────────────────────────────────────────────────────
    /// One or more service credentials are missing. Raised before any
    /// network call is made.
    #[error(
        "Missing service credentials: {}\nSet them in the environment or pass an explicit PipelineConfig.",
        missing.join(", ")
    )]
    Configuration { missing: Vec<String> },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Input errors ──────────────────────────────────────────────────────
    /// The document path does not resolve to a readable file.
    #[error("Cannot read document '{path}': {reason}")]
    DocumentUnreadable { path: PathBuf, reason: String },

    // ── Stage errors ──────────────────────────────────────────────────────
    /// The document-analysis call failed.
    #[error("Text extraction failed: {0}")]
    ExtractionFailed(#[source] CapabilityError),

    /// The text-generation call failed.
    #[error("Menu structuring failed: {0}")]
    StructuringFailed(#[source] CapabilityError),

    /// Image generation failed for a reason other than content policy.
    /// Items after `item_index` were not attempted.
    #[error("Image synthesis failed on item {item_index} ('{item_name}'): {source}")]
    SynthesisFailed {
        item_index: usize,
        item_name: String,
        #[source]
        source: CapabilityError,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A failed call to one of the external services.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CapabilityError {
    /// The service refused the request on content-policy grounds.
    #[error("request rejected by content policy: {0}")]
    ContentPolicy(String),

    /// HTTP 429.
    #[error("rate limit exceeded{}", retry_after_secs.map(|s| format!(" (retry after {s}s)")).unwrap_or_default())]
    RateLimited { retry_after_secs: Option<u64> },

    /// HTTP 401/403.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// HTTP 5xx.
    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },

    /// Any other non-success HTTP status.
    #[error("request rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Connection refused, DNS failure, TLS error, body read failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The call exceeded its timeout.
    #[error("timed out after {0}s")]
    Timeout(u64),

    /// The service answered 2xx but the body was not what we expected.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// A long-running operation reported failure.
    #[error("operation failed: {0}")]
    OperationFailed(String),
}

impl CapabilityError {
    /// Whether a retry has a reasonable chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CapabilityError::RateLimited { .. }
                | CapabilityError::Server { .. }
                | CapabilityError::Transport(_)
                | CapabilityError::Timeout(_)
        )
    }

    pub fn is_content_policy(&self) -> bool {
        matches!(self, CapabilityError::ContentPolicy(_))
    }

    /// Map a `reqwest` send/read error, distinguishing timeouts.
    pub(crate) fn from_reqwest(err: reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            CapabilityError::Timeout(timeout_secs)
        } else if err.is_decode() {
            CapabilityError::MalformedResponse(err.to_string())
        } else {
            CapabilityError::Transport(err.to_string())
        }
    }
}

/// Why a single menu item produced no image.
#[derive(Debug, Clone, Error, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SkipReason {
    /// The image service refused the dish prompt.
    #[error("content policy: {detail}")]
    ContentPolicy { detail: String },
}
