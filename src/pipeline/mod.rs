//! Pipeline stages for menu digitization.
//!
//! Each submodule implements exactly one step; the coordinator in
//! [`crate::digitize`] sequences them.
//!
//! ## Data Flow
//!
//! ```text
//! document ──▶ extract ──▶ structure ──▶ parse ──▶ synthesize
//!  (path)       (OCR)       (LLM text)   (JSON)    (one image per dish)
//! ```
//!
//! 1. [`extract`]    — OCR the document and normalise each line
//! 2. [`structure`]  — one chat completion grouping lines into items
//! 3. [`parse`]      — defensive JSON boundary; never fails, only degrades
//! 4. [`synthesize`] — sequential image generation with per-item skip policy

pub mod extract;
pub mod parse;
pub mod structure;
pub mod synthesize;
