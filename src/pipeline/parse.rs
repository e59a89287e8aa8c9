//! The JSON boundary between structuring and synthesis.
//!
//! The structuring reply is model-generated text. It is usually a bare JSON
//! array, but models also wrap it in a ```` ```json ```` fence, prefix it with
//! "Here is the menu:", or return a single object. [`parse_structured_payload`]
//! recovers what it can and otherwise returns
//! [`StructuredPayload::Malformed`]; it never fails.

use crate::model::{MenuItem, PayloadStatus};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

static RE_CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*\s*\n(.*?)\n?```\s*$").unwrap());

/// Keys under which a wrapper object may hold the item list.
const WRAPPER_KEYS: [&str; 3] = ["items", "menu", "dishes"];

/// Outcome of interpreting the structuring reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuredPayload {
    /// A (possibly empty) item list was recovered.
    Parsed(Vec<MenuItem>),
    /// Nothing usable; the run continues with zero items.
    Malformed { raw: String, reason: String },
}

impl StructuredPayload {
    pub fn status(&self) -> PayloadStatus {
        match self {
            StructuredPayload::Parsed(_) => PayloadStatus::Parsed,
            StructuredPayload::Malformed { .. } => PayloadStatus::Malformed,
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, StructuredPayload::Malformed { .. })
    }

    /// The parsed items, or an empty list for a malformed payload.
    pub fn into_items(self) -> Vec<MenuItem> {
        match self {
            StructuredPayload::Parsed(items) => items,
            StructuredPayload::Malformed { .. } => Vec::new(),
        }
    }
}

/// Interpret `raw` as a list of [`MenuItem`]s.
///
/// Tried in order: strict JSON, the body of a surrounding code fence, then
/// the outermost `[...]` or `{...}` span.
pub fn parse_structured_payload(raw: &str) -> StructuredPayload {
    let trimmed = raw.trim();

    let strict_error = match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => return from_value(raw, value),
        Err(e) => e.to_string(),
    };

    for candidate in recovery_candidates(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(candidate) {
            debug!("Recovered JSON from a {}-char span", candidate.len());
            return from_value(raw, value);
        }
    }

    StructuredPayload::Malformed {
        raw: raw.to_string(),
        reason: strict_error,
    }
}

fn recovery_candidates(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    if let Some(caps) = RE_CODE_FENCE.captures(text) {
        if let Some(body) = caps.get(1) {
            out.push(body.as_str().trim());
        }
    }
    for (open, close) in [('[', ']'), ('{', '}')] {
        if let (Some(start), Some(end)) = (text.find(open), text.rfind(close)) {
            if start < end {
                out.push(&text[start..=end]);
            }
        }
    }
    out
}

fn from_value(raw: &str, value: Value) -> StructuredPayload {
    match items_from_value(value) {
        Ok(items) => StructuredPayload::Parsed(items),
        Err(reason) => StructuredPayload::Malformed {
            raw: raw.to_string(),
            reason,
        },
    }
}

fn items_from_value(value: Value) -> Result<Vec<MenuItem>, String> {
    match value {
        Value::Array(entries) => Ok(entries
            .into_iter()
            .enumerate()
            .filter_map(|(i, entry)| item_from_entry(i, entry))
            .collect()),
        Value::Object(mut map) => {
            if map.contains_key("name") {
                return Ok(item_from_entry(0, Value::Object(map)).into_iter().collect());
            }
            for key in WRAPPER_KEYS {
                if let Some(inner @ Value::Array(_)) = map.remove(key) {
                    return items_from_value(inner);
                }
            }
            Err("JSON object holds no menu items".to_string())
        }
        // Some models double-encode: the whole array arrives as a JSON string.
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(inner @ (Value::Array(_) | Value::Object(_))) => items_from_value(inner),
            _ => Err("JSON string is not a menu".to_string()),
        },
        other => Err(format!("expected a JSON array, got {}", json_kind(&other))),
    }
}

fn item_from_entry(index: usize, entry: Value) -> Option<MenuItem> {
    match serde_json::from_value::<MenuItem>(entry) {
        Ok(item) if item.name.trim().is_empty() => {
            warn!("Dropping menu entry {}: blank name", index);
            None
        }
        Ok(mut item) => {
            item.name = item.name.trim().to_string();
            Some(item)
        }
        Err(e) => {
            warn!("Dropping menu entry {}: {}", index, e);
            None
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
