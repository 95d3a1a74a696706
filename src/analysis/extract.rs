//! Best-effort JSON extraction from free-form model text.
//!
//! Model output has no enforced schema. [`extract`] never fails: it returns
//! either the parsed payload or the original text untouched.

use serde_json::Value;

const JSON_FENCE: &str = "```json";
const FENCE: &str = "```";

/// Result of [`extract`].
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted {
    /// A JSON payload was found and parsed.
    Json(Value),
    /// Nothing parseable; carries the original text exactly as received.
    Raw(String),
}

impl Extracted {
    pub fn is_json(&self) -> bool {
        matches!(self, Extracted::Json(_))
    }
}

/// Isolate and parse a JSON payload embedded in `raw`.
///
/// Looks, in order, for a block fenced as ```` ```json ````, then any fenced
/// block, then falls back to the whole trimmed text. A missing closing fence
/// extends the block to the end of the text.
pub fn extract(raw: &str) -> Extracted {
    match serde_json::from_str(candidate(raw.trim())) {
        Ok(value) => Extracted::Json(value),
        Err(_) => Extracted::Raw(raw.to_string()),
    }
}

fn candidate(text: &str) -> &str {
    let body = if let Some((_, after)) = text.split_once(JSON_FENCE) {
        after
    } else if let Some((_, after)) = text.split_once(FENCE) {
        after
    } else {
        return text;
    };

    body.split_once(FENCE)
        .map_or(body, |(inner, _)| inner)
        .trim()
}
