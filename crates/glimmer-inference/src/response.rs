//! Model response parsing.
//!
//! Models are asked for JSON but frequently wrap it in a fenced block or
//! surround it with prose. Parsing tries, in order:
//!
//! 1. a fenced ```` ```json ```` block
//! 2. an unlabelled fenced block
//! 3. the whole trimmed text
//! 4. the span from the first `{` to the last `}`
//!
//! Only objects and arrays count as structured results. When nothing parses
//! the text is kept verbatim with a parse error, at reduced confidence.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

use glimmer_core::{defaults, FALLBACK_FIELD, PARSE_ERROR_FIELD};

/// Interpreted result of one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AiPayload {
    /// The model returned parseable JSON.
    Structured(JsonValue),
    /// The model answered, but not in JSON.
    Raw { text: String, parse_error: String },
    /// Every attempt failed; `payload` is the kind's fallback shape.
    Fallback { payload: JsonValue, error: String },
}

impl AiPayload {
    /// Whether this payload came from the fallback path.
    pub fn is_fallback(&self) -> bool {
        matches!(self, AiPayload::Fallback { .. })
    }

    /// Whether the model's answer could not be parsed.
    pub fn is_raw(&self) -> bool {
        matches!(self, AiPayload::Raw { .. })
    }

    /// Render as the JSON envelope handed to callers and stored in the cache.
    ///
    /// Raw text becomes `{raw_text, confidence: 0.5, parse_error}`.
    pub fn to_json(&self) -> JsonValue {
        match self {
            AiPayload::Structured(value) => value.clone(),
            AiPayload::Raw { text, parse_error } => json!({
                "raw_text": text,
                "confidence": defaults::RAW_RESPONSE_CONFIDENCE,
                PARSE_ERROR_FIELD: parse_error,
            }),
            AiPayload::Fallback { payload, .. } => payload.clone(),
        }
    }

    pub fn into_json(self) -> JsonValue {
        match self {
            AiPayload::Structured(value) => value,
            AiPayload::Fallback { payload, .. } => payload,
            raw => raw.to_json(),
        }
    }

    /// Confidence reported in the payload, if any.
    pub fn confidence(&self) -> Option<f64> {
        match self {
            AiPayload::Structured(value) => value.get("confidence").and_then(JsonValue::as_f64),
            AiPayload::Raw { .. } => Some(defaults::RAW_RESPONSE_CONFIDENCE),
            AiPayload::Fallback { .. } => Some(0.0),
        }
    }
}

/// A fenced block: optional language label, then the body up to the closing fence.
static FENCED_BLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[ \t]*([A-Za-z0-9_+-]*)[ \t]*\r?\n(.*?)```").unwrap());

/// Extract the body of the first fenced block labelled `lang` (case-insensitive).
///
/// An empty `lang` matches only unlabelled fences.
pub fn extract_fenced(text: &str, lang: &str) -> Option<String> {
    FENCED_BLOCK_RE
        .captures_iter(text)
        .find(|caps| caps[1].eq_ignore_ascii_case(lang))
        .map(|caps| caps[2].trim().to_string())
}

/// Parse JSON out of a model response.
pub fn extract_json(text: &str) -> Result<JsonValue, String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err("empty response".to_string());
    }

    let mut last_error = "no JSON object found".to_string();
    let mut candidates: Vec<String> = Vec::with_capacity(4);
    if let Some(block) = extract_fenced(trimmed, "json") {
        candidates.push(block);
    }
    if let Some(block) = extract_fenced(trimmed, "") {
        candidates.push(block);
    }
    candidates.push(trimmed.to_string());
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            candidates.push(trimmed[start..=end].to_string());
        }
    }

    for candidate in candidates {
        match serde_json::from_str::<JsonValue>(&candidate) {
            Ok(value) if value.is_object() || value.is_array() => return Ok(value),
            Ok(_) => last_error = "response is not a JSON object".to_string(),
            Err(e) => last_error = e.to_string(),
        }
    }
    Err(last_error)
}

/// Interpret a model's raw text.
pub fn parse_response(text: &str) -> AiPayload {
    match extract_json(text) {
        Ok(value) => AiPayload::Structured(value),
        Err(parse_error) => AiPayload::Raw {
            text: text.to_string(),
            parse_error,
        },
    }
}

/// Attach the fallback marker and error to a fallback shape.
pub(crate) fn mark_fallback(mut payload: JsonValue, error: &str) -> JsonValue {
    if let Some(obj) = payload.as_object_mut() {
        obj.insert(FALLBACK_FIELD.to_string(), JsonValue::Bool(true));
        obj.insert("error".to_string(), JsonValue::String(error.to_string()));
    }
    payload
}
