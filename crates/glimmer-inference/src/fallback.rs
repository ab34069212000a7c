//! Per-kind fallback payloads.
//!
//! Each fallback has the same shape a successful result of that kind would
//! have, so callers can render it without special cases. All carry
//! `fallback: true` and the final error message.

use serde_json::{json, Value as JsonValue};

use glimmer_core::OperationKind;

use crate::response::mark_fallback;

/// Build the fallback payload for `kind` after `error`.
pub fn fallback_payload(kind: &OperationKind, error: &str) -> JsonValue {
    let shape = match kind {
        OperationKind::SkinAnalysis => json!({
            "skin_type": "unknown",
            "concerns": [],
            "recommendations": [],
            "confidence": 0.0,
        }),
        OperationKind::PhotoAnalysis => json!({
            "skin_tone": null,
            "observations": [],
            "concerns": [],
            "confidence": 0.0,
        }),
        OperationKind::ProductRecommendation => json!({
            "products": [],
            "reasoning": null,
            "confidence": 0.0,
        }),
        OperationKind::RoutineGeneration => json!({
            "morning": [],
            "evening": [],
            "notes": [],
            "confidence": 0.0,
        }),
        OperationKind::QueryGeneration => json!({
            "sql": null,
            "concerns": [],
            "excluded": [],
            "confidence": 0.0,
        }),
        OperationKind::Other(_) => json!({
            "result": null,
            "confidence": 0.0,
        }),
    };

    let mut payload = mark_fallback(shape, error);
    if let Some(obj) = payload.as_object_mut() {
        obj.insert(
            "operation_kind".to_string(),
            JsonValue::String(kind.as_str().to_string()),
        );
    }
    payload
}
