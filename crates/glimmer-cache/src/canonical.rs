//! Canonical JSON and cache key derivation.
//!
//! Two inputs that differ only in object key order, or in volatile fields
//! such as request timestamps, produce the same key.

use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};

use glimmer_core::{defaults, OperationKind};

/// Whether `field` is excluded from key derivation.
pub fn is_volatile(field: &str) -> bool {
    defaults::CACHE_VOLATILE_FIELDS.contains(&field)
}

/// Serialize `value` with sorted object keys and volatile fields removed at
/// every nesting level.
pub fn canonical_json(value: &JsonValue) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &JsonValue, out: &mut String) {
    match value {
        JsonValue::Object(map) => {
            let mut keys: Vec<&String> = map.keys().filter(|k| !is_volatile(k)).collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&JsonValue::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        JsonValue::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Derive the cache key for `(subject, kind, input)`.
///
/// Hex-encoded SHA-256 of the canonical form.
pub fn cache_key(subject_id: &str, kind: &OperationKind, input: &JsonValue) -> String {
    let mut hasher = Sha256::new();
    hasher.update(JsonValue::String(subject_id.to_string()).to_string().as_bytes());
    hasher.update(b"\n");
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(canonical_json(input).as_bytes());
    hex::encode(hasher.finalize())
}
