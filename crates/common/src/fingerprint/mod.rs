//! Content fingerprinting for staleness detection
//!
//! A fingerprint is a SHA-256 digest over the canonical JSON form of every
//! input actually used for a generation. Object keys are sorted at every
//! depth, so two submissions carrying the same answers in a different key
//! order hash identically. Nothing time- or run-dependent enters the digest.

use crate::inputs::InputSet;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Compute the source hash for a set of collected inputs
pub fn compute_hash(inputs: &InputSet) -> String {
    let mut root = Map::new();
    for (form_id, submission) in inputs.iter() {
        root.insert(form_id.clone(), Value::Object(submission.data.clone()));
    }
    hash_value(&Value::Object(root))
}

/// Hash an arbitrary JSON value in canonical form
pub fn hash_value(value: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(value, &mut canonical);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Key strings serialize infallibly
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
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
