//! # Query Similarity
//!
//! Normalized Levenshtein similarity over serialized query bodies:
//! `(max_len - distance) / max_len`, in `[0, 1]`.

use serde_json::Value;

/// Two queries at or above this similarity are considered related.
pub const SIMILARITY_THRESHOLD: f64 = 0.8;

pub fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    let distance = strsim::levenshtein(a, b);
    (max_len - distance) as f64 / max_len as f64
}

/// Similarity of two query bodies through their compact JSON serialization.
pub fn query_similarity(a: &Value, b: &Value) -> f64 {
    similarity(&a.to_string(), &b.to_string())
}
