// Typed query modules, one per table family. Free functions over
// &Connection so callers compose them inside a single transaction.

pub mod branches;
pub mod consolidations;
pub mod conversations;
pub mod facts;
pub mod merges;
pub mod messages;
pub mod observations;
pub mod relations;
pub mod replays;
pub mod scores;
pub mod sessions;
pub mod snapshots;
pub mod tasks;
pub mod templates;

use agmem_types::{Error, Result};

/// Parse a JSON column, defaulting absent/corrupt values to `default`.
pub(crate) fn json_or(s: Option<String>, default: serde_json::Value) -> serde_json::Value {
    s.and_then(|s| serde_json::from_str(&s).ok()).unwrap_or(default)
}

pub(crate) fn json_to_sql(v: &serde_json::Value) -> String {
    v.to_string()
}

pub(crate) fn vec_from_json(s: String) -> Vec<String> {
    serde_json::from_str(&s).unwrap_or_default()
}

pub(crate) fn vec_to_json(v: &[String]) -> String {
    serde_json::to_string(v).unwrap_or_else(|_| "[]".to_string())
}

pub(crate) fn embedding_to_sql(embedding: &Option<Vec<f32>>) -> Result<Option<String>> {
    match embedding {
        Some(v) => serde_json::to_string(v)
            .map(Some)
            .map_err(|e| Error::internal(format!("embedding serialization failed: {e}"))),
        None => Ok(None),
    }
}

pub(crate) fn embedding_from_sql(s: Option<String>) -> Option<Vec<f32>> {
    s.and_then(|s| serde_json::from_str(&s).ok())
}
