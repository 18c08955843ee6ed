use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Edge in the entity relation graph with a temporal validity interval.
///
/// `valid_to = None` means currently valid; closing sets `valid_to`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub id: String,
    pub source_entity: String,
    pub target_entity: String,
    pub relation_type: String,
    pub properties: serde_json::Value,
    pub confidence: f64,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
    pub session_id: Option<String>,
    pub branch_name: String,
    pub created_at: DateTime<Utc>,
}

impl Relation {
    pub fn is_open(&self) -> bool {
        self.valid_to.is_none()
    }
}

/// Result of a breadth-first relation traversal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationGraph {
    pub root: String,
    pub nodes: Vec<String>,
    pub edges: Vec<Relation>,
    /// True when the node cap stopped the traversal early.
    pub truncated: bool,
}
