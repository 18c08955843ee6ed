use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Fact lifecycle state.
///
/// Supersession replaces an active fact via the `parent_id` chain; the old
/// fact becomes `superseded`, not deleted. Invalidation is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactStatus {
    Active,
    Superseded,
    Invalidated,
}

impl FactStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FactStatus::Active => "active",
            FactStatus::Superseded => "superseded",
            FactStatus::Invalidated => "invalidated",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(FactStatus::Active),
            "superseded" => Ok(FactStatus::Superseded),
            "invalidated" => Ok(FactStatus::Invalidated),
            other => Err(Error::internal(format!("unknown fact status '{other}'"))),
        }
    }
}

/// A durable, embedding-indexed statement.
///
/// Invariant: at most one `active` fact per `parent_id` chain on a branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub id: String,
    pub fact_text: String,
    /// `None` when the embedding provider was unavailable at write time
    /// (`embedding_pending` is then set in metadata).
    pub embedding: Option<Vec<f32>>,
    pub category: Option<String>,
    pub confidence: f64,
    pub status: FactStatus,
    pub source_type: Option<String>,
    pub source_id: Option<String>,
    /// The fact this one superseded, if any.
    pub parent_id: Option<String>,
    pub session_id: Option<String>,
    pub agent_id: Option<String>,
    pub task_id: Option<String>,
    pub branch_name: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Fact {
    pub fn is_active(&self) -> bool {
        self.status == FactStatus::Active
    }
}
