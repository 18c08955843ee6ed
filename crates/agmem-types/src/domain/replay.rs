use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayStatus {
    Pending,
    Completed,
}

impl ReplayStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReplayStatus::Pending => "pending",
            ReplayStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(ReplayStatus::Pending),
            "completed" => Ok(ReplayStatus::Completed),
            other => Err(Error::internal(format!("unknown replay status '{other}'"))),
        }
    }
}

/// Configuration a client drives the re-execution with.
///
/// The core never invokes a model; it only records the descriptor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplayConfig {
    pub system_prompt: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<i64>,
    /// Tool names the replay is allowed to use; empty means all.
    pub tool_filter: Vec<String>,
    pub extra_context: Option<String>,
}

/// Descriptor linking an original conversation to its replay clone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Replay {
    pub id: String,
    pub source_conversation_id: String,
    pub replay_conversation_id: String,
    pub pivot_message_id: String,
    pub branch_name: String,
    pub config: ReplayConfig,
    pub status: ReplayStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}
