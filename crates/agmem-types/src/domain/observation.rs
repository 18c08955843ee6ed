use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Kind of observation an agent recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationType {
    ToolUse,
    Discovery,
    Decision,
    Error,
    Insight,
}

impl ObservationType {
    pub fn as_str(self) -> &'static str {
        match self {
            ObservationType::ToolUse => "tool_use",
            ObservationType::Discovery => "discovery",
            ObservationType::Decision => "decision",
            ObservationType::Error => "error",
            ObservationType::Insight => "insight",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "tool_use" => Ok(ObservationType::ToolUse),
            "discovery" => Ok(ObservationType::Discovery),
            "decision" => Ok(ObservationType::Decision),
            "error" => Ok(ObservationType::Error),
            "insight" => Ok(ObservationType::Insight),
            other => Err(Error::internal(format!(
                "unknown observation type '{other}'"
            ))),
        }
    }
}

/// Append-only record of a tool invocation or discovery.
///
/// Immutable once written; raw I/O is truncated at write time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub id: String,
    pub observation_type: ObservationType,
    pub tool_name: Option<String>,
    pub summary: String,
    pub embedding: Option<Vec<f32>>,
    pub raw_input: Option<String>,
    pub raw_output: Option<String>,
    pub session_id: Option<String>,
    pub branch_name: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
