use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How a merge moves rows from source to target.
///
/// Strategies are explicit, never inferred. `native` row-level merge and the
/// engine-level `auto` conflict resolution are mutually exclusive per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    Native,
    CherryPick,
    Squash,
    Auto,
}

impl MergeStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            MergeStrategy::Native => "native",
            MergeStrategy::CherryPick => "cherry_pick",
            MergeStrategy::Squash => "squash",
            MergeStrategy::Auto => "auto",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "native" => Ok(MergeStrategy::Native),
            "cherry_pick" => Ok(MergeStrategy::CherryPick),
            "squash" => Ok(MergeStrategy::Squash),
            "auto" => Ok(MergeStrategy::Auto),
            other => Err(Error::invalid_argument(format!(
                "unknown merge strategy '{other}'"
            ))),
        }
    }
}

/// Row-level conflict policy for the `native` strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Keep the target row
    Skip,
    /// Overwrite with the source row
    Accept,
}

/// Judge resolution for an `auto` merge conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeVerdict {
    KeepSource,
    KeepTarget,
    KeepBoth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergedBy {
    Auto,
    Judge,
    Manual,
}

impl MergedBy {
    pub fn as_str(self) -> &'static str {
        match self {
            MergedBy::Auto => "auto",
            MergedBy::Judge => "judge",
            MergedBy::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "auto" => Ok(MergedBy::Auto),
            "judge" => Ok(MergedBy::Judge),
            "manual" => Ok(MergedBy::Manual),
            other => Err(Error::internal(format!("unknown merged_by '{other}'"))),
        }
    }
}

/// Durable record of one merge, including every per-item decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeHistory {
    pub id: String,
    pub source_branch: String,
    pub target_branch: String,
    pub strategy: MergeStrategy,
    pub items_merged: Vec<String>,
    pub items_rejected: Vec<String>,
    /// Map of item id to the action taken (`copied`, `kept_target`, ...).
    pub conflict_resolution: serde_json::Value,
    pub merged_by: MergedBy,
    pub created_at: DateTime<Utc>,
}
