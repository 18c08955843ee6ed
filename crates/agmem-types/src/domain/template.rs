use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A branch registered as a reusable starting point.
///
/// Re-registering the same name bumps `version`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateBranch {
    pub name: String,
    pub source_branch: String,
    pub version: i64,
    pub applicable_task_types: Vec<String>,
    pub tags: Vec<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}
