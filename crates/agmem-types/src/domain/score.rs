use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Numeric judgement of a target along one dimension, in [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Score {
    pub id: String,
    pub target_type: String,
    pub target_id: String,
    pub scorer: String,
    pub dimension: String,
    pub value: f64,
    pub explanation: Option<String>,
    pub created_at: DateTime<Utc>,
}
