use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Read-only marker capturing a branch's state.
///
/// A native snapshot records only the capture timestamp and relies on
/// point-in-time reads; a payload snapshot serializes the live rows for
/// portability. Snapshots never mutate the branch they capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub branch_name: String,
    pub label: Option<String>,
    pub captured_at: DateTime<Utc>,
    pub native: bool,
    /// JSON document of branch rows; `None` for native snapshots.
    pub payload: Option<String>,
}
