use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    Running,
    Done,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Open => "open",
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "open" => Ok(TaskStatus::Open),
            "running" => Ok(TaskStatus::Running),
            "done" => Ok(TaskStatus::Done),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(Error::internal(format!("unknown task status '{other}'"))),
        }
    }
}

/// An objective with zero or more joined agents.
///
/// Each joined agent writes to an isolated branch forked from the task
/// branch; branches are independent entities the task only references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub objective: String,
    pub task_type: String,
    pub status: TaskStatus,
    pub created_branch: String,
    pub created_at: DateTime<Utc>,
}

/// Membership of one agent in a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAgent {
    pub task_id: String,
    pub agent_id: String,
    pub assigned_branch: String,
    pub role: Option<String>,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
}
