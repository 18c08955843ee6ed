use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Role of the message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            "tool" => Ok(Role::Tool),
            other => Err(Error::internal(format!("unknown role '{other}'"))),
        }
    }
}

/// Conversation lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    Forked,
    Completed,
    Archived,
}

impl ConversationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConversationStatus::Active => "active",
            ConversationStatus::Forked => "forked",
            ConversationStatus::Completed => "completed",
            ConversationStatus::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(ConversationStatus::Active),
            "forked" => Ok(ConversationStatus::Forked),
            "completed" => Ok(ConversationStatus::Completed),
            "archived" => Ok(ConversationStatus::Archived),
            other => Err(Error::internal(format!(
                "unknown conversation status '{other}'"
            ))),
        }
    }
}

/// A tool invocation recorded on an assistant message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default)]
    pub is_error: bool,
}

/// Chat-history container with strictly ordered messages and fork support.
///
/// Invariant: when `parent_conversation_id` is set, `fork_point_message_id`
/// references a message of that parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub session_id: Option<String>,
    pub agent_id: Option<String>,
    pub task_id: Option<String>,
    pub branch_name: String,
    pub title: Option<String>,
    pub parent_conversation_id: Option<String>,
    pub fork_point_message_id: Option<String>,
    pub status: ConversationStatus,
    pub message_count: i64,
    pub total_tokens: i64,
    pub model: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// One message of a conversation.
///
/// `sequence_num` is strictly increasing within the conversation and
/// gap-free for the original (non-forked) range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub session_id: Option<String>,
    pub agent_id: Option<String>,
    pub role: Role,
    pub content: Option<String>,
    pub thinking: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub tool_calls: Vec<ToolCall>,
    pub token_count: i64,
    pub model: Option<String>,
    pub sequence_num: i64,
    pub branch_name: String,
    pub created_at: DateTime<Utc>,
}
