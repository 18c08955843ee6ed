use std::sync::Arc;

use agmem_store::{queries, Store};
use agmem_types::{
    context, estimate_tokens, new_id, Conversation, ConversationStatus, Ctx, Error, Message,
    Result, Role, ToolCall,
};
use chrono::Utc;

use crate::branch::require_unarchived_branch;
use crate::embedding::EmbeddingGate;
use crate::locks::EngineLocks;

/// Conversation lifecycle: create, append, fork, delete.
///
/// Appends are serialized per conversation id, which makes `sequence_num`
/// equal to append order.
pub struct ConversationEngine {
    store: Arc<Store>,
    embeddings: Arc<EmbeddingGate>,
    locks: Arc<EngineLocks>,
}

#[derive(Debug, Clone, Default)]
pub struct CreateConversationRequest {
    pub session_id: Option<String>,
    pub agent_id: Option<String>,
    pub task_id: Option<String>,
    pub title: Option<String>,
    pub model: Option<String>,
    pub branch: String,
}

impl CreateConversationRequest {
    pub fn new(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct AppendMessageRequest {
    pub conversation_id: String,
    pub role: Role,
    pub content: Option<String>,
    pub thinking: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub session_id: Option<String>,
    pub agent_id: Option<String>,
    /// Client-supplied count; estimated from content when absent.
    pub token_count: Option<i64>,
    pub model: Option<String>,
    pub branch: String,
}

impl AppendMessageRequest {
    pub fn new(
        conversation_id: impl Into<String>,
        role: Role,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            role,
            content: None,
            thinking: None,
            tool_calls: Vec::new(),
            session_id: None,
            agent_id: None,
            token_count: None,
            model: None,
            branch: branch.into(),
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_thinking(mut self, thinking: impl Into<String>) -> Self {
        self.thinking = Some(thinking.into());
        self
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ForkRequest {
    pub parent_id: String,
    pub message_id: String,
    pub title: Option<String>,
    pub branch: String,
}

impl ConversationEngine {
    pub fn new(store: Arc<Store>, embeddings: Arc<EmbeddingGate>, locks: Arc<EngineLocks>) -> Self {
        Self {
            store,
            embeddings,
            locks,
        }
    }

    pub async fn create(
        &self,
        ctx: &Ctx,
        request: CreateConversationRequest,
    ) -> Result<Conversation> {
        let ctx = ctx.or_timeout(context::WRITE_DEADLINE);
        ctx.check()?;

        let conversation = Conversation {
            id: new_id(),
            session_id: request.session_id,
            agent_id: request.agent_id,
            task_id: request.task_id,
            branch_name: request.branch,
            title: request.title,
            parent_conversation_id: None,
            fork_point_message_id: None,
            status: ConversationStatus::Active,
            message_count: 0,
            total_tokens: 0,
            model: request.model,
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
        };

        self.store.with_conn(|conn| {
            require_unarchived_branch(conn, &conversation.branch_name)?;
            queries::conversations::insert(conn, &conversation)?;
            Ok(())
        })?;

        Ok(conversation)
    }

    pub async fn get(&self, ctx: &Ctx, id: &str, branch: &str) -> Result<Conversation> {
        ctx.check()?;
        self.store.with_conn(|conn| {
            queries::conversations::get(conn, id, branch)?.ok_or_else(|| {
                Error::not_found(format!("conversation '{id}' not on branch '{branch}'"))
            })
        })
    }

    pub async fn list(&self, ctx: &Ctx, branch: &str, limit: usize) -> Result<Vec<Conversation>> {
        ctx.check()?;
        self.store
            .with_conn(|conn| queries::conversations::list(conn, branch, limit))
    }

    /// Append under the per-conversation lock; `sequence_num` is gap-free.
    ///
    /// The message lands on the conversation's branch; `request.branch` names
    /// that branch and a mismatch surfaces as NotFound.
    pub async fn append_message(
        &self,
        ctx: &Ctx,
        request: AppendMessageRequest,
    ) -> Result<Message> {
        let ctx = ctx.or_timeout(context::WRITE_DEADLINE);
        ctx.check()?;

        let embedding = match &request.content {
            Some(content) => self.embeddings.embed(&ctx, content).await?,
            None => None,
        };

        let conv_lock = self.locks.conversations.get(&request.conversation_id);
        let _guard = conv_lock.lock().await;
        ctx.check()?;

        self.store.with_tx(|tx| {
            let conversation =
                queries::conversations::get(tx, &request.conversation_id, &request.branch)?
                    .ok_or_else(|| {
                        Error::not_found(format!(
                            "conversation '{}' not on branch '{}'",
                            request.conversation_id, request.branch
                        ))
                    })?;

            let next_seq = queries::messages::max_sequence_num(
                tx,
                &conversation.id,
                &conversation.branch_name,
            )?
            .unwrap_or(0)
                + 1;

            let token_count = request.token_count.unwrap_or_else(|| {
                request
                    .content
                    .as_deref()
                    .map(estimate_tokens)
                    .unwrap_or(0)
            });

            let message = Message {
                id: new_id(),
                conversation_id: conversation.id.clone(),
                session_id: request.session_id.clone().or(conversation.session_id.clone()),
                agent_id: request.agent_id.clone().or(conversation.agent_id.clone()),
                role: request.role,
                content: request.content.clone(),
                thinking: request.thinking.clone(),
                embedding: embedding.clone(),
                tool_calls: request.tool_calls.clone(),
                token_count,
                model: request.model.clone().or(conversation.model.clone()),
                sequence_num: next_seq,
                branch_name: conversation.branch_name.clone(),
                created_at: Utc::now(),
            };

            queries::messages::insert(tx, &message)?;
            queries::conversations::bump_counts(
                tx,
                &conversation.id,
                &conversation.branch_name,
                1,
                token_count,
            )?;
            Ok(message)
        })
    }

    /// Fork at a message: the child holds copies of the prefix up to and
    /// including the pivot, with fresh ids and preserved sequence numbers.
    /// The parent is untouched.
    pub async fn fork(&self, ctx: &Ctx, request: ForkRequest) -> Result<Conversation> {
        let ctx = ctx.or_timeout(context::WRITE_DEADLINE);
        ctx.check()?;

        self.store.with_tx(|tx| {
            let parent = queries::conversations::get(tx, &request.parent_id, &request.branch)?
                .ok_or_else(|| {
                    Error::not_found(format!(
                        "conversation '{}' not on branch '{}'",
                        request.parent_id, request.branch
                    ))
                })?;

            let pivot = queries::messages::get(tx, &request.message_id, &request.branch)?
                .ok_or_else(|| {
                    Error::not_found(format!("message '{}' does not exist", request.message_id))
                })?;
            if pivot.conversation_id != parent.id {
                return Err(Error::invalid_argument(format!(
                    "message '{}' does not belong to conversation '{}'",
                    request.message_id, request.parent_id
                )));
            }

            let prefix =
                queries::messages::list_up_to(tx, &parent.id, &request.branch, pivot.sequence_num)?;

            let child = Conversation {
                id: new_id(),
                session_id: parent.session_id.clone(),
                agent_id: parent.agent_id.clone(),
                task_id: parent.task_id.clone(),
                branch_name: parent.branch_name.clone(),
                title: request.title.clone().or_else(|| {
                    parent.title.as_ref().map(|t| format!("{t} (fork)"))
                }),
                parent_conversation_id: Some(parent.id.clone()),
                fork_point_message_id: Some(pivot.id.clone()),
                status: ConversationStatus::Forked,
                message_count: prefix.len() as i64,
                total_tokens: prefix.iter().map(|m| m.token_count).sum(),
                model: parent.model.clone(),
                metadata: serde_json::json!({}),
                created_at: Utc::now(),
            };
            queries::conversations::insert(tx, &child)?;

            for message in &prefix {
                let mut copy = message.clone();
                copy.id = new_id();
                copy.conversation_id = child.id.clone();
                queries::messages::insert(tx, &copy)?;
            }

            Ok(child)
        })
    }

    pub async fn set_status(
        &self,
        ctx: &Ctx,
        id: &str,
        branch: &str,
        status: ConversationStatus,
    ) -> Result<()> {
        let ctx = ctx.or_timeout(context::WRITE_DEADLINE);
        ctx.check()?;
        let updated = self
            .store
            .with_conn(|conn| queries::conversations::set_status(conn, id, branch, status))?;
        if !updated {
            return Err(Error::not_found(format!(
                "conversation '{id}' not on branch '{branch}'"
            )));
        }
        Ok(())
    }

    /// Delete a conversation; its messages cascade.
    pub async fn delete(&self, ctx: &Ctx, id: &str, branch: &str) -> Result<()> {
        let ctx = ctx.or_timeout(context::WRITE_DEADLINE);
        ctx.check()?;

        let conv_lock = self.locks.conversations.get(id);
        let _guard = conv_lock.lock().await;

        let deleted = self
            .store
            .with_tx(|tx| queries::conversations::delete(tx, id, branch))?;
        if !deleted {
            return Err(Error::not_found(format!(
                "conversation '{id}' not on branch '{branch}'"
            )));
        }
        Ok(())
    }
}
