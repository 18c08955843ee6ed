use std::sync::Arc;

use agmem_store::{queries, Store};
use agmem_types::{
    context, new_id, Conversation, ConversationStatus, Ctx, Error, Replay, ReplayConfig,
    ReplayStatus, Result,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::embedding::EmbeddingGate;
use crate::semantic_diff::{SemanticDiffEngine, SemanticDiffReport};

/// Prepare a conversation for re-execution under new configuration.
///
/// The engine clones the prefix and records the descriptor; clients drive
/// the model and call [`ReplayEngine::complete`] when done.
pub struct ReplayEngine {
    store: Arc<Store>,
    semantic: SemanticDiffEngine,
}

#[derive(Debug, Clone)]
pub struct ReplayRequest {
    pub conversation_id: String,
    pub from_message_id: String,
    pub config: ReplayConfig,
    pub branch: String,
    pub title: Option<String>,
}

/// Structural comparison of a replay against its original.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationDiff {
    pub original_id: String,
    pub replay_id: String,
    pub original_message_count: i64,
    pub replay_message_count: i64,
    pub original_tokens: i64,
    pub replay_tokens: i64,
    /// First sequence number where the two transcripts differ, if any.
    pub diverged_at_seq: Option<i64>,
}

impl ReplayEngine {
    pub fn new(store: Arc<Store>, embeddings: Arc<EmbeddingGate>) -> Self {
        let semantic = SemanticDiffEngine::new(store.clone(), embeddings);
        Self { store, semantic }
    }

    pub async fn replay(&self, ctx: &Ctx, request: ReplayRequest) -> Result<Replay> {
        let ctx = ctx.or_timeout(context::WRITE_DEADLINE);
        ctx.check()?;

        self.store.with_tx(|tx| {
            let source =
                queries::conversations::get(tx, &request.conversation_id, &request.branch)?
                    .ok_or_else(|| {
                        Error::not_found(format!(
                            "conversation '{}' not on branch '{}'",
                            request.conversation_id, request.branch
                        ))
                    })?;

            let pivot = queries::messages::get(tx, &request.from_message_id, &request.branch)?
                .ok_or_else(|| {
                    Error::not_found(format!(
                        "message '{}' does not exist",
                        request.from_message_id
                    ))
                })?;
            if pivot.conversation_id != source.id {
                return Err(Error::invalid_argument(format!(
                    "message '{}' does not belong to conversation '{}'",
                    request.from_message_id, request.conversation_id
                )));
            }

            let prefix = queries::messages::list_up_to(
                tx,
                &source.id,
                &request.branch,
                pivot.sequence_num,
            )?;

            let clone = Conversation {
                id: new_id(),
                session_id: source.session_id.clone(),
                agent_id: source.agent_id.clone(),
                task_id: source.task_id.clone(),
                branch_name: source.branch_name.clone(),
                title: request
                    .title
                    .clone()
                    .or_else(|| source.title.as_ref().map(|t| format!("{t} (replay)"))),
                parent_conversation_id: Some(source.id.clone()),
                fork_point_message_id: Some(pivot.id.clone()),
                status: ConversationStatus::Forked,
                message_count: prefix.len() as i64,
                total_tokens: prefix.iter().map(|m| m.token_count).sum(),
                model: request.config.model.clone().or(source.model.clone()),
                metadata: serde_json::json!({ "replay_of": source.id }),
                created_at: Utc::now(),
            };
            queries::conversations::insert(tx, &clone)?;

            for message in &prefix {
                let mut copy = message.clone();
                copy.id = new_id();
                copy.conversation_id = clone.id.clone();
                queries::messages::insert(tx, &copy)?;
            }

            let replay = Replay {
                id: new_id(),
                source_conversation_id: source.id.clone(),
                replay_conversation_id: clone.id.clone(),
                pivot_message_id: pivot.id.clone(),
                branch_name: source.branch_name.clone(),
                config: request.config.clone(),
                status: ReplayStatus::Pending,
                created_at: Utc::now(),
                completed_at: None,
            };
            queries::replays::insert(tx, &replay)?;
            Ok(replay)
        })
    }

    pub async fn get(&self, ctx: &Ctx, replay_id: &str) -> Result<Replay> {
        ctx.check()?;
        self.store.with_conn(|conn| {
            queries::replays::get(conn, replay_id)?
                .ok_or_else(|| Error::not_found(format!("replay '{replay_id}' does not exist")))
        })
    }

    /// Mark the replay finished; idempotent.
    pub async fn complete(&self, ctx: &Ctx, replay_id: &str) -> Result<Replay> {
        let ctx = ctx.or_timeout(context::WRITE_DEADLINE);
        ctx.check()?;
        self.store.with_conn(|conn| {
            let replay = queries::replays::get(conn, replay_id)?
                .ok_or_else(|| Error::not_found(format!("replay '{replay_id}' does not exist")))?;
            if replay.status == ReplayStatus::Completed {
                return Ok(replay);
            }
            queries::replays::mark_completed(conn, replay_id, Utc::now())?;
            queries::replays::get(conn, replay_id)?
                .ok_or_else(|| Error::internal("replay vanished during completion"))
        })
    }

    /// Structural diff of the replay transcript against the original.
    pub async fn diff(&self, ctx: &Ctx, replay_id: &str) -> Result<ConversationDiff> {
        let ctx = ctx.or_timeout(context::SEARCH_DEADLINE);
        let replay = self.get(&ctx, replay_id).await?;

        self.store.with_conn(|conn| {
            let original = queries::conversations::get(
                conn,
                &replay.source_conversation_id,
                &replay.branch_name,
            )?
            .ok_or_else(|| Error::not_found("original conversation no longer exists"))?;
            let clone = queries::conversations::get(
                conn,
                &replay.replay_conversation_id,
                &replay.branch_name,
            )?
            .ok_or_else(|| Error::not_found("replay conversation no longer exists"))?;

            let original_messages =
                queries::messages::list(conn, &original.id, &replay.branch_name)?;
            let replay_messages = queries::messages::list(conn, &clone.id, &replay.branch_name)?;

            let mut diverged_at_seq = None;
            for (a, b) in original_messages.iter().zip(replay_messages.iter()) {
                if a.role != b.role || a.content != b.content {
                    diverged_at_seq = Some(a.sequence_num);
                    break;
                }
            }
            if diverged_at_seq.is_none()
                && original_messages.len() != replay_messages.len()
            {
                let shorter = original_messages.len().min(replay_messages.len());
                diverged_at_seq = Some(shorter as i64 + 1);
            }

            Ok(ConversationDiff {
                original_id: original.id,
                replay_id: clone.id,
                original_message_count: original.message_count,
                replay_message_count: clone.message_count,
                original_tokens: original.total_tokens,
                replay_tokens: clone.total_tokens,
                diverged_at_seq,
            })
        })
    }

    /// Semantic comparison of the replay against the original.
    pub async fn semantic_diff(&self, ctx: &Ctx, replay_id: &str) -> Result<SemanticDiffReport> {
        let ctx = ctx.or_timeout(context::SEARCH_DEADLINE);
        let replay = self.get(&ctx, replay_id).await?;
        self.semantic
            .diff(
                &ctx,
                &replay.source_conversation_id,
                &replay.replay_conversation_id,
                &replay.branch_name,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agmem_types::Role;
    use crate::branch::BranchManager;
    use crate::conversation::{
        AppendMessageRequest, ConversationEngine, CreateConversationRequest,
    };
    use crate::locks::EngineLocks;

    async fn setup() -> (ConversationEngine, ReplayEngine) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let locks = Arc::new(EngineLocks::new());
        BranchManager::new(store.clone(), locks.clone())
            .ensure_main(&Ctx::background())
            .await
            .unwrap();
        let gate = Arc::new(EmbeddingGate::new(None));
        let conversations = ConversationEngine::new(store.clone(), gate.clone(), locks);
        let replays = ReplayEngine::new(store, gate);
        (conversations, replays)
    }

    #[tokio::test]
    async fn replay_clones_prefix_and_tracks_status() {
        let (conversations, replays) = setup().await;
        let ctx = Ctx::background();
        let conv = conversations
            .create(&ctx, CreateConversationRequest::new("main").with_title("baseline"))
            .await
            .unwrap();

        let mut ids = Vec::new();
        for i in 1..=4 {
            let m = conversations
                .append_message(
                    &ctx,
                    AppendMessageRequest::new(&conv.id, Role::User, "main")
                        .with_content(format!("step {i}")),
                )
                .await
                .unwrap();
            ids.push(m.id);
        }

        let replay = replays
            .replay(
                &ctx,
                ReplayRequest {
                    conversation_id: conv.id.clone(),
                    from_message_id: ids[1].clone(),
                    config: ReplayConfig {
                        model: Some("gpt-x".to_string()),
                        temperature: Some(0.2),
                        ..Default::default()
                    },
                    branch: "main".to_string(),
                    title: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(replay.status, ReplayStatus::Pending);

        let diff = replays.diff(&ctx, &replay.id).await.unwrap();
        assert_eq!(diff.original_message_count, 4);
        assert_eq!(diff.replay_message_count, 2);
        assert_eq!(diff.diverged_at_seq, Some(3));

        let done = replays.complete(&ctx, &replay.id).await.unwrap();
        assert_eq!(done.status, ReplayStatus::Completed);
        // Idempotent.
        let again = replays.complete(&ctx, &replay.id).await.unwrap();
        assert_eq!(again.completed_at, done.completed_at);
    }
}
