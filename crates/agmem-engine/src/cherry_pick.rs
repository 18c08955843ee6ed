use std::sync::Arc;

use agmem_store::{queries, Store};
use agmem_types::{
    context, new_id, Conversation, ConversationStatus, Ctx, Error, Result,
};
use chrono::Utc;

use crate::branch::require_unarchived_branch;

/// Select a subset of messages into a new conversation.
pub struct CherryPickEngine {
    store: Arc<Store>,
}

#[derive(Debug, Clone)]
pub struct CherryPickRequest {
    pub conversation_id: String,
    /// Picked in input order; the new conversation renumbers from 1.
    pub message_ids: Vec<String>,
    pub new_title: Option<String>,
    pub branch: String,
    /// Target branch for the new conversation; defaults to `branch`.
    pub target_branch: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CherryPickReport {
    pub conversation: Conversation,
    pub picked: Vec<String>,
    pub missing: Vec<String>,
}

impl CherryPickEngine {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub async fn cherry_pick(
        &self,
        ctx: &Ctx,
        request: CherryPickRequest,
    ) -> Result<CherryPickReport> {
        let ctx = ctx.or_timeout(context::WRITE_DEADLINE);
        ctx.check()?;
        if request.message_ids.is_empty() {
            return Err(Error::invalid_argument(
                "cherry_pick requires at least one message id",
            ));
        }

        self.store.with_tx(|tx| {
            let source =
                queries::conversations::get(tx, &request.conversation_id, &request.branch)?
                    .ok_or_else(|| {
                        Error::not_found(format!(
                            "conversation '{}' not on branch '{}'",
                            request.conversation_id, request.branch
                        ))
                    })?;

            let target_branch = request
                .target_branch
                .clone()
                .unwrap_or_else(|| request.branch.clone());
            require_unarchived_branch(tx, &target_branch)?;

            let mut picked = Vec::new();
            let mut missing = Vec::new();
            let mut selected = Vec::new();
            for id in &request.message_ids {
                match queries::messages::get(tx, id, &request.branch)? {
                    Some(message) if message.conversation_id == source.id => {
                        picked.push(id.clone());
                        selected.push(message);
                    }
                    _ => missing.push(id.clone()),
                }
            }
            if selected.is_empty() {
                return Err(Error::not_found(
                    "none of the requested messages exist in the conversation",
                ));
            }

            let conversation = Conversation {
                id: new_id(),
                session_id: source.session_id.clone(),
                agent_id: source.agent_id.clone(),
                task_id: source.task_id.clone(),
                branch_name: target_branch.clone(),
                title: request
                    .new_title
                    .clone()
                    .or_else(|| source.title.as_ref().map(|t| format!("{t} (cherry-pick)"))),
                parent_conversation_id: Some(source.id.clone()),
                fork_point_message_id: None,
                status: ConversationStatus::Forked,
                message_count: selected.len() as i64,
                total_tokens: selected.iter().map(|m| m.token_count).sum(),
                model: source.model.clone(),
                metadata: serde_json::json!({ "cherry_picked_from": source.id }),
                created_at: Utc::now(),
            };
            queries::conversations::insert(tx, &conversation)?;

            for (index, message) in selected.iter().enumerate() {
                let mut copy = message.clone();
                copy.id = new_id();
                copy.conversation_id = conversation.id.clone();
                copy.branch_name = target_branch.clone();
                copy.sequence_num = index as i64 + 1;
                queries::messages::insert(tx, &copy)?;
            }

            Ok(CherryPickReport {
                conversation,
                picked,
                missing,
            })
        })
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
    use crate::embedding::EmbeddingGate;
    use crate::locks::EngineLocks;

    async fn setup() -> (Arc<Store>, ConversationEngine, CherryPickEngine) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let locks = Arc::new(EngineLocks::new());
        BranchManager::new(store.clone(), locks.clone())
            .ensure_main(&Ctx::background())
            .await
            .unwrap();
        let conversations =
            ConversationEngine::new(store.clone(), Arc::new(EmbeddingGate::new(None)), locks);
        let cherry = CherryPickEngine::new(store.clone());
        (store, conversations, cherry)
    }

    #[tokio::test]
    async fn picks_renumber_in_input_order() {
        let (store, conversations, cherry) = setup().await;
        let ctx = Ctx::background();
        let conv = conversations
            .create(&ctx, CreateConversationRequest::new("main"))
            .await
            .unwrap();

        let mut ids = Vec::new();
        for i in 1..=4 {
            let m = conversations
                .append_message(
                    &ctx,
                    AppendMessageRequest::new(&conv.id, Role::User, "main")
                        .with_content(format!("m{i}")),
                )
                .await
                .unwrap();
            ids.push(m.id);
        }

        // Pick 4 then 2: output order follows input order.
        let report = cherry
            .cherry_pick(
                &ctx,
                CherryPickRequest {
                    conversation_id: conv.id.clone(),
                    message_ids: vec![ids[3].clone(), ids[1].clone(), "ghost".to_string()],
                    new_title: Some("highlights".to_string()),
                    branch: "main".to_string(),
                    target_branch: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(report.picked.len(), 2);
        assert_eq!(report.missing, vec!["ghost".to_string()]);

        let picked = store
            .with_conn(|conn| queries::messages::list(conn, &report.conversation.id, "main"))
            .unwrap();
        assert_eq!(
            picked.iter().map(|m| m.sequence_num).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(picked[0].content.as_deref(), Some("m4"));
        assert_eq!(picked[1].content.as_deref(), Some("m2"));
        assert_eq!(
            report.conversation.metadata["cherry_picked_from"],
            serde_json::Value::String(conv.id.clone())
        );
    }
}
