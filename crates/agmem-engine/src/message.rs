use std::sync::Arc;

use agmem_store::{queries, Store};
use agmem_types::{Ctx, Error, Message, Result};

/// Read-side access to persisted messages.
///
/// Writes go through [`crate::ConversationEngine::append_message`], which
/// owns sequencing; retrieval and ranking (full-text/vector over content)
/// run through [`crate::SearchEngine`] with the messages scope.
pub struct MessageEngine {
    store: Arc<Store>,
}

impl MessageEngine {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub async fn get(&self, ctx: &Ctx, id: &str, branch: &str) -> Result<Message> {
        ctx.check()?;
        self.store.with_conn(|conn| {
            queries::messages::get(conn, id, branch)?
                .ok_or_else(|| Error::not_found(format!("message '{id}' not on branch '{branch}'")))
        })
    }

    /// All messages of a conversation in sequence order.
    pub async fn list(
        &self,
        ctx: &Ctx,
        conversation_id: &str,
        branch: &str,
    ) -> Result<Vec<Message>> {
        ctx.check()?;
        self.store
            .with_conn(|conn| queries::messages::list(conn, conversation_id, branch))
    }
}
