use std::sync::Arc;

use agmem_store::{queries, Store};
use agmem_types::{
    context, new_id, truncate, Ctx, Error, Observation, ObservationType, Result,
};
use chrono::{DateTime, Utc};

use crate::branch::require_unarchived_branch;
use crate::embedding::EmbeddingGate;

/// Bound on stored raw tool I/O, per side.
const RAW_IO_LIMIT: usize = 2048;

/// Append-only observation log.
pub struct ObservationEngine {
    store: Arc<Store>,
    embeddings: Arc<EmbeddingGate>,
}

#[derive(Debug, Clone)]
pub struct WriteObservationRequest {
    pub observation_type: ObservationType,
    pub summary: String,
    pub tool_name: Option<String>,
    pub raw_input: Option<String>,
    pub raw_output: Option<String>,
    pub session_id: Option<String>,
    pub branch: String,
    pub metadata: serde_json::Value,
}

impl WriteObservationRequest {
    pub fn new(
        observation_type: ObservationType,
        summary: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            observation_type,
            summary: summary.into(),
            tool_name: None,
            raw_input: None,
            raw_output: None,
            session_id: None,
            branch: branch.into(),
            metadata: serde_json::json!({}),
        }
    }

    pub fn with_tool(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }

    pub fn with_raw_io(
        mut self,
        input: Option<impl Into<String>>,
        output: Option<impl Into<String>>,
    ) -> Self {
        self.raw_input = input.map(Into::into);
        self.raw_output = output.map(Into::into);
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

impl ObservationEngine {
    pub fn new(store: Arc<Store>, embeddings: Arc<EmbeddingGate>) -> Self {
        Self { store, embeddings }
    }

    pub async fn write(
        &self,
        ctx: &Ctx,
        request: WriteObservationRequest,
    ) -> Result<Observation> {
        let ctx = ctx.or_timeout(context::WRITE_DEADLINE);
        ctx.check()?;
        if request.summary.trim().is_empty() {
            return Err(Error::invalid_argument("summary must not be empty"));
        }

        // Best-effort embedding of the summary.
        let embedding = self.embeddings.embed(&ctx, &request.summary).await?;

        let observation = Observation {
            id: new_id(),
            observation_type: request.observation_type,
            tool_name: request.tool_name,
            summary: request.summary,
            embedding,
            raw_input: request.raw_input.map(|s| truncate(&s, RAW_IO_LIMIT)),
            raw_output: request.raw_output.map(|s| truncate(&s, RAW_IO_LIMIT)),
            session_id: request.session_id,
            branch_name: request.branch,
            metadata: request.metadata,
            created_at: Utc::now(),
        };

        self.store.with_conn(|conn| {
            require_unarchived_branch(conn, &observation.branch_name)?;
            queries::observations::insert(conn, &observation)?;
            Ok(())
        })?;

        Ok(observation)
    }

    pub async fn get(&self, ctx: &Ctx, id: &str, branch: &str) -> Result<Observation> {
        ctx.check()?;
        self.store.with_conn(|conn| {
            queries::observations::get(conn, id, branch)?.ok_or_else(|| {
                Error::not_found(format!("observation '{id}' not on branch '{branch}'"))
            })
        })
    }

    pub async fn list_recent(
        &self,
        ctx: &Ctx,
        branch: &str,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Observation>> {
        ctx.check()?;
        self.store
            .with_conn(|conn| queries::observations::list_recent(conn, branch, since, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::branch::BranchManager;
    use crate::locks::EngineLocks;

    async fn engine() -> ObservationEngine {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let locks = Arc::new(EngineLocks::new());
        BranchManager::new(store.clone(), locks)
            .ensure_main(&Ctx::background())
            .await
            .unwrap();
        ObservationEngine::new(store, Arc::new(EmbeddingGate::new(None)))
    }

    #[tokio::test]
    async fn raw_io_is_truncated() {
        let observations = engine().await;
        let big = "x".repeat(10_000);
        let written = observations
            .write(
                &Ctx::background(),
                WriteObservationRequest::new(ObservationType::ToolUse, "ran a big tool", "main")
                    .with_tool("bash")
                    .with_raw_io(Some(big.clone()), Some(big)),
            )
            .await
            .unwrap();

        let input = written.raw_input.unwrap();
        assert!(input.len() < 2100);
        assert!(input.ends_with("...(truncated)"));
    }

    #[tokio::test]
    async fn list_recent_orders_newest_first() {
        let observations = engine().await;
        let ctx = Ctx::background();
        for i in 0..3 {
            observations
                .write(
                    &ctx,
                    WriteObservationRequest::new(
                        ObservationType::Discovery,
                        format!("finding {i}"),
                        "main",
                    ),
                )
                .await
                .unwrap();
        }

        let recent = observations.list_recent(&ctx, "main", None, 10).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert!(recent[0].created_at >= recent[2].created_at);
    }
}
