use std::sync::Arc;

use agmem_store::{queries, search as store_search, Store};
use agmem_types::{
    context, new_id, Ctx, Error, Fact, FactStatus, Result, SearchScope,
};
use chrono::Utc;

use crate::branch::require_unarchived_branch;
use crate::embedding::EmbeddingGate;
use crate::locks::EngineLocks;

/// Cosine similarity at or above which a new fact supersedes an existing one.
const DEDUPE_THRESHOLD: f64 = 0.92;
/// Candidates considered for near-duplicate detection.
const DEDUPE_CANDIDATES: usize = 3;

pub struct FactEngine {
    store: Arc<Store>,
    embeddings: Arc<EmbeddingGate>,
    locks: Arc<EngineLocks>,
}

#[derive(Debug, Clone)]
pub struct WriteFactRequest {
    pub fact_text: String,
    pub category: Option<String>,
    pub confidence: f64,
    pub source_type: Option<String>,
    pub source_id: Option<String>,
    pub session_id: Option<String>,
    pub agent_id: Option<String>,
    pub task_id: Option<String>,
    pub branch: String,
    pub metadata: serde_json::Value,
}

impl WriteFactRequest {
    pub fn new(fact_text: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            fact_text: fact_text.into(),
            category: None,
            confidence: 1.0,
            source_type: None,
            source_id: None,
            session_id: None,
            agent_id: None,
            task_id: None,
            branch: branch.into(),
            metadata: serde_json::json!({}),
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// What `write` did with the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactWriteOutcome {
    /// Inserted as a fresh fact.
    Created,
    /// Superseded a near-duplicate; the new fact heads the chain.
    Updated,
    /// Textually identical to an existing active fact; nothing written.
    Deduplicated,
}

#[derive(Debug, Clone)]
pub struct FactWriteResult {
    pub fact: Fact,
    pub outcome: FactWriteOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct FactListRequest {
    pub category: Option<String>,
    pub session_id: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl FactEngine {
    pub fn new(store: Arc<Store>, embeddings: Arc<EmbeddingGate>, locks: Arc<EngineLocks>) -> Self {
        Self {
            store,
            embeddings,
            locks,
        }
    }

    /// Write a fact: embed, then either insert fresh or supersede the
    /// nearest active near-duplicate on the branch.
    pub async fn write(&self, ctx: &Ctx, request: WriteFactRequest) -> Result<FactWriteResult> {
        let ctx = ctx.or_timeout(context::WRITE_DEADLINE);
        ctx.check()?;
        if !(0.0..=1.0).contains(&request.confidence) {
            return Err(Error::invalid_argument(format!(
                "confidence {} outside [0, 1]",
                request.confidence
            )));
        }
        if request.fact_text.trim().is_empty() {
            return Err(Error::invalid_argument("fact_text must not be empty"));
        }

        // Embedding happens outside the branch lock; it is the slow part.
        let embedding = self.embeddings.embed(&ctx, &request.fact_text).await?;

        let branch_lock = self.locks.branches.get(&request.branch);
        let _guard = branch_lock.lock().await;
        ctx.check()?;

        let branch = request.branch.clone();
        self.store.with_tx(|tx| {
            require_unarchived_branch(tx, &branch)?;

            let mut metadata = request.metadata.clone();
            if embedding.is_none() {
                metadata["embedding_pending"] = serde_json::Value::Bool(true);
            }

            let duplicate = match &embedding {
                Some(query_vec) => nearest_active_duplicate(tx, &branch, query_vec)?,
                None => None,
            };

            match duplicate {
                Some((existing, _similarity)) if existing.fact_text == request.fact_text => {
                    Ok(FactWriteResult {
                        fact: existing,
                        outcome: FactWriteOutcome::Deduplicated,
                    })
                }
                Some((existing, _similarity)) => {
                    // Supersede: the old fact keeps its row, the new fact
                    // heads the chain with the higher confidence.
                    queries::facts::ancestor_chain(tx, &branch, &existing.id)?;
                    let fact = Fact {
                        id: new_id(),
                        fact_text: request.fact_text.clone(),
                        embedding: embedding.clone(),
                        category: request.category.clone().or(existing.category.clone()),
                        confidence: request.confidence.max(existing.confidence),
                        status: FactStatus::Active,
                        source_type: request.source_type.clone(),
                        source_id: request.source_id.clone(),
                        parent_id: Some(existing.id.clone()),
                        session_id: request.session_id.clone(),
                        agent_id: request.agent_id.clone(),
                        task_id: request.task_id.clone(),
                        branch_name: branch.clone(),
                        metadata,
                        created_at: Utc::now(),
                    };
                    queries::facts::set_status(tx, &existing.id, &branch, FactStatus::Superseded)?;
                    queries::facts::insert(tx, &fact)?;
                    Ok(FactWriteResult {
                        fact,
                        outcome: FactWriteOutcome::Updated,
                    })
                }
                None => {
                    let fact = Fact {
                        id: new_id(),
                        fact_text: request.fact_text.clone(),
                        embedding: embedding.clone(),
                        category: request.category.clone(),
                        confidence: request.confidence,
                        status: FactStatus::Active,
                        source_type: request.source_type.clone(),
                        source_id: request.source_id.clone(),
                        parent_id: None,
                        session_id: request.session_id.clone(),
                        agent_id: request.agent_id.clone(),
                        task_id: request.task_id.clone(),
                        branch_name: branch.clone(),
                        metadata,
                        created_at: Utc::now(),
                    };
                    queries::facts::insert(tx, &fact)?;
                    Ok(FactWriteResult {
                        fact,
                        outcome: FactWriteOutcome::Created,
                    })
                }
            }
        })
    }

    pub async fn get(&self, ctx: &Ctx, id: &str, branch: &str) -> Result<Fact> {
        ctx.check()?;
        self.store.with_conn(|conn| {
            queries::facts::get(conn, id, branch)?
                .ok_or_else(|| Error::not_found(format!("fact '{id}' not on branch '{branch}'")))
        })
    }

    /// Terminal and idempotent.
    pub async fn invalidate(
        &self,
        ctx: &Ctx,
        id: &str,
        branch: &str,
        reason: Option<&str>,
    ) -> Result<Fact> {
        let ctx = ctx.or_timeout(context::WRITE_DEADLINE);
        ctx.check()?;

        let branch_lock = self.locks.branches.get(branch);
        let _guard = branch_lock.lock().await;

        self.store.with_tx(|tx| {
            let mut fact = queries::facts::get(tx, id, branch)?
                .ok_or_else(|| Error::not_found(format!("fact '{id}' not on branch '{branch}'")))?;
            if fact.status == FactStatus::Invalidated {
                return Ok(fact);
            }
            queries::facts::set_status(tx, id, branch, FactStatus::Invalidated)?;
            fact.status = FactStatus::Invalidated;
            if let Some(reason) = reason {
                fact.metadata["invalidation_reason"] =
                    serde_json::Value::String(reason.to_string());
                queries::facts::set_metadata(tx, id, branch, &fact.metadata)?;
            }
            Ok(fact)
        })
    }

    /// Active facts on the branch, newest first.
    pub async fn list(
        &self,
        ctx: &Ctx,
        branch: &str,
        request: FactListRequest,
    ) -> Result<Vec<Fact>> {
        ctx.check()?;
        let filter = queries::facts::FactFilter {
            status: Some(FactStatus::Active),
            category: request.category,
            session_id: request.session_id,
            limit: request.limit.or(Some(50)),
            offset: request.offset,
        };
        self.store
            .with_conn(|conn| queries::facts::list(conn, branch, &filter))
    }
}

/// Best active near-duplicate above the supersession threshold.
fn nearest_active_duplicate(
    conn: &rusqlite::Connection,
    branch: &str,
    query_vec: &[f32],
) -> Result<Option<(Fact, f64)>> {
    let hits = store_search::vector_search(
        conn,
        SearchScope::Facts,
        branch,
        query_vec,
        DEDUPE_CANDIDATES,
    )?;

    for hit in hits {
        if hit.cosine < DEDUPE_THRESHOLD {
            break;
        }
        if let Some(fact) = queries::facts::get(conn, &hit.id, branch)? {
            if fact.is_active() {
                return Ok(Some((fact, hit.cosine)));
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agmem_providers::HashEmbedder;
    use crate::branch::BranchManager;

    async fn engine() -> FactEngine {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let locks = Arc::new(EngineLocks::new());
        BranchManager::new(store.clone(), locks.clone())
            .ensure_main(&Ctx::background())
            .await
            .unwrap();
        FactEngine::new(
            store,
            Arc::new(EmbeddingGate::new(Some(Arc::new(HashEmbedder::default())))),
            locks,
        )
    }

    #[tokio::test]
    async fn near_duplicate_supersedes() {
        let facts = engine().await;
        let ctx = Ctx::background();

        let first = facts
            .write(
                &ctx,
                WriteFactRequest::new("OAuth clients use a stored refresh token", "main"),
            )
            .await
            .unwrap();
        assert_eq!(first.outcome, FactWriteOutcome::Created);

        let second = facts
            .write(
                &ctx,
                WriteFactRequest::new("OAuth clients use a stored refresh token rotation", "main")
                    .with_confidence(0.8),
            )
            .await
            .unwrap();
        assert_eq!(second.outcome, FactWriteOutcome::Updated);
        assert_eq!(second.fact.parent_id.as_deref(), Some(first.fact.id.as_str()));
        // max(confidence) over the chain
        assert_eq!(second.fact.confidence, 1.0);

        let old = facts.get(&ctx, &first.fact.id, "main").await.unwrap();
        assert_eq!(old.status, FactStatus::Superseded);
    }

    #[tokio::test]
    async fn identical_text_is_deduplicated() {
        let facts = engine().await;
        let ctx = Ctx::background();

        let first = facts
            .write(&ctx, WriteFactRequest::new("the rate limit is 60/min", "main"))
            .await
            .unwrap();
        let second = facts
            .write(&ctx, WriteFactRequest::new("the rate limit is 60/min", "main"))
            .await
            .unwrap();
        assert_eq!(second.outcome, FactWriteOutcome::Deduplicated);
        assert_eq!(second.fact.id, first.fact.id);
    }

    #[tokio::test]
    async fn unrelated_facts_coexist() {
        let facts = engine().await;
        let ctx = Ctx::background();

        facts
            .write(&ctx, WriteFactRequest::new("the backend is written in Rust", "main"))
            .await
            .unwrap();
        let other = facts
            .write(&ctx, WriteFactRequest::new("deploys run every Friday", "main"))
            .await
            .unwrap();
        assert_eq!(other.outcome, FactWriteOutcome::Created);
        assert!(other.fact.parent_id.is_none());

        let listed = facts.list(&ctx, "main", FactListRequest::default()).await.unwrap();
        assert_eq!(listed.len(), 2);
    }

    #[tokio::test]
    async fn invalidate_is_idempotent_and_terminal() {
        let facts = engine().await;
        let ctx = Ctx::background();

        let written = facts
            .write(&ctx, WriteFactRequest::new("to be retracted", "main"))
            .await
            .unwrap();
        let once = facts
            .invalidate(&ctx, &written.fact.id, "main", Some("wrong"))
            .await
            .unwrap();
        assert_eq!(once.status, FactStatus::Invalidated);

        let twice = facts
            .invalidate(&ctx, &written.fact.id, "main", None)
            .await
            .unwrap();
        assert_eq!(twice.status, FactStatus::Invalidated);
    }

    #[tokio::test]
    async fn missing_embedder_flags_pending() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let locks = Arc::new(EngineLocks::new());
        BranchManager::new(store.clone(), locks.clone())
            .ensure_main(&Ctx::background())
            .await
            .unwrap();
        let facts = FactEngine::new(store, Arc::new(EmbeddingGate::new(None)), locks);

        let written = facts
            .write(&Ctx::background(), WriteFactRequest::new("no embedder", "main"))
            .await
            .unwrap();
        assert!(written.fact.embedding.is_none());
        assert_eq!(
            written.fact.metadata["embedding_pending"],
            serde_json::Value::Bool(true)
        );
    }

    #[tokio::test]
    async fn confidence_out_of_range_is_rejected() {
        let facts = engine().await;
        let err = facts
            .write(
                &Ctx::background(),
                WriteFactRequest::new("x", "main").with_confidence(1.5),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), agmem_types::ErrorKind::InvalidArgument);
    }
}
