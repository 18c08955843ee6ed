use std::collections::BTreeMap;
use std::sync::Arc;

use agmem_providers::FactExtractor;
use agmem_store::{queries, Store};
use agmem_types::{context, new_id, Ctx, Observation, Result};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::fact::{FactEngine, FactWriteOutcome, WriteFactRequest};

/// Default lookback window, in hours.
const DEFAULT_WINDOW_HOURS: i64 = 24;
/// Default cap on observations scanned per run.
const DEFAULT_SCAN_LIMIT: usize = 500;

/// Fold raw observations into deduplicated facts.
pub struct ConsolidationEngine {
    store: Arc<Store>,
    facts: Arc<FactEngine>,
    extractor: Arc<dyn FactExtractor>,
}

#[derive(Debug, Clone)]
pub struct ConsolidationRequest {
    pub branch: String,
    pub window_hours: Option<i64>,
    pub limit: Option<usize>,
}

impl ConsolidationRequest {
    pub fn new(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            window_hours: None,
            limit: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationReport {
    pub branch: String,
    pub observations_processed: usize,
    pub facts_created: usize,
    pub facts_updated: usize,
    pub facts_deduplicated: usize,
    pub yield_rate: f64,
}

impl ConsolidationEngine {
    pub fn new(
        store: Arc<Store>,
        facts: Arc<FactEngine>,
        extractor: Arc<dyn FactExtractor>,
    ) -> Self {
        Self {
            store,
            facts,
            extractor,
        }
    }

    pub async fn consolidate(
        &self,
        ctx: &Ctx,
        request: ConsolidationRequest,
    ) -> Result<ConsolidationReport> {
        let ctx = ctx.or_timeout(context::CONSOLIDATION_DEADLINE);
        ctx.check()?;

        let window = Duration::hours(request.window_hours.unwrap_or(DEFAULT_WINDOW_HOURS));
        let since = Utc::now() - window;
        let limit = request.limit.unwrap_or(DEFAULT_SCAN_LIMIT);

        let observations = self.store.with_conn(|conn| {
            queries::observations::list_recent(conn, &request.branch, Some(since), limit)
        })?;
        let observations_processed = observations.len();

        // Group by session so the extractor sees one agent's trail at a time.
        let mut by_session: BTreeMap<String, Vec<Observation>> = BTreeMap::new();
        for observation in observations {
            by_session
                .entry(
                    observation
                        .session_id
                        .clone()
                        .unwrap_or_else(|| "(none)".to_string()),
                )
                .or_default()
                .push(observation);
        }

        let mut created = 0usize;
        let mut updated = 0usize;
        let mut deduplicated = 0usize;

        for (session, group) in &by_session {
            ctx.check()?;
            let candidates = self.extractor.extract(group).await?;
            for candidate in candidates {
                ctx.check()?;
                let mut write = WriteFactRequest::new(candidate.text, request.branch.as_str())
                    .with_confidence(candidate.confidence);
                write.category = candidate.category;
                write.source_type = Some("observation".to_string());
                write.source_id = Some(candidate.source_id);
                if session != "(none)" {
                    write.session_id = Some(session.clone());
                }

                match self.facts.write(&ctx, write).await?.outcome {
                    FactWriteOutcome::Created => created += 1,
                    FactWriteOutcome::Updated => updated += 1,
                    FactWriteOutcome::Deduplicated => deduplicated += 1,
                }
            }
        }

        let record = queries::consolidations::ConsolidationRecord {
            id: new_id(),
            branch_name: request.branch.clone(),
            observations_processed: observations_processed as i64,
            facts_created: created as i64,
            facts_updated: updated as i64,
            facts_deduplicated: deduplicated as i64,
            created_at: Utc::now(),
        };
        self.store
            .with_conn(|conn| queries::consolidations::insert(conn, &record))?;

        let yield_rate = if observations_processed == 0 {
            0.0
        } else {
            created as f64 / observations_processed as f64
        };

        Ok(ConsolidationReport {
            branch: request.branch,
            observations_processed,
            facts_created: created,
            facts_updated: updated,
            facts_deduplicated: deduplicated,
            yield_rate,
        })
    }

    pub async fn history(
        &self,
        ctx: &Ctx,
        branch: Option<&str>,
    ) -> Result<Vec<queries::consolidations::ConsolidationRecord>> {
        ctx.check()?;
        self.store
            .with_conn(|conn| queries::consolidations::list(conn, branch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agmem_providers::{HashEmbedder, HeuristicExtractor};
    use agmem_types::ObservationType;
    use crate::branch::BranchManager;
    use crate::embedding::EmbeddingGate;
    use crate::locks::EngineLocks;
    use crate::observation::{ObservationEngine, WriteObservationRequest};

    async fn setup() -> (ObservationEngine, ConsolidationEngine) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let locks = Arc::new(EngineLocks::new());
        BranchManager::new(store.clone(), locks.clone())
            .ensure_main(&Ctx::background())
            .await
            .unwrap();
        let gate = Arc::new(EmbeddingGate::new(Some(Arc::new(HashEmbedder::default()))));
        let observations = ObservationEngine::new(store.clone(), gate.clone());
        let facts = Arc::new(FactEngine::new(store.clone(), gate, locks));
        let consolidation =
            ConsolidationEngine::new(store, facts, Arc::new(HeuristicExtractor));
        (observations, consolidation)
    }

    #[tokio::test]
    async fn discoveries_become_facts_once() {
        let (observations, consolidation) = setup().await;
        let ctx = Ctx::background();

        for _ in 0..2 {
            observations
                .write(
                    &ctx,
                    WriteObservationRequest::new(
                        ObservationType::Discovery,
                        "the staging cluster runs four replica pods",
                        "main",
                    )
                    .with_session("s1"),
                )
                .await
                .unwrap();
        }
        observations
            .write(
                &ctx,
                WriteObservationRequest::new(ObservationType::ToolUse, "ran kubectl", "main")
                    .with_session("s1"),
            )
            .await
            .unwrap();

        let report = consolidation
            .consolidate(&ctx, ConsolidationRequest::new("main"))
            .await
            .unwrap();
        assert_eq!(report.observations_processed, 3);
        // The in-window duplicate collapses inside the extractor.
        assert_eq!(report.facts_created, 1);
        assert_eq!(report.facts_deduplicated, 0);
        assert!(report.yield_rate > 0.3 && report.yield_rate < 0.4);

        // A second run re-extracts the same candidate; the fact store
        // deduplicates it.
        let second = consolidation
            .consolidate(&ctx, ConsolidationRequest::new("main"))
            .await
            .unwrap();
        assert_eq!(second.facts_created, 0);
        assert_eq!(second.facts_deduplicated, 1);

        let history = consolidation.history(&ctx, Some("main")).await.unwrap();
        assert_eq!(history.len(), 2);
    }
}
