use std::sync::Arc;

use agmem_engine::{
    BranchManager, CherryPickEngine, ConsolidationEngine, ConversationEngine, EmbeddingGate,
    EngineLocks, FactEngine, MergeEngine, MessageEngine, ObservationEngine, RelationEngine,
    ReplayEngine, ScoringEngine, SearchEngine, SemanticDiffEngine, SessionEngine,
    SnapshotManager, TaskEngine, TemplateEngine,
};
use agmem_providers::{Embedder, FactExtractor, HeuristicExtractor, Judge};
use agmem_store::Store;
use agmem_types::Ctx;

/// A fully wired engine set over an in-memory store.
///
/// `main` exists already; providers default to none (embedder), none
/// (judge), and the heuristic extractor.
pub struct TestWorld {
    pub store: Arc<Store>,
    pub branches: Arc<BranchManager>,
    pub snapshots: SnapshotManager,
    pub facts: Arc<FactEngine>,
    pub observations: ObservationEngine,
    pub relations: RelationEngine,
    pub conversations: ConversationEngine,
    pub messages: MessageEngine,
    pub search: SearchEngine,
    pub merges: MergeEngine,
    pub cherry_pick: CherryPickEngine,
    pub replays: ReplayEngine,
    pub semantic_diff: SemanticDiffEngine,
    pub tasks: TaskEngine,
    pub consolidation: ConsolidationEngine,
    pub templates: TemplateEngine,
    pub scoring: ScoringEngine,
    pub sessions: SessionEngine,
}

impl TestWorld {
    pub async fn new() -> Self {
        Self::with_providers(None, None, Arc::new(HeuristicExtractor)).await
    }

    pub async fn with_embedder(embedder: Arc<dyn Embedder>) -> Self {
        Self::with_providers(Some(embedder), None, Arc::new(HeuristicExtractor)).await
    }

    pub async fn with_providers(
        embedder: Option<Arc<dyn Embedder>>,
        judge: Option<Arc<dyn Judge>>,
        extractor: Arc<dyn FactExtractor>,
    ) -> Self {
        let store = Arc::new(Store::open_in_memory().expect("in-memory store"));
        let locks = Arc::new(EngineLocks::new());
        let embeddings = Arc::new(EmbeddingGate::new(embedder));

        let branches = Arc::new(BranchManager::new(store.clone(), locks.clone()));
        branches
            .ensure_main(&Ctx::background())
            .await
            .expect("main branch");

        let facts = Arc::new(FactEngine::new(
            store.clone(),
            embeddings.clone(),
            locks.clone(),
        ));

        Self {
            snapshots: SnapshotManager::new(store.clone(), locks.clone()),
            observations: ObservationEngine::new(store.clone(), embeddings.clone()),
            relations: RelationEngine::new(store.clone()),
            conversations: ConversationEngine::new(
                store.clone(),
                embeddings.clone(),
                locks.clone(),
            ),
            messages: MessageEngine::new(store.clone()),
            search: SearchEngine::new(store.clone(), embeddings.clone()),
            merges: MergeEngine::new(store.clone(), locks.clone(), judge.clone()),
            cherry_pick: CherryPickEngine::new(store.clone()),
            replays: ReplayEngine::new(store.clone(), embeddings.clone()),
            semantic_diff: SemanticDiffEngine::new(store.clone(), embeddings.clone()),
            tasks: TaskEngine::new(store.clone(), branches.clone()),
            consolidation: ConsolidationEngine::new(store.clone(), facts.clone(), extractor),
            templates: TemplateEngine::new(store.clone(), branches.clone()),
            scoring: ScoringEngine::new(store.clone(), judge),
            sessions: SessionEngine::new(store.clone()),
            facts,
            branches,
            store,
        }
    }
}
