use std::path::Path;
use std::sync::Arc;

use agmem_engine::{
    BranchManager, CherryPickEngine, ConsolidationEngine, ConversationEngine, EmbeddingGate,
    EngineLocks, FactEngine, MergeEngine, MessageEngine, ObservationEngine, RelationEngine,
    ReplayEngine, ScoringEngine, SearchEngine, SemanticDiffEngine, SessionEngine,
    SnapshotManager, TaskEngine, TemplateEngine,
};
use agmem_providers::{Embedder, FactExtractor, HeuristicExtractor, Judge};
use agmem_store::Store;
use agmem_types::Result;

/// Configure providers before opening a store.
#[derive(Default)]
pub struct ClientBuilder {
    embedder: Option<Arc<dyn Embedder>>,
    judge: Option<Arc<dyn Judge>>,
    extractor: Option<Arc<dyn FactExtractor>>,
}

impl ClientBuilder {
    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn judge(mut self, judge: Arc<dyn Judge>) -> Self {
        self.judge = Some(judge);
        self
    }

    pub fn extractor(mut self, extractor: Arc<dyn FactExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn open(self, path: impl AsRef<Path>) -> Result<Client> {
        Client::wire(Store::open(path.as_ref())?, self)
    }

    pub fn open_in_memory(self) -> Result<Client> {
        Client::wire(Store::open_in_memory()?, self)
    }
}

struct Engines {
    branches: Arc<BranchManager>,
    snapshots: SnapshotManager,
    facts: Arc<FactEngine>,
    observations: ObservationEngine,
    relations: RelationEngine,
    conversations: ConversationEngine,
    messages: MessageEngine,
    search: SearchEngine,
    merges: MergeEngine,
    cherry_pick: CherryPickEngine,
    replays: ReplayEngine,
    semantic_diff: SemanticDiffEngine,
    tasks: TaskEngine,
    consolidation: ConsolidationEngine,
    templates: TemplateEngine,
    scoring: ScoringEngine,
    sessions: SessionEngine,
}

/// Handle to one agmem store with every engine wired.
///
/// Cheap to clone; all engines share the underlying store and lock tables.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Engines>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::builder().open(path)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::builder().open_in_memory()
    }

    fn wire(store: Store, builder: ClientBuilder) -> Result<Self> {
        let store = Arc::new(store);
        let locks = Arc::new(EngineLocks::new());
        let embeddings = Arc::new(EmbeddingGate::new(builder.embedder));
        let extractor = builder
            .extractor
            .unwrap_or_else(|| Arc::new(HeuristicExtractor));

        let branches = Arc::new(BranchManager::new(store.clone(), locks.clone()));
        let facts = Arc::new(FactEngine::new(
            store.clone(),
            embeddings.clone(),
            locks.clone(),
        ));

        let engines = Engines {
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
            merges: MergeEngine::new(store.clone(), locks.clone(), builder.judge.clone()),
            cherry_pick: CherryPickEngine::new(store.clone()),
            replays: ReplayEngine::new(store.clone(), embeddings.clone()),
            semantic_diff: SemanticDiffEngine::new(store.clone(), embeddings),
            tasks: TaskEngine::new(store.clone(), branches.clone()),
            consolidation: ConsolidationEngine::new(store.clone(), facts.clone(), extractor),
            templates: TemplateEngine::new(store.clone(), branches.clone()),
            sessions: SessionEngine::new(store.clone()),
            scoring: ScoringEngine::new(store, builder.judge),
            facts,
            branches,
        };

        Ok(Self {
            inner: Arc::new(engines),
        })
    }

    pub fn branches(&self) -> &BranchManager {
        &self.inner.branches
    }

    pub fn snapshots(&self) -> &SnapshotManager {
        &self.inner.snapshots
    }

    pub fn facts(&self) -> &FactEngine {
        &self.inner.facts
    }

    pub fn observations(&self) -> &ObservationEngine {
        &self.inner.observations
    }

    pub fn relations(&self) -> &RelationEngine {
        &self.inner.relations
    }

    pub fn conversations(&self) -> &ConversationEngine {
        &self.inner.conversations
    }

    pub fn messages(&self) -> &MessageEngine {
        &self.inner.messages
    }

    pub fn search(&self) -> &SearchEngine {
        &self.inner.search
    }

    pub fn merges(&self) -> &MergeEngine {
        &self.inner.merges
    }

    pub fn cherry_pick(&self) -> &CherryPickEngine {
        &self.inner.cherry_pick
    }

    pub fn replays(&self) -> &ReplayEngine {
        &self.inner.replays
    }

    pub fn semantic_diff(&self) -> &SemanticDiffEngine {
        &self.inner.semantic_diff
    }

    pub fn tasks(&self) -> &TaskEngine {
        &self.inner.tasks
    }

    pub fn consolidation(&self) -> &ConsolidationEngine {
        &self.inner.consolidation
    }

    pub fn templates(&self) -> &TemplateEngine {
        &self.inner.templates
    }

    pub fn scoring(&self) -> &ScoringEngine {
        &self.inner.scoring
    }

    pub fn sessions(&self) -> &SessionEngine {
        &self.inner.sessions
    }
}
