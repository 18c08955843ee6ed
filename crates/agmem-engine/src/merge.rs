use std::collections::HashMap;
use std::sync::Arc;

use agmem_providers::Judge;
use agmem_store::{branching, queries, Store};
use agmem_types::{
    context, new_id, BranchStatus, ConflictPolicy, Ctx, Error, Fact, FactStatus, MergeHistory,
    MergeStrategy, MergeVerdict, MergedBy, Result, MAIN_BRANCH,
};
use chrono::Utc;
use rusqlite::Connection;

use crate::branch::require_branch;
use crate::locks::{merge_pair_key, EngineLocks};

/// Branch diff and merge over the fact store.
///
/// Strategies are explicit; the substrate-level `native` row merge and the
/// engine-level `auto` conflict resolution never combine in one call.
pub struct MergeEngine {
    store: Arc<Store>,
    locks: Arc<EngineLocks>,
    judge: Option<Arc<dyn Judge>>,
}

/// Two active descendants of one supersession ancestor that disagree.
#[derive(Debug, Clone)]
pub struct FactConflict {
    pub ancestor_id: String,
    pub source: Fact,
    pub target: Fact,
}

#[derive(Debug, Clone, Default)]
pub struct BranchDiff {
    /// Active source facts absent from the target.
    pub new: Vec<Fact>,
    /// Target facts whose supersession chain reaches a source row.
    pub modified: Vec<Fact>,
    pub conflicts: Vec<FactConflict>,
}

#[derive(Debug, Clone)]
pub struct MergeRequest {
    pub source: String,
    pub target: String,
    pub strategy: MergeStrategy,
    /// Row-level policy; only valid with `native`.
    pub policy: Option<ConflictPolicy>,
    /// Explicit row ids; only valid with `cherry_pick`.
    pub items: Vec<String>,
    /// Leave the source branch active after merging into main.
    pub keep_source: bool,
}

impl MergeRequest {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        strategy: MergeStrategy,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            strategy,
            policy: None,
            items: Vec::new(),
            keep_source: false,
        }
    }

    pub fn with_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_items(mut self, items: Vec<String>) -> Self {
        self.items = items;
        self
    }

    pub fn keeping_source(mut self) -> Self {
        self.keep_source = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct MergeReport {
    pub history: MergeHistory,
    pub items_merged: Vec<String>,
    pub items_rejected: Vec<String>,
}

impl MergeEngine {
    pub fn new(store: Arc<Store>, locks: Arc<EngineLocks>, judge: Option<Arc<dyn Judge>>) -> Self {
        Self {
            store,
            locks,
            judge,
        }
    }

    /// Fact-level diff between two branches.
    pub async fn diff(&self, ctx: &Ctx, source: &str, target: &str) -> Result<BranchDiff> {
        let ctx = ctx.or_timeout(context::MERGE_DEADLINE);
        ctx.check()?;
        self.store
            .with_conn(|conn| compute_diff(conn, source, target))
    }

    pub async fn merge(&self, ctx: &Ctx, request: MergeRequest) -> Result<MergeReport> {
        let ctx = ctx.or_timeout(context::MERGE_DEADLINE);
        ctx.check()?;
        validate_request(&request)?;

        let pair = self
            .locks
            .merges
            .get(&merge_pair_key(&request.source, &request.target));
        let _guard = pair.lock().await;
        ctx.check()?;

        // Preconditions and diff inside one read; the judge (a suspension
        // point) runs between diff and apply.
        let diff = self.store.with_conn(|conn| {
            let source = require_branch(conn, &request.source)?;
            let target = require_branch(conn, &request.target)?;
            if target.status == BranchStatus::Archived {
                return Err(Error::precondition_failed(format!(
                    "target branch '{}' is archived",
                    request.target
                )));
            }
            if request.target == MAIN_BRANCH && source.status != BranchStatus::Active {
                return Err(Error::precondition_failed(format!(
                    "merging into main requires an active source; '{}' is {}",
                    request.source,
                    source.status.as_str()
                )));
            }
            compute_diff(conn, &request.source, &request.target)
        })?;

        // Resolve conflicts before touching storage.
        let verdicts = match request.strategy {
            MergeStrategy::Auto => self.resolve_conflicts(&ctx, &diff.conflicts).await?,
            _ => HashMap::new(),
        };
        ctx.check()?;

        let request_clone = request.clone();
        let judged = self.judge.is_some();
        let report = self.store.with_tx(move |tx| {
            apply_merge(tx, &request_clone, &diff, &verdicts, judged)
        })?;

        Ok(report)
    }

    pub async fn history(&self, ctx: &Ctx, branch: Option<&str>) -> Result<Vec<MergeHistory>> {
        ctx.check()?;
        self.store.with_conn(|conn| queries::merges::list(conn, branch))
    }

    async fn resolve_conflicts(
        &self,
        ctx: &Ctx,
        conflicts: &[FactConflict],
    ) -> Result<HashMap<String, MergeVerdict>> {
        let Some(judge) = &self.judge else {
            return Ok(HashMap::new());
        };

        let mut verdicts = HashMap::new();
        for conflict in conflicts {
            ctx.check()?;
            match judge
                .compare(
                    &conflict.source.fact_text,
                    &conflict.target.fact_text,
                    "merge conflict: keep the more accurate statement",
                )
                .await
            {
                Ok(verdict) => {
                    verdicts.insert(conflict.source.id.clone(), verdict);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "judge failed; leaving conflict unresolved");
                }
            }
        }
        Ok(verdicts)
    }
}

fn validate_request(request: &MergeRequest) -> Result<()> {
    if request.source == request.target {
        return Err(Error::invalid_argument(
            "source and target branches must differ",
        ));
    }
    if request.policy.is_some() && request.strategy != MergeStrategy::Native {
        return Err(Error::invalid_argument(
            "row-level conflict policies only combine with the native strategy",
        ));
    }
    if !request.items.is_empty() && request.strategy != MergeStrategy::CherryPick {
        return Err(Error::invalid_argument(
            "explicit item lists only combine with the cherry_pick strategy",
        ));
    }
    if request.strategy == MergeStrategy::CherryPick && request.items.is_empty() {
        return Err(Error::invalid_argument(
            "cherry_pick requires at least one item id",
        ));
    }
    Ok(())
}

/// Root of a fact's supersession chain (the fact itself when unchained).
fn chain_root(facts_by_id: &HashMap<String, Fact>, fact: &Fact) -> String {
    let mut current = fact;
    let mut hops = 0;
    while let Some(parent_id) = &current.parent_id {
        match facts_by_id.get(parent_id) {
            Some(parent) if hops < facts_by_id.len() => {
                current = parent;
                hops += 1;
            }
            _ => break,
        }
    }
    current.id.clone()
}

fn compute_diff(conn: &Connection, source: &str, target: &str) -> Result<BranchDiff> {
    require_branch(conn, source)?;
    require_branch(conn, target)?;

    let source_facts = queries::facts::all_for_branch(conn, source)?;
    let target_facts = queries::facts::all_for_branch(conn, target)?;

    let source_by_id: HashMap<String, Fact> =
        source_facts.iter().map(|f| (f.id.clone(), f.clone())).collect();
    let target_by_id: HashMap<String, Fact> =
        target_facts.iter().map(|f| (f.id.clone(), f.clone())).collect();

    // Active heads per supersession root, per branch.
    let mut source_heads: HashMap<String, Fact> = HashMap::new();
    for fact in source_facts.iter().filter(|f| f.is_active()) {
        source_heads.insert(chain_root(&source_by_id, fact), fact.clone());
    }
    let mut target_heads: HashMap<String, Fact> = HashMap::new();
    for fact in target_facts.iter().filter(|f| f.is_active()) {
        target_heads.insert(chain_root(&target_by_id, fact), fact.clone());
    }

    let mut diff = BranchDiff::default();

    for fact in source_facts.iter().filter(|f| f.is_active()) {
        if !target_by_id.contains_key(&fact.id) {
            diff.new.push(fact.clone());
        }
    }
    diff.new.sort_by(|a, b| a.id.cmp(&b.id));

    // Target rows descending from a source row via the supersession chain.
    for fact in target_facts.iter().filter(|f| f.is_active()) {
        let mut cursor = fact.parent_id.clone();
        let mut hops = 0;
        while let Some(parent_id) = cursor {
            if source_by_id.contains_key(&parent_id) && !source_by_id.contains_key(&fact.id) {
                diff.modified.push(fact.clone());
                break;
            }
            hops += 1;
            if hops > target_by_id.len() {
                break;
            }
            cursor = target_by_id.get(&parent_id).and_then(|f| f.parent_id.clone());
        }
    }
    diff.modified.sort_by(|a, b| a.id.cmp(&b.id));

    for (root, source_head) in &source_heads {
        if let Some(target_head) = target_heads.get(root) {
            let differs = source_head.fact_text != target_head.fact_text
                || source_head.confidence != target_head.confidence;
            if source_head.id != target_head.id && differs {
                diff.conflicts.push(FactConflict {
                    ancestor_id: root.clone(),
                    source: source_head.clone(),
                    target: target_head.clone(),
                });
            }
        }
    }
    diff.conflicts.sort_by(|a, b| a.ancestor_id.cmp(&b.ancestor_id));

    // Conflicting heads are not "new" rows to copy blindly.
    let conflicted: Vec<String> = diff.conflicts.iter().map(|c| c.source.id.clone()).collect();
    diff.new.retain(|f| !conflicted.contains(&f.id));

    Ok(diff)
}

fn apply_merge(
    tx: &rusqlite::Transaction<'_>,
    request: &MergeRequest,
    diff: &BranchDiff,
    verdicts: &HashMap<String, MergeVerdict>,
    judged: bool,
) -> Result<MergeReport> {
    let mut merged: Vec<String> = Vec::new();
    let mut rejected: Vec<String> = Vec::new();
    let mut decisions = serde_json::Map::new();
    let mut merged_by = MergedBy::Manual;
    let merge_id = new_id();

    match request.strategy {
        MergeStrategy::Native => {
            let policy = request.policy.unwrap_or(ConflictPolicy::Skip);
            let all_ids: Vec<String> = queries::facts::all_for_branch(tx, &request.source)?
                .into_iter()
                .map(|f| f.id)
                .collect();
            for id in &all_ids {
                let copied = branching::copy_rows(
                    tx,
                    "facts",
                    &request.source,
                    &request.target,
                    std::slice::from_ref(id),
                    policy,
                )?;
                if copied > 0 {
                    merged.push(id.clone());
                    decisions.insert(id.clone(), "copied".into());
                } else {
                    rejected.push(id.clone());
                    decisions.insert(id.clone(), "kept_target".into());
                }
            }
        }
        MergeStrategy::CherryPick => {
            for id in &request.items {
                match queries::facts::get(tx, id, &request.source)? {
                    Some(_) => {
                        branching::copy_rows(
                            tx,
                            "facts",
                            &request.source,
                            &request.target,
                            std::slice::from_ref(id),
                            ConflictPolicy::Accept,
                        )?;
                        merged.push(id.clone());
                        decisions.insert(id.clone(), "copied".into());
                    }
                    None => {
                        rejected.push(id.clone());
                        decisions.insert(id.clone(), "missing_on_source".into());
                    }
                }
            }
        }
        MergeStrategy::Squash => {
            // One marked generation on the target; nothing superseded.
            for fact in &diff.new {
                if queries::facts::get(tx, &fact.id, &request.target)?.is_some() {
                    rejected.push(fact.id.clone());
                    decisions.insert(fact.id.clone(), "already_on_target".into());
                    continue;
                }
                let mut copy = fact.clone();
                copy.branch_name = request.target.clone();
                copy.parent_id = None;
                copy.metadata["squash_merge_id"] =
                    serde_json::Value::String(merge_id.clone());
                copy.metadata["merged_from"] =
                    serde_json::Value::String(request.source.clone());
                queries::facts::insert(tx, &copy)?;
                merged.push(fact.id.clone());
                decisions.insert(fact.id.clone(), "squashed".into());
            }
        }
        MergeStrategy::Auto => {
            merged_by = if judged && !diff.conflicts.is_empty() {
                MergedBy::Judge
            } else {
                MergedBy::Auto
            };

            for fact in &diff.new {
                branching::copy_rows(
                    tx,
                    "facts",
                    &request.source,
                    &request.target,
                    std::slice::from_ref(&fact.id),
                    ConflictPolicy::Skip,
                )?;
                merged.push(fact.id.clone());
                decisions.insert(fact.id.clone(), "copied".into());
            }

            for conflict in &diff.conflicts {
                match verdicts.get(&conflict.source.id) {
                    Some(MergeVerdict::KeepSource) => {
                        // The source head supersedes the target head.
                        let mut incoming = conflict.source.clone();
                        incoming.branch_name = request.target.clone();
                        incoming.parent_id = Some(conflict.target.id.clone());
                        queries::facts::insert(tx, &incoming)?;
                        queries::facts::set_status(
                            tx,
                            &conflict.target.id,
                            &request.target,
                            FactStatus::Superseded,
                        )?;
                        merged.push(conflict.source.id.clone());
                        decisions.insert(conflict.source.id.clone(), "keep_source".into());
                    }
                    Some(MergeVerdict::KeepTarget) => {
                        rejected.push(conflict.source.id.clone());
                        decisions.insert(conflict.source.id.clone(), "keep_target".into());
                    }
                    Some(MergeVerdict::KeepBoth) => {
                        // Both statements survive as independent facts.
                        let mut incoming = conflict.source.clone();
                        incoming.branch_name = request.target.clone();
                        incoming.parent_id = None;
                        incoming.metadata["kept_both_with"] =
                            serde_json::Value::String(conflict.target.id.clone());
                        queries::facts::insert(tx, &incoming)?;
                        merged.push(conflict.source.id.clone());
                        decisions.insert(conflict.source.id.clone(), "keep_both".into());
                    }
                    None => {
                        rejected.push(conflict.source.id.clone());
                        decisions.insert(conflict.source.id.clone(), "unresolved".into());
                    }
                }
            }
        }
    }

    let history = MergeHistory {
        id: merge_id,
        source_branch: request.source.clone(),
        target_branch: request.target.clone(),
        strategy: request.strategy,
        items_merged: merged.clone(),
        items_rejected: rejected.clone(),
        conflict_resolution: serde_json::Value::Object(decisions),
        merged_by,
        created_at: Utc::now(),
    };
    queries::merges::insert(tx, &history)?;

    if request.target == MAIN_BRANCH && !request.keep_source {
        queries::branches::set_merged(tx, &request.source, request.strategy, Utc::now())?;
    }

    Ok(MergeReport {
        history,
        items_merged: merged,
        items_rejected: rejected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use agmem_providers::HeuristicJudge;
    use crate::branch::{BranchManager, CreateBranchRequest};
    use crate::embedding::EmbeddingGate;
    use crate::fact::{FactEngine, WriteFactRequest};

    struct World {
        store: Arc<Store>,
        locks: Arc<EngineLocks>,
        branches: BranchManager,
        facts: FactEngine,
    }

    async fn world() -> World {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let locks = Arc::new(EngineLocks::new());
        let branches = BranchManager::new(store.clone(), locks.clone());
        branches.ensure_main(&Ctx::background()).await.unwrap();
        let facts = FactEngine::new(
            store.clone(),
            Arc::new(EmbeddingGate::new(Some(Arc::new(
                agmem_providers::HashEmbedder::default(),
            )))),
            locks.clone(),
        );
        World {
            store,
            locks,
            branches,
            facts,
        }
    }

    impl World {
        fn merges(&self, judge: Option<Arc<dyn Judge>>) -> MergeEngine {
            MergeEngine::new(self.store.clone(), self.locks.clone(), judge)
        }
    }

    #[tokio::test]
    async fn auto_merge_copies_new_rows() {
        let w = world().await;
        let ctx = Ctx::background();
        w.branches
            .create(&ctx, CreateBranchRequest::new("exp/a", "main"))
            .await
            .unwrap();
        let written = w
            .facts
            .write(&ctx, WriteFactRequest::new("experiments use backoff", "exp/a"))
            .await
            .unwrap();

        let merges = w.merges(None);
        let report = merges
            .merge(&ctx, MergeRequest::new("exp/a", "main", MergeStrategy::Auto))
            .await
            .unwrap();
        assert_eq!(report.items_merged, vec![written.fact.id.clone()]);
        assert!(report.items_rejected.is_empty());

        let on_main = w.facts.get(&ctx, &written.fact.id, "main").await.unwrap();
        assert_eq!(on_main.fact_text, "experiments use backoff");
        // Source was merged into main and marked as such.
        let source = w.branches.get(&ctx, "exp/a").await.unwrap();
        assert_eq!(source.status, BranchStatus::Merged);
    }

    #[tokio::test]
    async fn judgeless_auto_merge_leaves_conflicts_unresolved() {
        let w = world().await;
        let ctx = Ctx::background();

        // A on main, forked, updated to A' on b1.
        let a = w
            .facts
            .write(
                &ctx,
                WriteFactRequest::new("the retry limit is three total attempts", "main"),
            )
            .await
            .unwrap();
        w.branches
            .create(&ctx, CreateBranchRequest::new("b1", "main"))
            .await
            .unwrap();
        let a_prime = w
            .facts
            .write(
                &ctx,
                WriteFactRequest::new("the retry limit is three total attempts max", "b1"),
            )
            .await
            .unwrap();
        assert_eq!(a_prime.fact.parent_id.as_deref(), Some(a.fact.id.as_str()));

        let merges = w.merges(None);
        let report = merges
            .merge(&ctx, MergeRequest::new("b1", "main", MergeStrategy::Auto))
            .await
            .unwrap();
        assert!(report.items_merged.is_empty());
        assert_eq!(report.items_rejected, vec![a_prime.fact.id.clone()]);

        // Main still holds the original, active.
        let main_a = w.facts.get(&ctx, &a.fact.id, "main").await.unwrap();
        assert_eq!(main_a.status, FactStatus::Active);
        assert!(w.facts.get(&ctx, &a_prime.fact.id, "main").await.is_err());
    }

    #[tokio::test]
    async fn judged_auto_merge_supersedes_target_on_keep_source() {
        let w = world().await;
        let ctx = Ctx::background();

        let a = w
            .facts
            .write(
                &ctx,
                WriteFactRequest::new("OAuth clients use a stored refresh token", "main"),
            )
            .await
            .unwrap();
        w.branches
            .create(&ctx, CreateBranchRequest::new("b1", "main"))
            .await
            .unwrap();
        // Superset text: the heuristic judge keeps the source.
        let a_prime = w
            .facts
            .write(
                &ctx,
                WriteFactRequest::new("OAuth clients use a stored refresh token rotation", "b1"),
            )
            .await
            .unwrap();

        let merges = w.merges(Some(Arc::new(HeuristicJudge)));
        let report = merges
            .merge(&ctx, MergeRequest::new("b1", "main", MergeStrategy::Auto))
            .await
            .unwrap();
        assert_eq!(report.items_merged, vec![a_prime.fact.id.clone()]);
        assert_eq!(report.history.merged_by, MergedBy::Judge);

        let old = w.facts.get(&ctx, &a.fact.id, "main").await.unwrap();
        assert_eq!(old.status, FactStatus::Superseded);
        let new = w.facts.get(&ctx, &a_prime.fact.id, "main").await.unwrap();
        assert_eq!(new.status, FactStatus::Active);
        assert_eq!(new.parent_id.as_deref(), Some(a.fact.id.as_str()));
    }

    #[tokio::test]
    async fn cherry_pick_reports_partial_success() {
        let w = world().await;
        let ctx = Ctx::background();
        w.branches
            .create(&ctx, CreateBranchRequest::new("b1", "main"))
            .await
            .unwrap();
        let written = w
            .facts
            .write(&ctx, WriteFactRequest::new("picked fact", "b1"))
            .await
            .unwrap();

        let merges = w.merges(None);
        let report = merges
            .merge(
                &ctx,
                MergeRequest::new("b1", "main", MergeStrategy::CherryPick)
                    .with_items(vec![written.fact.id.clone(), "no-such-id".to_string()]),
            )
            .await
            .unwrap();
        assert_eq!(report.items_merged, vec![written.fact.id.clone()]);
        assert_eq!(report.items_rejected, vec!["no-such-id".to_string()]);

        // Merge preservation: same text retrievable on target.
        let on_main = w.facts.get(&ctx, &written.fact.id, "main").await.unwrap();
        assert_eq!(on_main.fact_text, "picked fact");
    }

    #[tokio::test]
    async fn mixed_native_policy_and_auto_is_rejected() {
        let w = world().await;
        let ctx = Ctx::background();
        w.branches
            .create(&ctx, CreateBranchRequest::new("b1", "main"))
            .await
            .unwrap();

        let merges = w.merges(None);
        let err = merges
            .merge(
                &ctx,
                MergeRequest::new("b1", "main", MergeStrategy::Auto)
                    .with_policy(ConflictPolicy::Accept),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), agmem_types::ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn squash_marks_one_generation() {
        let w = world().await;
        let ctx = Ctx::background();
        w.branches
            .create(&ctx, CreateBranchRequest::new("b1", "main"))
            .await
            .unwrap();
        w.facts
            .write(&ctx, WriteFactRequest::new("first squashed detail", "b1"))
            .await
            .unwrap();
        w.facts
            .write(&ctx, WriteFactRequest::new("second unrelated finding", "b1"))
            .await
            .unwrap();

        let merges = w.merges(None);
        let report = merges
            .merge(
                &ctx,
                MergeRequest::new("b1", "main", MergeStrategy::Squash).keeping_source(),
            )
            .await
            .unwrap();
        assert_eq!(report.items_merged.len(), 2);

        let marker = &report.history.id;
        for id in &report.items_merged {
            let fact = w.facts.get(&ctx, id, "main").await.unwrap();
            assert_eq!(
                fact.metadata["squash_merge_id"],
                serde_json::Value::String(marker.clone())
            );
        }
        // keep_source: still active.
        let source = w.branches.get(&ctx, "b1").await.unwrap();
        assert_eq!(source.status, BranchStatus::Active);
    }
}
