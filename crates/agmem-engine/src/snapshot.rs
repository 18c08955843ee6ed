use std::sync::Arc;

use agmem_store::{branching, queries, Store};
use agmem_types::{
    context, Branch, BranchStatus, Ctx, Error, Result, Snapshot, new_id,
};
use chrono::Utc;

use crate::branch::require_branch;
use crate::locks::EngineLocks;

/// Point-in-time capture and restore.
///
/// Restore never mutates the captured branch; it materializes a fresh
/// `{branch}_restored_{ts}` branch instead.
pub struct SnapshotManager {
    store: Arc<Store>,
    locks: Arc<EngineLocks>,
}

impl SnapshotManager {
    pub fn new(store: Arc<Store>, locks: Arc<EngineLocks>) -> Self {
        Self { store, locks }
    }

    /// `native` records only a timestamp anchor; otherwise the branch's rows
    /// are serialized into the snapshot for portability.
    pub async fn create(
        &self,
        ctx: &Ctx,
        branch: &str,
        label: Option<&str>,
        native: bool,
    ) -> Result<Snapshot> {
        let ctx = ctx.or_timeout(context::WRITE_DEADLINE);
        ctx.check()?;

        self.store.with_conn(|conn| {
            require_branch(conn, branch)?;

            let payload = if native {
                None
            } else {
                let payload = branching::branch_payload(conn, branch)?;
                Some(serde_json::to_string(&payload).map_err(|e| {
                    Error::internal(format!("snapshot payload serialization failed: {e}"))
                })?)
            };

            let snapshot = Snapshot {
                id: new_id(),
                branch_name: branch.to_string(),
                label: label.map(str::to_string),
                captured_at: Utc::now(),
                native,
                payload,
            };
            queries::snapshots::insert(conn, &snapshot)?;
            Ok(snapshot)
        })
    }

    pub async fn list(&self, ctx: &Ctx, branch: Option<&str>) -> Result<Vec<Snapshot>> {
        ctx.check()?;
        self.store.with_conn(|conn| queries::snapshots::list(conn, branch))
    }

    pub async fn get(&self, ctx: &Ctx, snapshot_id: &str) -> Result<Snapshot> {
        ctx.check()?;
        self.store.with_conn(|conn| {
            queries::snapshots::get(conn, snapshot_id)?
                .ok_or_else(|| Error::not_found(format!("snapshot '{snapshot_id}' does not exist")))
        })
    }

    /// Materialize the snapshot into a new branch and return its registry row.
    pub async fn restore(&self, ctx: &Ctx, snapshot_id: &str) -> Result<Branch> {
        let ctx = ctx.or_timeout(context::MERGE_DEADLINE);
        ctx.check()?;
        let snapshot = self.get(&ctx, snapshot_id).await?;

        let _registry = self.locks.registry.lock().await;
        ctx.check()?;
        self.store.with_tx(|tx| {
            let base = format!(
                "{}_restored_{}",
                snapshot.branch_name,
                snapshot.captured_at.timestamp()
            );
            let mut name = base.clone();
            let mut attempt = 1;
            while queries::branches::get(tx, &name)?.is_some() {
                attempt += 1;
                name = format!("{base}_{attempt}");
            }

            let branch = Branch {
                branch_name: name.clone(),
                parent_branch: Some(snapshot.branch_name.clone()),
                description: Some(format!("restored from snapshot {}", snapshot.id)),
                status: BranchStatus::Active,
                forked_at: Utc::now(),
                merged_at: None,
                merge_strategy: None,
                metadata: serde_json::json!({ "restored_from_snapshot": snapshot.id }),
            };
            queries::branches::insert(tx, &branch)?;

            if snapshot.native {
                branching::fork_branch_as_of(
                    tx,
                    &snapshot.branch_name,
                    &name,
                    snapshot.captured_at,
                )?;
            } else {
                let payload: branching::BranchPayload = snapshot
                    .payload
                    .as_deref()
                    .map(serde_json::from_str)
                    .transpose()
                    .map_err(|e| {
                        Error::internal(format!("snapshot payload deserialization failed: {e}"))
                    })?
                    .unwrap_or_default();
                branching::restore_payload(tx, &payload, &name)?;
            }

            Ok(branch)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::branch::BranchManager;

    async fn setup() -> (Arc<Store>, Arc<EngineLocks>, BranchManager) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let locks = Arc::new(EngineLocks::new());
        let branches = BranchManager::new(store.clone(), locks.clone());
        branches.ensure_main(&Ctx::background()).await.unwrap();
        (store, locks, branches)
    }

    #[tokio::test]
    async fn payload_snapshot_restores_into_fresh_branch() {
        let (store, locks, _branches) = setup().await;
        let snapshots = SnapshotManager::new(store.clone(), locks);
        let ctx = Ctx::background();

        store
            .with_conn(|conn| {
                queries::facts::insert(
                    conn,
                    &agmem_types::Fact {
                        id: new_id(),
                        fact_text: "pre-snapshot".to_string(),
                        embedding: None,
                        category: None,
                        confidence: 1.0,
                        status: agmem_types::FactStatus::Active,
                        source_type: None,
                        source_id: None,
                        parent_id: None,
                        session_id: None,
                        agent_id: None,
                        task_id: None,
                        branch_name: "main".to_string(),
                        metadata: serde_json::json!({}),
                        created_at: Utc::now(),
                    },
                )
            })
            .unwrap();

        let snapshot = snapshots
            .create(&ctx, "main", Some("before-experiment"), false)
            .await
            .unwrap();
        assert!(snapshot.payload.is_some());

        let restored = snapshots.restore(&ctx, &snapshot.id).await.unwrap();
        assert!(restored.branch_name.starts_with("main_restored_"));

        let facts = store
            .with_conn(|conn| queries::facts::all_for_branch(conn, &restored.branch_name))
            .unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].fact_text, "pre-snapshot");
    }

    #[tokio::test]
    async fn restore_twice_picks_distinct_names() {
        let (store, locks, _branches) = setup().await;
        let snapshots = SnapshotManager::new(store, locks);
        let ctx = Ctx::background();

        let snapshot = snapshots.create(&ctx, "main", None, false).await.unwrap();
        let first = snapshots.restore(&ctx, &snapshot.id).await.unwrap();
        let second = snapshots.restore(&ctx, &snapshot.id).await.unwrap();
        assert_ne!(first.branch_name, second.branch_name);
    }
}
