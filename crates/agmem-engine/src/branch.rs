use std::sync::Arc;

use agmem_store::{branching, queries, Store};
use agmem_types::{
    context, validate_branch_name, Branch, BranchStatus, Ctx, Error, Result, MAIN_BRANCH,
};
use chrono::Utc;
use rusqlite::Connection;

use crate::locks::EngineLocks;

/// Branch lifecycle and registry.
///
/// Registry writes are serialized by a process-wide lock; list/get are
/// lock-free reads.
pub struct BranchManager {
    store: Arc<Store>,
    locks: Arc<EngineLocks>,
}

#[derive(Debug, Clone)]
pub struct CreateBranchRequest {
    pub name: String,
    pub parent: String,
    pub description: Option<String>,
    pub metadata: serde_json::Value,
}

impl CreateBranchRequest {
    pub fn new(name: impl Into<String>, parent: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: parent.into(),
            description: None,
            metadata: serde_json::json!({}),
        }
    }
}

/// Fetch a registry row or fail with NotFound.
pub(crate) fn require_branch(conn: &Connection, name: &str) -> Result<Branch> {
    queries::branches::get(conn, name)?
        .ok_or_else(|| Error::not_found(format!("branch '{name}' does not exist")))
}

/// Fetch a registry row that must not be archived.
pub(crate) fn require_unarchived_branch(conn: &Connection, name: &str) -> Result<Branch> {
    let branch = require_branch(conn, name)?;
    if branch.status == BranchStatus::Archived {
        return Err(Error::precondition_failed(format!(
            "branch '{name}' is archived"
        )));
    }
    Ok(branch)
}

impl BranchManager {
    pub fn new(store: Arc<Store>, locks: Arc<EngineLocks>) -> Self {
        Self { store, locks }
    }

    /// Idempotently create the root branch.
    pub async fn ensure_main(&self, ctx: &Ctx) -> Result<Branch> {
        let ctx = ctx.or_timeout(context::WRITE_DEADLINE);
        ctx.check()?;

        let _registry = self.locks.registry.lock().await;
        self.store.with_conn(|conn| {
            if let Some(main) = queries::branches::get(conn, MAIN_BRANCH)? {
                return Ok(main);
            }
            let main = Branch {
                branch_name: MAIN_BRANCH.to_string(),
                parent_branch: None,
                description: Some("root branch".to_string()),
                status: BranchStatus::Active,
                forked_at: Utc::now(),
                merged_at: None,
                merge_strategy: None,
                metadata: serde_json::json!({}),
            };
            queries::branches::insert(conn, &main)?;
            Ok(main)
        })
    }

    /// Create a branch and fork the parent's rows into it, atomically.
    pub async fn create(&self, ctx: &Ctx, request: CreateBranchRequest) -> Result<Branch> {
        let ctx = ctx.or_timeout(context::WRITE_DEADLINE);
        ctx.check()?;
        validate_branch_name(&request.name)?;

        let _registry = self.locks.registry.lock().await;
        ctx.check()?;
        self.store.with_tx(|tx| {
            if queries::branches::get(tx, &request.name)?.is_some() {
                return Err(Error::already_exists(format!(
                    "branch '{}' already exists",
                    request.name
                )));
            }
            require_unarchived_branch(tx, &request.parent)?;

            let branch = Branch {
                branch_name: request.name.clone(),
                parent_branch: Some(request.parent.clone()),
                description: request.description.clone(),
                status: BranchStatus::Active,
                forked_at: Utc::now(),
                merged_at: None,
                merge_strategy: None,
                metadata: request.metadata.clone(),
            };
            queries::branches::insert(tx, &branch)?;
            // Same transaction: a failed fork rolls the registry row back.
            branching::fork_branch(tx, &request.parent, &request.name)?;
            Ok(branch)
        })
    }

    pub async fn list(&self, ctx: &Ctx, status: Option<BranchStatus>) -> Result<Vec<Branch>> {
        ctx.check()?;
        self.store.with_conn(|conn| queries::branches::list(conn, status))
    }

    pub async fn get(&self, ctx: &Ctx, name: &str) -> Result<Branch> {
        ctx.check()?;
        self.store.with_conn(|conn| require_branch(conn, name))
    }

    /// No-op on storage: validates the branch and returns its canonical name
    /// for the caller's context.
    pub async fn switch(&self, ctx: &Ctx, name: &str) -> Result<String> {
        ctx.check()?;
        let branch = self
            .store
            .with_conn(|conn| require_unarchived_branch(conn, name))?;
        Ok(branch.branch_name)
    }

    pub async fn archive(&self, ctx: &Ctx, name: &str) -> Result<Branch> {
        let ctx = ctx.or_timeout(context::WRITE_DEADLINE);
        ctx.check()?;
        if name == MAIN_BRANCH {
            return Err(Error::precondition_failed("the main branch is never archived"));
        }

        let _registry = self.locks.registry.lock().await;
        self.store.with_conn(|conn| {
            let mut branch = require_branch(conn, name)?;
            if branch.status != BranchStatus::Archived {
                queries::branches::set_status(conn, name, BranchStatus::Archived)?;
                branch.status = BranchStatus::Archived;
            }
            Ok(branch)
        })
    }

    /// Parent chain from `name` up to the root. Rejects cycles.
    pub async fn ancestry(&self, ctx: &Ctx, name: &str) -> Result<Vec<String>> {
        ctx.check()?;
        self.store.with_conn(|conn| {
            let mut chain = Vec::new();
            let mut cursor = Some(name.to_string());
            while let Some(current) = cursor {
                if chain.contains(&current) {
                    return Err(Error::internal(format!(
                        "branch parent cycle detected at '{current}'"
                    )));
                }
                let branch = require_branch(conn, &current)?;
                chain.push(current);
                cursor = branch.parent_branch;
            }
            Ok(chain)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> BranchManager {
        BranchManager::new(
            Arc::new(Store::open_in_memory().unwrap()),
            Arc::new(EngineLocks::new()),
        )
    }

    #[tokio::test]
    async fn ensure_main_is_idempotent() {
        let branches = manager();
        let ctx = Ctx::background();
        let first = branches.ensure_main(&ctx).await.unwrap();
        let second = branches.ensure_main(&ctx).await.unwrap();
        assert_eq!(first.branch_name, second.branch_name);
        assert!(first.parent_branch.is_none());
    }

    #[tokio::test]
    async fn create_rejects_duplicates_and_bad_parents() {
        let branches = manager();
        let ctx = Ctx::background();
        branches.ensure_main(&ctx).await.unwrap();

        branches
            .create(&ctx, CreateBranchRequest::new("exp/a", "main"))
            .await
            .unwrap();

        let dup = branches
            .create(&ctx, CreateBranchRequest::new("exp/a", "main"))
            .await
            .unwrap_err();
        assert_eq!(dup.kind(), agmem_types::ErrorKind::AlreadyExists);

        let orphan = branches
            .create(&ctx, CreateBranchRequest::new("exp/b", "missing"))
            .await
            .unwrap_err();
        assert_eq!(orphan.kind(), agmem_types::ErrorKind::NotFound);

        branches.archive(&ctx, "exp/a").await.unwrap();
        let archived_parent = branches
            .create(&ctx, CreateBranchRequest::new("exp/a/child", "exp/a"))
            .await
            .unwrap_err();
        assert_eq!(
            archived_parent.kind(),
            agmem_types::ErrorKind::PreconditionFailed
        );
    }

    #[tokio::test]
    async fn archive_main_is_rejected() {
        let branches = manager();
        let ctx = Ctx::background();
        branches.ensure_main(&ctx).await.unwrap();
        let err = branches.archive(&ctx, "main").await.unwrap_err();
        assert_eq!(err.kind(), agmem_types::ErrorKind::PreconditionFailed);
    }

    #[tokio::test]
    async fn ancestry_walks_to_main() {
        let branches = manager();
        let ctx = Ctx::background();
        branches.ensure_main(&ctx).await.unwrap();
        branches
            .create(&ctx, CreateBranchRequest::new("exp", "main"))
            .await
            .unwrap();
        branches
            .create(&ctx, CreateBranchRequest::new("exp/deep", "exp"))
            .await
            .unwrap();

        let chain = branches.ancestry(&ctx, "exp/deep").await.unwrap();
        assert_eq!(chain, vec!["exp/deep", "exp", "main"]);
    }
}
