use std::sync::Arc;

use agmem_store::{queries, Store};
use agmem_types::{context, Branch, Ctx, Error, Result, TemplateBranch};
use chrono::Utc;

use crate::branch::{BranchManager, CreateBranchRequest};

/// Register branches as reusable templates and stamp them out.
pub struct TemplateEngine {
    store: Arc<Store>,
    branches: Arc<BranchManager>,
}

#[derive(Debug, Clone)]
pub struct RegisterTemplateRequest {
    pub name: String,
    pub source_branch: String,
    pub description: Option<String>,
    pub applicable_task_types: Vec<String>,
    pub tags: Vec<String>,
}

impl RegisterTemplateRequest {
    pub fn new(name: impl Into<String>, source_branch: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_branch: source_branch.into(),
            description: None,
            applicable_task_types: Vec::new(),
            tags: Vec::new(),
        }
    }
}

impl TemplateEngine {
    pub fn new(store: Arc<Store>, branches: Arc<BranchManager>) -> Self {
        Self { store, branches }
    }

    /// Register (or re-register, bumping the version) a branch as template.
    pub async fn register(
        &self,
        ctx: &Ctx,
        request: RegisterTemplateRequest,
    ) -> Result<TemplateBranch> {
        let ctx = ctx.or_timeout(context::WRITE_DEADLINE);
        ctx.check()?;
        self.branches.get(&ctx, &request.source_branch).await?;

        self.store.with_conn(|conn| {
            let template = TemplateBranch {
                name: request.name.clone(),
                source_branch: request.source_branch.clone(),
                version: 1,
                applicable_task_types: request.applicable_task_types.clone(),
                tags: request.tags.clone(),
                description: request.description.clone(),
                created_at: Utc::now(),
            };
            queries::templates::upsert(conn, &template)?;
            queries::templates::get(conn, &request.name)?
                .ok_or_else(|| Error::internal("template vanished after upsert"))
        })
    }

    pub async fn get(&self, ctx: &Ctx, name: &str) -> Result<TemplateBranch> {
        ctx.check()?;
        self.store.with_conn(|conn| {
            queries::templates::get(conn, name)?
                .ok_or_else(|| Error::not_found(format!("template '{name}' does not exist")))
        })
    }

    pub async fn list(&self, ctx: &Ctx) -> Result<Vec<TemplateBranch>> {
        ctx.check()?;
        self.store.with_conn(queries::templates::list)
    }

    /// Fork the template's source branch into `target_branch`.
    pub async fn instantiate(
        &self,
        ctx: &Ctx,
        name: &str,
        target_branch: &str,
        task_id: Option<&str>,
    ) -> Result<Branch> {
        let ctx = ctx.or_timeout(context::WRITE_DEADLINE);
        let template = self.get(&ctx, name).await?;

        let mut metadata = serde_json::json!({
            "template": template.name,
            "template_version": template.version,
        });
        if let Some(task_id) = task_id {
            metadata["task_id"] = serde_json::Value::String(task_id.to_string());
        }

        self.branches
            .create(
                &ctx,
                CreateBranchRequest {
                    name: target_branch.to_string(),
                    parent: template.source_branch.clone(),
                    description: Some(format!("instantiated from template '{}'", template.name)),
                    metadata,
                },
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingGate;
    use crate::fact::{FactEngine, WriteFactRequest};
    use crate::locks::EngineLocks;

    async fn setup() -> (Arc<BranchManager>, FactEngine, TemplateEngine) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let locks = Arc::new(EngineLocks::new());
        let branches = Arc::new(BranchManager::new(store.clone(), locks.clone()));
        branches.ensure_main(&Ctx::background()).await.unwrap();
        let facts = FactEngine::new(store.clone(), Arc::new(EmbeddingGate::new(None)), locks);
        let templates = TemplateEngine::new(store, branches.clone());
        (branches, facts, templates)
    }

    #[tokio::test]
    async fn instantiate_forks_template_content() {
        let (branches, facts, templates) = setup().await;
        let ctx = Ctx::background();

        branches
            .create(&ctx, CreateBranchRequest::new("golden/setup", "main"))
            .await
            .unwrap();
        facts
            .write(
                &ctx,
                WriteFactRequest::new("start from the staging config", "golden/setup"),
            )
            .await
            .unwrap();

        let registered = templates
            .register(
                &ctx,
                RegisterTemplateRequest::new("setup", "golden/setup"),
            )
            .await
            .unwrap();
        assert_eq!(registered.version, 1);

        let instance = templates
            .instantiate(&ctx, "setup", "run/001", None)
            .await
            .unwrap();
        assert_eq!(instance.parent_branch.as_deref(), Some("golden/setup"));

        let seeded = facts
            .list(&ctx, "run/001", Default::default())
            .await
            .unwrap();
        assert_eq!(seeded.len(), 1);
        assert_eq!(seeded[0].fact_text, "start from the staging config");
    }

    #[tokio::test]
    async fn reregistering_bumps_version() {
        let (_branches, _facts, templates) = setup().await;
        let ctx = Ctx::background();
        templates
            .register(&ctx, RegisterTemplateRequest::new("setup", "main"))
            .await
            .unwrap();
        let again = templates
            .register(&ctx, RegisterTemplateRequest::new("setup", "main"))
            .await
            .unwrap();
        assert_eq!(again.version, 2);
    }
}
