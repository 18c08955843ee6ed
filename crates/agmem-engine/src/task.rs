use std::sync::Arc;

use agmem_store::{queries, Store};
use agmem_types::{
    context, new_id, Ctx, Error, Result, Task, TaskAgent, TaskStatus, MAIN_BRANCH,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::branch::{BranchManager, CreateBranchRequest};

/// Multi-agent task coordination.
///
/// A task owns an objective and a task-scoped branch; each joining agent
/// gets a private branch forked from it, so parallel writers never collide.
pub struct TaskEngine {
    store: Arc<Store>,
    branches: Arc<BranchManager>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskProgress {
    pub agent_id: String,
    pub assigned_branch: String,
    pub active_facts: i64,
    pub observations: i64,
    pub left: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusReport {
    pub task: Task,
    pub agents: Vec<TaskProgress>,
}

impl TaskEngine {
    pub fn new(store: Arc<Store>, branches: Arc<BranchManager>) -> Self {
        Self { store, branches }
    }

    /// Create a task and its task-scoped branch.
    pub async fn create(&self, ctx: &Ctx, objective: &str, task_type: &str) -> Result<Task> {
        let ctx = ctx.or_timeout(context::WRITE_DEADLINE);
        ctx.check()?;
        if objective.trim().is_empty() {
            return Err(Error::invalid_argument("objective must not be empty"));
        }

        let task_id = new_id();
        let branch_name = format!("task/{}", &task_id[..8]);
        self.branches
            .create(
                &ctx,
                CreateBranchRequest {
                    name: branch_name.clone(),
                    parent: MAIN_BRANCH.to_string(),
                    description: Some(format!("task branch: {objective}")),
                    metadata: serde_json::json!({ "task_id": task_id }),
                },
            )
            .await?;

        let task = Task {
            task_id,
            objective: objective.to_string(),
            task_type: task_type.to_string(),
            status: TaskStatus::Open,
            created_branch: branch_name,
            created_at: Utc::now(),
        };
        self.store.with_conn(|conn| queries::tasks::insert(conn, &task))?;
        Ok(task)
    }

    pub async fn get(&self, ctx: &Ctx, task_id: &str) -> Result<Task> {
        ctx.check()?;
        self.store.with_conn(|conn| {
            queries::tasks::get(conn, task_id)?
                .ok_or_else(|| Error::not_found(format!("task '{task_id}' does not exist")))
        })
    }

    /// Join an agent: forks an agent-private branch from the task branch.
    pub async fn join(
        &self,
        ctx: &Ctx,
        task_id: &str,
        agent_id: &str,
        role: Option<&str>,
    ) -> Result<TaskAgent> {
        let ctx = ctx.or_timeout(context::WRITE_DEADLINE);
        ctx.check()?;

        let task = self.get(&ctx, task_id).await?;
        if matches!(task.status, TaskStatus::Done | TaskStatus::Cancelled) {
            return Err(Error::precondition_failed(format!(
                "task '{task_id}' is {}",
                task.status.as_str()
            )));
        }
        let existing = self
            .store
            .with_conn(|conn| queries::tasks::get_agent(conn, task_id, agent_id))?;
        if existing.is_some() {
            return Err(Error::already_exists(format!(
                "agent '{agent_id}' already joined task '{task_id}'"
            )));
        }

        let assigned_branch = format!("{}/agent/{agent_id}", task.created_branch);
        self.branches
            .create(
                &ctx,
                CreateBranchRequest {
                    name: assigned_branch.clone(),
                    parent: task.created_branch.clone(),
                    description: Some(format!("agent '{agent_id}' on task '{task_id}'")),
                    metadata: serde_json::json!({ "task_id": task_id, "agent_id": agent_id }),
                },
            )
            .await?;

        let agent = TaskAgent {
            task_id: task_id.to_string(),
            agent_id: agent_id.to_string(),
            assigned_branch,
            role: role.map(str::to_string),
            joined_at: Utc::now(),
            left_at: None,
        };
        self.store.with_conn(|conn| {
            queries::tasks::insert_agent(conn, &agent)?;
            if task.status == TaskStatus::Open {
                queries::tasks::set_status(conn, task_id, TaskStatus::Running)?;
            }
            Ok(())
        })?;
        Ok(agent)
    }

    pub async fn leave(&self, ctx: &Ctx, task_id: &str, agent_id: &str) -> Result<()> {
        let ctx = ctx.or_timeout(context::WRITE_DEADLINE);
        ctx.check()?;
        let left = self.store.with_conn(|conn| {
            queries::tasks::mark_agent_left(conn, task_id, agent_id, Utc::now())
        })?;
        if !left {
            return Err(Error::not_found(format!(
                "agent '{agent_id}' has no open membership in task '{task_id}'"
            )));
        }
        Ok(())
    }

    /// Aggregate per-agent progress from their private branches.
    pub async fn status(&self, ctx: &Ctx, task_id: &str) -> Result<TaskStatusReport> {
        let ctx = ctx.or_timeout(context::SEARCH_DEADLINE);
        let task = self.get(&ctx, task_id).await?;

        self.store.with_conn(|conn| {
            let mut agents = Vec::new();
            for agent in queries::tasks::list_agents(conn, task_id)? {
                agents.push(TaskProgress {
                    active_facts: queries::facts::count_active(conn, &agent.assigned_branch)?,
                    observations: queries::observations::count_for_branch(
                        conn,
                        &agent.assigned_branch,
                    )?,
                    left: agent.left_at.is_some(),
                    agent_id: agent.agent_id,
                    assigned_branch: agent.assigned_branch,
                });
            }
            Ok(TaskStatusReport { task: task.clone(), agents })
        })
    }

    pub async fn complete(&self, ctx: &Ctx, task_id: &str) -> Result<Task> {
        self.finish(ctx, task_id, TaskStatus::Done).await
    }

    pub async fn cancel(&self, ctx: &Ctx, task_id: &str) -> Result<Task> {
        self.finish(ctx, task_id, TaskStatus::Cancelled).await
    }

    async fn finish(&self, ctx: &Ctx, task_id: &str, status: TaskStatus) -> Result<Task> {
        let ctx = ctx.or_timeout(context::WRITE_DEADLINE);
        ctx.check()?;
        let mut task = self.get(&ctx, task_id).await?;
        if matches!(task.status, TaskStatus::Done | TaskStatus::Cancelled) {
            return Err(Error::precondition_failed(format!(
                "task '{task_id}' already {}",
                task.status.as_str()
            )));
        }
        self.store
            .with_conn(|conn| queries::tasks::set_status(conn, task_id, status))?;
        task.status = status;
        Ok(task)
    }
}
