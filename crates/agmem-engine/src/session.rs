use std::sync::Arc;

use agmem_store::{queries, Store};
use agmem_types::{
    context, new_id, Ctx, Error, Result, Session, SessionStatus,
};
use chrono::Utc;

use crate::branch::require_unarchived_branch;

/// Session registry: writes are tagged with the acting session, so the
/// lifecycle here is deliberately small.
pub struct SessionEngine {
    store: Arc<Store>,
}

#[derive(Debug, Clone, Default)]
pub struct OpenSessionRequest {
    /// Client-chosen id; generated when absent.
    pub session_id: Option<String>,
    pub parent_session: Option<String>,
    pub branch: String,
    pub project_path: Option<String>,
}

impl OpenSessionRequest {
    pub fn new(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            ..Default::default()
        }
    }
}

impl SessionEngine {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub async fn open(&self, ctx: &Ctx, request: OpenSessionRequest) -> Result<Session> {
        let ctx = ctx.or_timeout(context::WRITE_DEADLINE);
        ctx.check()?;

        let session = Session {
            session_id: request.session_id.unwrap_or_else(new_id),
            parent_session: request.parent_session,
            branch_name: request.branch,
            project_path: request.project_path,
            status: SessionStatus::Active,
            summary: None,
            created_at: Utc::now(),
        };

        self.store.with_conn(|conn| {
            require_unarchived_branch(conn, &session.branch_name)?;
            if queries::sessions::get(conn, &session.session_id)?.is_some() {
                return Err(Error::already_exists(format!(
                    "session '{}' already exists",
                    session.session_id
                )));
            }
            queries::sessions::insert(conn, &session)?;
            Ok(())
        })?;

        Ok(session)
    }

    pub async fn get(&self, ctx: &Ctx, session_id: &str) -> Result<Session> {
        ctx.check()?;
        self.store.with_conn(|conn| {
            queries::sessions::get(conn, session_id)?
                .ok_or_else(|| Error::not_found(format!("session '{session_id}' does not exist")))
        })
    }

    pub async fn close(
        &self,
        ctx: &Ctx,
        session_id: &str,
        status: SessionStatus,
        summary: Option<&str>,
    ) -> Result<Session> {
        let ctx = ctx.or_timeout(context::WRITE_DEADLINE);
        ctx.check()?;
        if status == SessionStatus::Active {
            return Err(Error::invalid_argument(
                "closing a session requires completed or abandoned",
            ));
        }

        self.store.with_conn(|conn| {
            let closed = queries::sessions::close(conn, session_id, status, summary)?;
            if !closed {
                return Err(Error::not_found(format!(
                    "session '{session_id}' does not exist"
                )));
            }
            queries::sessions::get(conn, session_id)?
                .ok_or_else(|| Error::internal("session vanished during close"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::branch::BranchManager;
    use crate::locks::EngineLocks;

    async fn engine() -> SessionEngine {
        let store = Arc::new(Store::open_in_memory().unwrap());
        BranchManager::new(store.clone(), Arc::new(EngineLocks::new()))
            .ensure_main(&Ctx::background())
            .await
            .unwrap();
        SessionEngine::new(store)
    }

    #[tokio::test]
    async fn open_then_close_with_summary() {
        let sessions = engine().await;
        let ctx = Ctx::background();

        let opened = sessions
            .open(&ctx, OpenSessionRequest::new("main"))
            .await
            .unwrap();
        assert_eq!(opened.status, SessionStatus::Active);

        let closed = sessions
            .close(
                &ctx,
                &opened.session_id,
                SessionStatus::Completed,
                Some("shipped the migration"),
            )
            .await
            .unwrap();
        assert_eq!(closed.status, SessionStatus::Completed);
        assert_eq!(closed.summary.as_deref(), Some("shipped the migration"));
    }

    #[tokio::test]
    async fn duplicate_session_ids_are_rejected() {
        let sessions = engine().await;
        let ctx = Ctx::background();
        let mut request = OpenSessionRequest::new("main");
        request.session_id = Some("s1".to_string());
        sessions.open(&ctx, request.clone()).await.unwrap();
        let err = sessions.open(&ctx, request).await.unwrap_err();
        assert_eq!(err.kind(), agmem_types::ErrorKind::AlreadyExists);
    }
}
