use agmem_types::{Result, Session, SessionStatus};
use rusqlite::{params, Connection, Row};

use crate::db::{db_err, parse_ts, to_ts};

const COLUMNS: &str =
    "session_id, parent_session, branch_name, project_path, status, summary, created_at";

struct RawSession {
    session_id: String,
    parent_session: Option<String>,
    branch_name: String,
    project_path: Option<String>,
    status: String,
    summary: Option<String>,
    created_at: String,
}

fn raw(row: &Row<'_>) -> rusqlite::Result<RawSession> {
    Ok(RawSession {
        session_id: row.get(0)?,
        parent_session: row.get(1)?,
        branch_name: row.get(2)?,
        project_path: row.get(3)?,
        status: row.get(4)?,
        summary: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn build(raw: RawSession) -> Result<Session> {
    Ok(Session {
        session_id: raw.session_id,
        parent_session: raw.parent_session,
        branch_name: raw.branch_name,
        project_path: raw.project_path,
        status: SessionStatus::parse(&raw.status)?,
        summary: raw.summary,
        created_at: parse_ts(&raw.created_at)?,
    })
}

pub fn insert(conn: &Connection, session: &Session) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO sessions (session_id, parent_session, branch_name, project_path,
                              status, summary, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
        params![
            &session.session_id,
            &session.parent_session,
            &session.branch_name,
            &session.project_path,
            session.status.as_str(),
            &session.summary,
            to_ts(session.created_at),
        ],
    )
    .map_err(db_err)?;

    Ok(())
}

pub fn get(conn: &Connection, session_id: &str) -> Result<Option<Session>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM sessions WHERE session_id = ?1"
        ))
        .map_err(db_err)?;

    let mut rows = stmt.query([session_id]).map_err(db_err)?;
    match rows.next().map_err(db_err)? {
        Some(row) => Ok(Some(build(raw(row).map_err(db_err)?)?)),
        None => Ok(None),
    }
}

pub fn close(
    conn: &Connection,
    session_id: &str,
    status: SessionStatus,
    summary: Option<&str>,
) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE sessions SET status = ?2, summary = COALESCE(?3, summary)
             WHERE session_id = ?1",
            params![session_id, status.as_str(), summary],
        )
        .map_err(db_err)?;

    Ok(n > 0)
}
