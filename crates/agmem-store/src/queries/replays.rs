use agmem_types::{Replay, ReplayConfig, ReplayStatus, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::db::{db_err, parse_ts, to_ts};

const COLUMNS: &str = "id, source_conversation_id, replay_conversation_id, pivot_message_id, \
                       branch_name, config, status, created_at, completed_at";

struct RawReplay {
    id: String,
    source_conversation_id: String,
    replay_conversation_id: String,
    pivot_message_id: String,
    branch_name: String,
    config: String,
    status: String,
    created_at: String,
    completed_at: Option<String>,
}

fn raw(row: &Row<'_>) -> rusqlite::Result<RawReplay> {
    Ok(RawReplay {
        id: row.get(0)?,
        source_conversation_id: row.get(1)?,
        replay_conversation_id: row.get(2)?,
        pivot_message_id: row.get(3)?,
        branch_name: row.get(4)?,
        config: row.get(5)?,
        status: row.get(6)?,
        created_at: row.get(7)?,
        completed_at: row.get(8)?,
    })
}

fn build(raw: RawReplay) -> Result<Replay> {
    let config: ReplayConfig = serde_json::from_str(&raw.config).unwrap_or_default();
    Ok(Replay {
        id: raw.id,
        source_conversation_id: raw.source_conversation_id,
        replay_conversation_id: raw.replay_conversation_id,
        pivot_message_id: raw.pivot_message_id,
        branch_name: raw.branch_name,
        config,
        status: ReplayStatus::parse(&raw.status)?,
        created_at: parse_ts(&raw.created_at)?,
        completed_at: raw.completed_at.as_deref().map(parse_ts).transpose()?,
    })
}

pub fn insert(conn: &Connection, replay: &Replay) -> Result<()> {
    let config = serde_json::to_string(&replay.config)
        .unwrap_or_else(|_| "{}".to_string());
    conn.execute(
        r#"
        INSERT INTO replays (id, source_conversation_id, replay_conversation_id,
                             pivot_message_id, branch_name, config, status, created_at,
                             completed_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
        params![
            &replay.id,
            &replay.source_conversation_id,
            &replay.replay_conversation_id,
            &replay.pivot_message_id,
            &replay.branch_name,
            config,
            replay.status.as_str(),
            to_ts(replay.created_at),
            replay.completed_at.map(to_ts),
        ],
    )
    .map_err(db_err)?;

    Ok(())
}

pub fn get(conn: &Connection, id: &str) -> Result<Option<Replay>> {
    let mut stmt = conn
        .prepare(&format!("SELECT {COLUMNS} FROM replays WHERE id = ?1"))
        .map_err(db_err)?;

    let mut rows = stmt.query([id]).map_err(db_err)?;
    match rows.next().map_err(db_err)? {
        Some(row) => Ok(Some(build(raw(row).map_err(db_err)?)?)),
        None => Ok(None),
    }
}

pub fn mark_completed(conn: &Connection, id: &str, completed_at: DateTime<Utc>) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE replays SET status = 'completed', completed_at = ?2
             WHERE id = ?1 AND status = 'pending'",
            params![id, to_ts(completed_at)],
        )
        .map_err(db_err)?;

    Ok(n > 0)
}
