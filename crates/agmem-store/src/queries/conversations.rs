use agmem_types::{Conversation, ConversationStatus, Result};
use rusqlite::{params, Connection, Row};

use crate::db::{db_err, parse_ts, to_ts};
use crate::queries::{json_or, json_to_sql};

const COLUMNS: &str = "id, session_id, agent_id, task_id, title, parent_conversation_id, \
                       fork_point_message_id, status, message_count, total_tokens, model, \
                       metadata, created_at, branch_name";

struct RawConversation {
    id: String,
    session_id: Option<String>,
    agent_id: Option<String>,
    task_id: Option<String>,
    title: Option<String>,
    parent_conversation_id: Option<String>,
    fork_point_message_id: Option<String>,
    status: String,
    message_count: i64,
    total_tokens: i64,
    model: Option<String>,
    metadata: Option<String>,
    created_at: String,
    branch_name: String,
}

fn raw(row: &Row<'_>) -> rusqlite::Result<RawConversation> {
    Ok(RawConversation {
        id: row.get(0)?,
        session_id: row.get(1)?,
        agent_id: row.get(2)?,
        task_id: row.get(3)?,
        title: row.get(4)?,
        parent_conversation_id: row.get(5)?,
        fork_point_message_id: row.get(6)?,
        status: row.get(7)?,
        message_count: row.get(8)?,
        total_tokens: row.get(9)?,
        model: row.get(10)?,
        metadata: row.get(11)?,
        created_at: row.get(12)?,
        branch_name: row.get(13)?,
    })
}

fn build(raw: RawConversation) -> Result<Conversation> {
    Ok(Conversation {
        id: raw.id,
        session_id: raw.session_id,
        agent_id: raw.agent_id,
        task_id: raw.task_id,
        branch_name: raw.branch_name,
        title: raw.title,
        parent_conversation_id: raw.parent_conversation_id,
        fork_point_message_id: raw.fork_point_message_id,
        status: ConversationStatus::parse(&raw.status)?,
        message_count: raw.message_count,
        total_tokens: raw.total_tokens,
        model: raw.model,
        metadata: json_or(raw.metadata, serde_json::json!({})),
        created_at: parse_ts(&raw.created_at)?,
    })
}

pub fn insert(conn: &Connection, conversation: &Conversation) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO conversations (id, branch_name, session_id, agent_id, task_id, title,
                                   parent_conversation_id, fork_point_message_id, status,
                                   message_count, total_tokens, model, metadata, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
        "#,
        params![
            &conversation.id,
            &conversation.branch_name,
            &conversation.session_id,
            &conversation.agent_id,
            &conversation.task_id,
            &conversation.title,
            &conversation.parent_conversation_id,
            &conversation.fork_point_message_id,
            conversation.status.as_str(),
            conversation.message_count,
            conversation.total_tokens,
            &conversation.model,
            json_to_sql(&conversation.metadata),
            to_ts(conversation.created_at),
        ],
    )
    .map_err(db_err)?;

    Ok(())
}

pub fn get(conn: &Connection, id: &str, branch: &str) -> Result<Option<Conversation>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM conversations WHERE id = ?1 AND branch_name = ?2"
        ))
        .map_err(db_err)?;

    let mut rows = stmt.query(params![id, branch]).map_err(db_err)?;
    match rows.next().map_err(db_err)? {
        Some(row) => Ok(Some(build(raw(row).map_err(db_err)?)?)),
        None => Ok(None),
    }
}

pub fn set_status(
    conn: &Connection,
    id: &str,
    branch: &str,
    status: ConversationStatus,
) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE conversations SET status = ?3 WHERE id = ?1 AND branch_name = ?2",
            params![id, branch, status.as_str()],
        )
        .map_err(db_err)?;

    Ok(n > 0)
}

/// Roll the denormalized message counters forward.
pub fn bump_counts(
    conn: &Connection,
    id: &str,
    branch: &str,
    added_messages: i64,
    added_tokens: i64,
) -> Result<()> {
    conn.execute(
        "UPDATE conversations
         SET message_count = message_count + ?3, total_tokens = total_tokens + ?4
         WHERE id = ?1 AND branch_name = ?2",
        params![id, branch, added_messages, added_tokens],
    )
    .map_err(db_err)?;

    Ok(())
}

/// Delete a conversation and cascade its messages.
pub fn delete(conn: &Connection, id: &str, branch: &str) -> Result<bool> {
    conn.execute(
        "DELETE FROM messages WHERE conversation_id = ?1 AND branch_name = ?2",
        params![id, branch],
    )
    .map_err(db_err)?;
    let n = conn
        .execute(
            "DELETE FROM conversations WHERE id = ?1 AND branch_name = ?2",
            params![id, branch],
        )
        .map_err(db_err)?;

    Ok(n > 0)
}

pub fn list(conn: &Connection, branch: &str, limit: usize) -> Result<Vec<Conversation>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM conversations
             WHERE branch_name = ?1 ORDER BY created_at DESC, id LIMIT {limit}"
        ))
        .map_err(db_err)?;

    let raws = stmt
        .query_map([branch], raw)
        .map_err(db_err)?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()
        .map_err(db_err)?;

    raws.into_iter().map(build).collect()
}

pub fn all_for_branch(conn: &Connection, branch: &str) -> Result<Vec<Conversation>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM conversations WHERE branch_name = ?1 ORDER BY created_at, id"
        ))
        .map_err(db_err)?;

    let raws = stmt
        .query_map([branch], raw)
        .map_err(db_err)?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()
        .map_err(db_err)?;

    raws.into_iter().map(build).collect()
}
