use agmem_types::{Message, Result, Role, ToolCall};
use rusqlite::{params, Connection, Row};

use crate::db::{db_err, parse_ts, to_ts};
use crate::queries::{embedding_from_sql, embedding_to_sql};

const COLUMNS: &str = "id, conversation_id, session_id, agent_id, role, content, thinking, \
                       embedding, tool_calls, token_count, model, sequence_num, created_at, \
                       branch_name";

struct RawMessage {
    id: String,
    conversation_id: String,
    session_id: Option<String>,
    agent_id: Option<String>,
    role: String,
    content: Option<String>,
    thinking: Option<String>,
    embedding: Option<String>,
    tool_calls: String,
    token_count: i64,
    model: Option<String>,
    sequence_num: i64,
    created_at: String,
    branch_name: String,
}

fn raw(row: &Row<'_>) -> rusqlite::Result<RawMessage> {
    Ok(RawMessage {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        session_id: row.get(2)?,
        agent_id: row.get(3)?,
        role: row.get(4)?,
        content: row.get(5)?,
        thinking: row.get(6)?,
        embedding: row.get(7)?,
        tool_calls: row.get(8)?,
        token_count: row.get(9)?,
        model: row.get(10)?,
        sequence_num: row.get(11)?,
        created_at: row.get(12)?,
        branch_name: row.get(13)?,
    })
}

fn build(raw: RawMessage) -> Result<Message> {
    let tool_calls: Vec<ToolCall> = serde_json::from_str(&raw.tool_calls).unwrap_or_default();
    Ok(Message {
        id: raw.id,
        conversation_id: raw.conversation_id,
        session_id: raw.session_id,
        agent_id: raw.agent_id,
        role: Role::parse(&raw.role)?,
        content: raw.content,
        thinking: raw.thinking,
        embedding: embedding_from_sql(raw.embedding),
        tool_calls,
        token_count: raw.token_count,
        model: raw.model,
        sequence_num: raw.sequence_num,
        branch_name: raw.branch_name,
        created_at: parse_ts(&raw.created_at)?,
    })
}

pub fn insert(conn: &Connection, message: &Message) -> Result<()> {
    let tool_calls = serde_json::to_string(&message.tool_calls)
        .unwrap_or_else(|_| "[]".to_string());
    conn.execute(
        r#"
        INSERT INTO messages (id, branch_name, conversation_id, session_id, agent_id, role,
                              content, thinking, embedding, tool_calls, token_count, model,
                              sequence_num, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
        "#,
        params![
            &message.id,
            &message.branch_name,
            &message.conversation_id,
            &message.session_id,
            &message.agent_id,
            message.role.as_str(),
            &message.content,
            &message.thinking,
            embedding_to_sql(&message.embedding)?,
            tool_calls,
            message.token_count,
            &message.model,
            message.sequence_num,
            to_ts(message.created_at),
        ],
    )
    .map_err(db_err)?;

    Ok(())
}

pub fn get(conn: &Connection, id: &str, branch: &str) -> Result<Option<Message>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM messages WHERE id = ?1 AND branch_name = ?2"
        ))
        .map_err(db_err)?;

    let mut rows = stmt.query(params![id, branch]).map_err(db_err)?;
    match rows.next().map_err(db_err)? {
        Some(row) => Ok(Some(build(raw(row).map_err(db_err)?)?)),
        None => Ok(None),
    }
}

/// Messages of a conversation in sequence order.
pub fn list(conn: &Connection, conversation_id: &str, branch: &str) -> Result<Vec<Message>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM messages
             WHERE conversation_id = ?1 AND branch_name = ?2
             ORDER BY sequence_num"
        ))
        .map_err(db_err)?;

    let raws = stmt
        .query_map(params![conversation_id, branch], raw)
        .map_err(db_err)?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()
        .map_err(db_err)?;

    raws.into_iter().map(build).collect()
}

/// Prefix of a conversation up to and including `max_seq`.
pub fn list_up_to(
    conn: &Connection,
    conversation_id: &str,
    branch: &str,
    max_seq: i64,
) -> Result<Vec<Message>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM messages
             WHERE conversation_id = ?1 AND branch_name = ?2 AND sequence_num <= ?3
             ORDER BY sequence_num"
        ))
        .map_err(db_err)?;

    let raws = stmt
        .query_map(params![conversation_id, branch, max_seq], raw)
        .map_err(db_err)?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()
        .map_err(db_err)?;

    raws.into_iter().map(build).collect()
}

pub fn max_sequence_num(
    conn: &Connection,
    conversation_id: &str,
    branch: &str,
) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT MAX(sequence_num) FROM messages
         WHERE conversation_id = ?1 AND branch_name = ?2",
        params![conversation_id, branch],
        |row| row.get::<_, Option<i64>>(0),
    )
    .map_err(db_err)
}

pub fn all_for_branch(conn: &Connection, branch: &str) -> Result<Vec<Message>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM messages
             WHERE branch_name = ?1 ORDER BY conversation_id, sequence_num"
        ))
        .map_err(db_err)?;

    let raws = stmt
        .query_map([branch], raw)
        .map_err(db_err)?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()
        .map_err(db_err)?;

    raws.into_iter().map(build).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;
    use agmem_types::new_id;
    use chrono::Utc;

    fn message(conv: &str, seq: i64) -> Message {
        Message {
            id: new_id(),
            conversation_id: conv.to_string(),
            session_id: None,
            agent_id: None,
            role: Role::User,
            content: Some(format!("message {seq}")),
            thinking: None,
            embedding: None,
            tool_calls: vec![],
            token_count: 2,
            model: None,
            sequence_num: seq,
            branch_name: "main".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn sequence_queries() -> Result<()> {
        let store = Store::open_in_memory()?;
        store.with_conn(|conn| {
            assert_eq!(max_sequence_num(conn, "c1", "main")?, None);
            for seq in 1..=5 {
                insert(conn, &message("c1", seq))?;
            }
            assert_eq!(max_sequence_num(conn, "c1", "main")?, Some(5));

            let prefix = list_up_to(conn, "c1", "main", 3)?;
            assert_eq!(
                prefix.iter().map(|m| m.sequence_num).collect::<Vec<_>>(),
                vec![1, 2, 3]
            );
            Ok(())
        })
    }

    #[test]
    fn tool_calls_round_trip() -> Result<()> {
        let store = Store::open_in_memory()?;
        store.with_conn(|conn| {
            let mut m = message("c1", 1);
            m.role = Role::Assistant;
            m.tool_calls = vec![ToolCall {
                name: "grep".to_string(),
                arguments: serde_json::json!({"pattern": "retry"}),
                output: Some("3 matches".to_string()),
                is_error: false,
            }];
            insert(conn, &m)?;

            let got = get(conn, &m.id, "main")?.expect("message");
            assert_eq!(got.tool_calls.len(), 1);
            assert_eq!(got.tool_calls[0].name, "grep");
            Ok(())
        })
    }
}
