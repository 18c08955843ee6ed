use agmem_types::{Error, Fact, FactStatus, Result};
use rusqlite::{params, Connection, Row};

use crate::db::{db_err, parse_ts, to_ts};
use crate::queries::{embedding_from_sql, embedding_to_sql, json_or, json_to_sql};

const COLUMNS: &str = "id, fact_text, embedding, category, confidence, status, source_type, \
                       source_id, parent_id, session_id, agent_id, task_id, metadata, \
                       created_at, branch_name";

struct RawFact {
    id: String,
    fact_text: String,
    embedding: Option<String>,
    category: Option<String>,
    confidence: f64,
    status: String,
    source_type: Option<String>,
    source_id: Option<String>,
    parent_id: Option<String>,
    session_id: Option<String>,
    agent_id: Option<String>,
    task_id: Option<String>,
    metadata: Option<String>,
    created_at: String,
    branch_name: String,
}

fn raw(row: &Row<'_>) -> rusqlite::Result<RawFact> {
    Ok(RawFact {
        id: row.get(0)?,
        fact_text: row.get(1)?,
        embedding: row.get(2)?,
        category: row.get(3)?,
        confidence: row.get(4)?,
        status: row.get(5)?,
        source_type: row.get(6)?,
        source_id: row.get(7)?,
        parent_id: row.get(8)?,
        session_id: row.get(9)?,
        agent_id: row.get(10)?,
        task_id: row.get(11)?,
        metadata: row.get(12)?,
        created_at: row.get(13)?,
        branch_name: row.get(14)?,
    })
}

fn build(raw: RawFact) -> Result<Fact> {
    Ok(Fact {
        id: raw.id,
        fact_text: raw.fact_text,
        embedding: embedding_from_sql(raw.embedding),
        category: raw.category,
        confidence: raw.confidence,
        status: FactStatus::parse(&raw.status)?,
        source_type: raw.source_type,
        source_id: raw.source_id,
        parent_id: raw.parent_id,
        session_id: raw.session_id,
        agent_id: raw.agent_id,
        task_id: raw.task_id,
        metadata: json_or(raw.metadata, serde_json::json!({})),
        created_at: parse_ts(&raw.created_at)?,
        branch_name: raw.branch_name,
    })
}

pub fn insert(conn: &Connection, fact: &Fact) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO facts (id, branch_name, fact_text, embedding, category, confidence,
                           status, source_type, source_id, parent_id, session_id,
                           agent_id, task_id, metadata, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
        "#,
        params![
            &fact.id,
            &fact.branch_name,
            &fact.fact_text,
            embedding_to_sql(&fact.embedding)?,
            &fact.category,
            fact.confidence,
            fact.status.as_str(),
            &fact.source_type,
            &fact.source_id,
            &fact.parent_id,
            &fact.session_id,
            &fact.agent_id,
            &fact.task_id,
            json_to_sql(&fact.metadata),
            to_ts(fact.created_at),
        ],
    )
    .map_err(db_err)?;

    Ok(())
}

pub fn get(conn: &Connection, id: &str, branch: &str) -> Result<Option<Fact>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM facts WHERE id = ?1 AND branch_name = ?2"
        ))
        .map_err(db_err)?;

    let mut rows = stmt.query(params![id, branch]).map_err(db_err)?;
    match rows.next().map_err(db_err)? {
        Some(row) => Ok(Some(build(raw(row).map_err(db_err)?)?)),
        None => Ok(None),
    }
}

/// Returns false when the row does not exist.
pub fn set_status(conn: &Connection, id: &str, branch: &str, status: FactStatus) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE facts SET status = ?3 WHERE id = ?1 AND branch_name = ?2",
            params![id, branch, status.as_str()],
        )
        .map_err(db_err)?;

    Ok(n > 0)
}

/// Replace the stored metadata document.
pub fn set_metadata(
    conn: &Connection,
    id: &str,
    branch: &str,
    metadata: &serde_json::Value,
) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE facts SET metadata = ?3 WHERE id = ?1 AND branch_name = ?2",
            params![id, branch, json_to_sql(metadata)],
        )
        .map_err(db_err)?;

    Ok(n > 0)
}

#[derive(Debug, Clone, Default)]
pub struct FactFilter {
    pub status: Option<FactStatus>,
    pub category: Option<String>,
    pub session_id: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Branch listing, newest first.
pub fn list(conn: &Connection, branch: &str, filter: &FactFilter) -> Result<Vec<Fact>> {
    let mut where_clauses = vec!["branch_name = ?".to_string()];
    let mut args: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(branch.to_string())];

    if let Some(status) = filter.status {
        where_clauses.push("status = ?".to_string());
        args.push(Box::new(status.as_str().to_string()));
    }
    if let Some(category) = &filter.category {
        where_clauses.push("category = ?".to_string());
        args.push(Box::new(category.clone()));
    }
    if let Some(session_id) = &filter.session_id {
        where_clauses.push("session_id = ?".to_string());
        args.push(Box::new(session_id.clone()));
    }

    let limit_clause = match (filter.limit, filter.offset) {
        (Some(l), Some(o)) => format!("LIMIT {l} OFFSET {o}"),
        (Some(l), None) => format!("LIMIT {l}"),
        (None, _) => String::new(),
    };

    let query = format!(
        "SELECT {COLUMNS} FROM facts WHERE {} ORDER BY created_at DESC, id {}",
        where_clauses.join(" AND "),
        limit_clause
    );

    let mut stmt = conn.prepare(&query).map_err(db_err)?;
    let arg_refs: Vec<&dyn rusqlite::ToSql> = args.iter().map(|a| a.as_ref()).collect();
    let raws = stmt
        .query_map(arg_refs.as_slice(), raw)
        .map_err(db_err)?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()
        .map_err(db_err)?;

    raws.into_iter().map(build).collect()
}

/// Every fact on the branch, any status. Used by diff, merge, and snapshots.
pub fn all_for_branch(conn: &Connection, branch: &str) -> Result<Vec<Fact>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM facts WHERE branch_name = ?1 ORDER BY created_at, id"
        ))
        .map_err(db_err)?;

    let raws = stmt
        .query_map([branch], raw)
        .map_err(db_err)?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()
        .map_err(db_err)?;

    raws.into_iter().map(build).collect()
}

/// Active facts superseding `parent_id` on the branch.
pub fn active_children(conn: &Connection, branch: &str, parent_id: &str) -> Result<Vec<Fact>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM facts
             WHERE branch_name = ?1 AND parent_id = ?2 AND status = 'active'"
        ))
        .map_err(db_err)?;

    let raws = stmt
        .query_map(params![branch, parent_id], raw)
        .map_err(db_err)?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()
        .map_err(db_err)?;

    raws.into_iter().map(build).collect()
}

pub fn count_active(conn: &Connection, branch: &str) -> Result<i64> {
    conn.query_row(
        "SELECT count(*) FROM facts WHERE branch_name = ?1 AND status = 'active'",
        [branch],
        |row| row.get(0),
    )
    .map_err(db_err)
}

pub fn by_ids(conn: &Connection, branch: &str, ids: &[String]) -> Result<Vec<Fact>> {
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(fact) = get(conn, id, branch)? {
            out.push(fact);
        }
    }
    Ok(out)
}

/// Walk the supersession chain upward from `id`; detects would-be cycles.
pub fn ancestor_chain(conn: &Connection, branch: &str, id: &str) -> Result<Vec<String>> {
    let mut chain = Vec::new();
    let mut cursor = Some(id.to_string());
    while let Some(current) = cursor {
        if chain.contains(&current) {
            return Err(Error::internal(format!(
                "supersession cycle detected at fact '{current}'"
            )));
        }
        chain.push(current.clone());
        cursor = match get(conn, &current, branch)? {
            Some(fact) => fact.parent_id,
            None => None,
        };
    }
    Ok(chain)
}
