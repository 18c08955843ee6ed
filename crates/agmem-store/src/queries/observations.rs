use agmem_types::{Observation, ObservationType, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::db::{db_err, parse_ts, to_ts};
use crate::queries::{embedding_from_sql, embedding_to_sql, json_or, json_to_sql};

const COLUMNS: &str = "id, observation_type, tool_name, summary, embedding, raw_input, \
                       raw_output, session_id, metadata, created_at, branch_name";

struct RawObservation {
    id: String,
    observation_type: String,
    tool_name: Option<String>,
    summary: String,
    embedding: Option<String>,
    raw_input: Option<String>,
    raw_output: Option<String>,
    session_id: Option<String>,
    metadata: Option<String>,
    created_at: String,
    branch_name: String,
}

fn raw(row: &Row<'_>) -> rusqlite::Result<RawObservation> {
    Ok(RawObservation {
        id: row.get(0)?,
        observation_type: row.get(1)?,
        tool_name: row.get(2)?,
        summary: row.get(3)?,
        embedding: row.get(4)?,
        raw_input: row.get(5)?,
        raw_output: row.get(6)?,
        session_id: row.get(7)?,
        metadata: row.get(8)?,
        created_at: row.get(9)?,
        branch_name: row.get(10)?,
    })
}

fn build(raw: RawObservation) -> Result<Observation> {
    Ok(Observation {
        id: raw.id,
        observation_type: ObservationType::parse(&raw.observation_type)?,
        tool_name: raw.tool_name,
        summary: raw.summary,
        embedding: embedding_from_sql(raw.embedding),
        raw_input: raw.raw_input,
        raw_output: raw.raw_output,
        session_id: raw.session_id,
        branch_name: raw.branch_name,
        metadata: json_or(raw.metadata, serde_json::json!({})),
        created_at: parse_ts(&raw.created_at)?,
    })
}

pub fn insert(conn: &Connection, observation: &Observation) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO observations (id, branch_name, observation_type, tool_name, summary,
                                  embedding, raw_input, raw_output, session_id, metadata,
                                  created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
        params![
            &observation.id,
            &observation.branch_name,
            observation.observation_type.as_str(),
            &observation.tool_name,
            &observation.summary,
            embedding_to_sql(&observation.embedding)?,
            &observation.raw_input,
            &observation.raw_output,
            &observation.session_id,
            json_to_sql(&observation.metadata),
            to_ts(observation.created_at),
        ],
    )
    .map_err(db_err)?;

    Ok(())
}

pub fn get(conn: &Connection, id: &str, branch: &str) -> Result<Option<Observation>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM observations WHERE id = ?1 AND branch_name = ?2"
        ))
        .map_err(db_err)?;

    let mut rows = stmt.query(params![id, branch]).map_err(db_err)?;
    match rows.next().map_err(db_err)? {
        Some(row) => Ok(Some(build(raw(row).map_err(db_err)?)?)),
        None => Ok(None),
    }
}

/// Newest-first window of observations, optionally bounded below by `since`.
pub fn list_recent(
    conn: &Connection,
    branch: &str,
    since: Option<DateTime<Utc>>,
    limit: usize,
) -> Result<Vec<Observation>> {
    let (query, args): (String, Vec<Box<dyn rusqlite::ToSql>>) = match since {
        Some(since) => (
            format!(
                "SELECT {COLUMNS} FROM observations
                 WHERE branch_name = ?1 AND created_at >= ?2
                 ORDER BY created_at DESC, id LIMIT {limit}"
            ),
            vec![Box::new(branch.to_string()), Box::new(to_ts(since))],
        ),
        None => (
            format!(
                "SELECT {COLUMNS} FROM observations
                 WHERE branch_name = ?1
                 ORDER BY created_at DESC, id LIMIT {limit}"
            ),
            vec![Box::new(branch.to_string())],
        ),
    };

    let mut stmt = conn.prepare(&query).map_err(db_err)?;
    let arg_refs: Vec<&dyn rusqlite::ToSql> = args.iter().map(|a| a.as_ref()).collect();
    let raws = stmt
        .query_map(arg_refs.as_slice(), raw)
        .map_err(db_err)?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()
        .map_err(db_err)?;

    raws.into_iter().map(build).collect()
}

pub fn count_for_branch(conn: &Connection, branch: &str) -> Result<i64> {
    conn.query_row(
        "SELECT count(*) FROM observations WHERE branch_name = ?1",
        [branch],
        |row| row.get(0),
    )
    .map_err(db_err)
}

pub fn all_for_branch(conn: &Connection, branch: &str) -> Result<Vec<Observation>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM observations WHERE branch_name = ?1 ORDER BY created_at, id"
        ))
        .map_err(db_err)?;

    let raws = stmt
        .query_map([branch], raw)
        .map_err(db_err)?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()
        .map_err(db_err)?;

    raws.into_iter().map(build).collect()
}
