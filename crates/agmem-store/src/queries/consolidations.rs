use agmem_types::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::db::{db_err, parse_ts, to_ts};

/// Durable record of one consolidation run.
#[derive(Debug, Clone)]
pub struct ConsolidationRecord {
    pub id: String,
    pub branch_name: String,
    pub observations_processed: i64,
    pub facts_created: i64,
    pub facts_updated: i64,
    pub facts_deduplicated: i64,
    pub created_at: DateTime<Utc>,
}

const COLUMNS: &str = "id, branch_name, observations_processed, facts_created, facts_updated, \
                       facts_deduplicated, created_at";

fn raw(
    row: &Row<'_>,
) -> rusqlite::Result<(String, String, i64, i64, i64, i64, String)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn build(
    (id, branch_name, observations_processed, facts_created, facts_updated, facts_deduplicated, created_at): (
        String,
        String,
        i64,
        i64,
        i64,
        i64,
        String,
    ),
) -> Result<ConsolidationRecord> {
    Ok(ConsolidationRecord {
        id,
        branch_name,
        observations_processed,
        facts_created,
        facts_updated,
        facts_deduplicated,
        created_at: parse_ts(&created_at)?,
    })
}

pub fn insert(conn: &Connection, record: &ConsolidationRecord) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO consolidation_history (id, branch_name, observations_processed,
                                           facts_created, facts_updated, facts_deduplicated,
                                           created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
        params![
            &record.id,
            &record.branch_name,
            record.observations_processed,
            record.facts_created,
            record.facts_updated,
            record.facts_deduplicated,
            to_ts(record.created_at),
        ],
    )
    .map_err(db_err)?;

    Ok(())
}

pub fn list(conn: &Connection, branch: Option<&str>) -> Result<Vec<ConsolidationRecord>> {
    let (query, args): (String, Vec<Box<dyn rusqlite::ToSql>>) = match branch {
        Some(branch) => (
            format!(
                "SELECT {COLUMNS} FROM consolidation_history
                 WHERE branch_name = ?1 ORDER BY created_at DESC, id"
            ),
            vec![Box::new(branch.to_string())],
        ),
        None => (
            format!(
                "SELECT {COLUMNS} FROM consolidation_history ORDER BY created_at DESC, id"
            ),
            vec![],
        ),
    };

    let mut stmt = conn.prepare(&query).map_err(db_err)?;
    let arg_refs: Vec<&dyn rusqlite::ToSql> = args.iter().map(|a| a.as_ref()).collect();
    let rows = stmt
        .query_map(arg_refs.as_slice(), raw)
        .map_err(db_err)?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()
        .map_err(db_err)?;

    rows.into_iter().map(build).collect()
}
