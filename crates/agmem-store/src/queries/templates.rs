use agmem_types::{Result, TemplateBranch};
use rusqlite::{params, Connection, Row};

use crate::db::{db_err, parse_ts, to_ts};
use crate::queries::{vec_from_json, vec_to_json};

const COLUMNS: &str =
    "name, source_branch, version, applicable_task_types, tags, description, created_at";

struct RawTemplate {
    name: String,
    source_branch: String,
    version: i64,
    applicable_task_types: String,
    tags: String,
    description: Option<String>,
    created_at: String,
}

fn raw(row: &Row<'_>) -> rusqlite::Result<RawTemplate> {
    Ok(RawTemplate {
        name: row.get(0)?,
        source_branch: row.get(1)?,
        version: row.get(2)?,
        applicable_task_types: row.get(3)?,
        tags: row.get(4)?,
        description: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn build(raw: RawTemplate) -> Result<TemplateBranch> {
    Ok(TemplateBranch {
        name: raw.name,
        source_branch: raw.source_branch,
        version: raw.version,
        applicable_task_types: vec_from_json(raw.applicable_task_types),
        tags: vec_from_json(raw.tags),
        description: raw.description,
        created_at: parse_ts(&raw.created_at)?,
    })
}

/// Insert or re-register; re-registering bumps the version counter.
pub fn upsert(conn: &Connection, template: &TemplateBranch) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO template_branches (name, source_branch, version, applicable_task_types,
                                       tags, description, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(name) DO UPDATE SET
            source_branch = ?2,
            version = version + 1,
            applicable_task_types = ?4,
            tags = ?5,
            description = COALESCE(?6, description)
        "#,
        params![
            &template.name,
            &template.source_branch,
            template.version,
            vec_to_json(&template.applicable_task_types),
            vec_to_json(&template.tags),
            &template.description,
            to_ts(template.created_at),
        ],
    )
    .map_err(db_err)?;

    Ok(())
}

pub fn get(conn: &Connection, name: &str) -> Result<Option<TemplateBranch>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM template_branches WHERE name = ?1"
        ))
        .map_err(db_err)?;

    let mut rows = stmt.query([name]).map_err(db_err)?;
    match rows.next().map_err(db_err)? {
        Some(row) => Ok(Some(build(raw(row).map_err(db_err)?)?)),
        None => Ok(None),
    }
}

pub fn list(conn: &Connection) -> Result<Vec<TemplateBranch>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM template_branches ORDER BY name"
        ))
        .map_err(db_err)?;

    let rows = stmt
        .query_map([], raw)
        .map_err(db_err)?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()
        .map_err(db_err)?;

    rows.into_iter().map(build).collect()
}
