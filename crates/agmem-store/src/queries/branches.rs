use agmem_types::{Branch, BranchStatus, MergeStrategy, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::db::{db_err, parse_ts, to_ts};
use crate::queries::{json_or, json_to_sql};

const COLUMNS: &str =
    "branch_name, parent_branch, description, status, forked_at, merged_at, merge_strategy, metadata";

struct RawBranch {
    branch_name: String,
    parent_branch: Option<String>,
    description: Option<String>,
    status: String,
    forked_at: String,
    merged_at: Option<String>,
    merge_strategy: Option<String>,
    metadata: Option<String>,
}

fn raw(row: &Row<'_>) -> rusqlite::Result<RawBranch> {
    Ok(RawBranch {
        branch_name: row.get(0)?,
        parent_branch: row.get(1)?,
        description: row.get(2)?,
        status: row.get(3)?,
        forked_at: row.get(4)?,
        merged_at: row.get(5)?,
        merge_strategy: row.get(6)?,
        metadata: row.get(7)?,
    })
}

fn build(raw: RawBranch) -> Result<Branch> {
    Ok(Branch {
        branch_name: raw.branch_name,
        parent_branch: raw.parent_branch,
        description: raw.description,
        status: BranchStatus::parse(&raw.status)?,
        forked_at: parse_ts(&raw.forked_at)?,
        merged_at: raw.merged_at.as_deref().map(parse_ts).transpose()?,
        merge_strategy: raw.merge_strategy,
        metadata: json_or(raw.metadata, serde_json::json!({})),
    })
}

pub fn insert(conn: &Connection, branch: &Branch) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO branch_registry (branch_name, parent_branch, description, status,
                                     forked_at, merged_at, merge_strategy, metadata)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
        params![
            &branch.branch_name,
            &branch.parent_branch,
            &branch.description,
            branch.status.as_str(),
            to_ts(branch.forked_at),
            branch.merged_at.map(to_ts),
            &branch.merge_strategy,
            json_to_sql(&branch.metadata),
        ],
    )
    .map_err(db_err)?;

    Ok(())
}

pub fn get(conn: &Connection, name: &str) -> Result<Option<Branch>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM branch_registry WHERE branch_name = ?1"
        ))
        .map_err(db_err)?;

    let mut rows = stmt.query([name]).map_err(db_err)?;
    match rows.next().map_err(db_err)? {
        Some(row) => Ok(Some(build(raw(row).map_err(db_err)?)?)),
        None => Ok(None),
    }
}

pub fn list(conn: &Connection, status: Option<BranchStatus>) -> Result<Vec<Branch>> {
    let (query, args): (String, Vec<Box<dyn rusqlite::ToSql>>) = match status {
        Some(status) => (
            format!(
                "SELECT {COLUMNS} FROM branch_registry WHERE status = ?1 ORDER BY forked_at, branch_name"
            ),
            vec![Box::new(status.as_str().to_string())],
        ),
        None => (
            format!("SELECT {COLUMNS} FROM branch_registry ORDER BY forked_at, branch_name"),
            vec![],
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

pub fn set_status(conn: &Connection, name: &str, status: BranchStatus) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE branch_registry SET status = ?2 WHERE branch_name = ?1",
            params![name, status.as_str()],
        )
        .map_err(db_err)?;

    Ok(n > 0)
}

/// Mark a branch merged and record how.
pub fn set_merged(
    conn: &Connection,
    name: &str,
    strategy: MergeStrategy,
    merged_at: DateTime<Utc>,
) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE branch_registry
             SET status = 'merged', merged_at = ?2, merge_strategy = ?3
             WHERE branch_name = ?1",
            params![name, to_ts(merged_at), strategy.as_str()],
        )
        .map_err(db_err)?;

    Ok(n > 0)
}

pub fn delete(conn: &Connection, name: &str) -> Result<bool> {
    let n = conn
        .execute(
            "DELETE FROM branch_registry WHERE branch_name = ?1",
            [name],
        )
        .map_err(db_err)?;

    Ok(n > 0)
}
