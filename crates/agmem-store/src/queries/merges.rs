use agmem_types::{MergeHistory, MergeStrategy, MergedBy, Result};
use rusqlite::{params, Connection, Row};

use crate::db::{db_err, parse_ts, to_ts};
use crate::queries::{json_or, json_to_sql, vec_from_json, vec_to_json};

const COLUMNS: &str = "id, source_branch, target_branch, strategy, items_merged, \
                       items_rejected, conflict_resolution, merged_by, created_at";

struct RawMerge {
    id: String,
    source_branch: String,
    target_branch: String,
    strategy: String,
    items_merged: String,
    items_rejected: String,
    conflict_resolution: Option<String>,
    merged_by: String,
    created_at: String,
}

fn raw(row: &Row<'_>) -> rusqlite::Result<RawMerge> {
    Ok(RawMerge {
        id: row.get(0)?,
        source_branch: row.get(1)?,
        target_branch: row.get(2)?,
        strategy: row.get(3)?,
        items_merged: row.get(4)?,
        items_rejected: row.get(5)?,
        conflict_resolution: row.get(6)?,
        merged_by: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn build(raw: RawMerge) -> Result<MergeHistory> {
    Ok(MergeHistory {
        id: raw.id,
        source_branch: raw.source_branch,
        target_branch: raw.target_branch,
        strategy: MergeStrategy::parse(&raw.strategy)?,
        items_merged: vec_from_json(raw.items_merged),
        items_rejected: vec_from_json(raw.items_rejected),
        conflict_resolution: json_or(raw.conflict_resolution, serde_json::json!({})),
        merged_by: MergedBy::parse(&raw.merged_by)?,
        created_at: parse_ts(&raw.created_at)?,
    })
}

pub fn insert(conn: &Connection, history: &MergeHistory) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO merge_history (id, source_branch, target_branch, strategy, items_merged,
                                   items_rejected, conflict_resolution, merged_by, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
        params![
            &history.id,
            &history.source_branch,
            &history.target_branch,
            history.strategy.as_str(),
            vec_to_json(&history.items_merged),
            vec_to_json(&history.items_rejected),
            json_to_sql(&history.conflict_resolution),
            history.merged_by.as_str(),
            to_ts(history.created_at),
        ],
    )
    .map_err(db_err)?;

    Ok(())
}

/// History rows touching `branch` (as source or target), or everything.
pub fn list(conn: &Connection, branch: Option<&str>) -> Result<Vec<MergeHistory>> {
    let (query, args): (String, Vec<Box<dyn rusqlite::ToSql>>) = match branch {
        Some(branch) => (
            format!(
                "SELECT {COLUMNS} FROM merge_history
                 WHERE source_branch = ?1 OR target_branch = ?1
                 ORDER BY created_at DESC, id"
            ),
            vec![Box::new(branch.to_string())],
        ),
        None => (
            format!("SELECT {COLUMNS} FROM merge_history ORDER BY created_at DESC, id"),
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
