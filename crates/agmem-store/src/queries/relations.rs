use agmem_types::{Relation, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::db::{db_err, parse_ts, to_ts};
use crate::queries::{json_or, json_to_sql};

const COLUMNS: &str = "id, source_entity, target_entity, relation_type, properties, \
                       confidence, valid_from, valid_to, session_id, created_at, branch_name";

struct RawRelation {
    id: String,
    source_entity: String,
    target_entity: String,
    relation_type: String,
    properties: Option<String>,
    confidence: f64,
    valid_from: String,
    valid_to: Option<String>,
    session_id: Option<String>,
    created_at: String,
    branch_name: String,
}

fn raw(row: &Row<'_>) -> rusqlite::Result<RawRelation> {
    Ok(RawRelation {
        id: row.get(0)?,
        source_entity: row.get(1)?,
        target_entity: row.get(2)?,
        relation_type: row.get(3)?,
        properties: row.get(4)?,
        confidence: row.get(5)?,
        valid_from: row.get(6)?,
        valid_to: row.get(7)?,
        session_id: row.get(8)?,
        created_at: row.get(9)?,
        branch_name: row.get(10)?,
    })
}

fn build(raw: RawRelation) -> Result<Relation> {
    Ok(Relation {
        id: raw.id,
        source_entity: raw.source_entity,
        target_entity: raw.target_entity,
        relation_type: raw.relation_type,
        properties: json_or(raw.properties, serde_json::json!({})),
        confidence: raw.confidence,
        valid_from: parse_ts(&raw.valid_from)?,
        valid_to: raw.valid_to.as_deref().map(parse_ts).transpose()?,
        session_id: raw.session_id,
        branch_name: raw.branch_name,
        created_at: parse_ts(&raw.created_at)?,
    })
}

pub fn insert(conn: &Connection, relation: &Relation) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO relations (id, branch_name, source_entity, target_entity, relation_type,
                               properties, confidence, valid_from, valid_to, session_id,
                               created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
        params![
            &relation.id,
            &relation.branch_name,
            &relation.source_entity,
            &relation.target_entity,
            &relation.relation_type,
            json_to_sql(&relation.properties),
            relation.confidence,
            to_ts(relation.valid_from),
            relation.valid_to.map(to_ts),
            &relation.session_id,
            to_ts(relation.created_at),
        ],
    )
    .map_err(db_err)?;

    Ok(())
}

/// The currently-open edge with this exact shape, if any.
pub fn find_open(
    conn: &Connection,
    branch: &str,
    source: &str,
    target: &str,
    relation_type: &str,
) -> Result<Option<Relation>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM relations
             WHERE branch_name = ?1 AND source_entity = ?2 AND target_entity = ?3
               AND relation_type = ?4 AND valid_to IS NULL"
        ))
        .map_err(db_err)?;

    let mut rows = stmt
        .query(params![branch, source, target, relation_type])
        .map_err(db_err)?;
    match rows.next().map_err(db_err)? {
        Some(row) => Ok(Some(build(raw(row).map_err(db_err)?)?)),
        None => Ok(None),
    }
}

/// Close an open edge by stamping `valid_to`.
pub fn close(conn: &Connection, id: &str, branch: &str, valid_to: DateTime<Utc>) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE relations SET valid_to = ?3
             WHERE id = ?1 AND branch_name = ?2 AND valid_to IS NULL",
            params![id, branch, to_ts(valid_to)],
        )
        .map_err(db_err)?;

    Ok(n > 0)
}

/// Currently-valid edges touching `entity` (either direction), optionally
/// narrowed to one relation type.
pub fn open_edges_touching(
    conn: &Connection,
    branch: &str,
    entity: &str,
    relation_type: Option<&str>,
) -> Result<Vec<Relation>> {
    let mut query = format!(
        "SELECT {COLUMNS} FROM relations
         WHERE branch_name = ?1 AND valid_to IS NULL
           AND (source_entity = ?2 OR target_entity = ?2)"
    );
    if relation_type.is_some() {
        query.push_str(" AND relation_type = ?3");
    }
    query.push_str(" ORDER BY created_at, id");

    let mut stmt = conn.prepare(&query).map_err(db_err)?;
    let raws = match relation_type {
        Some(rt) => stmt
            .query_map(params![branch, entity, rt], raw)
            .map_err(db_err)?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>(),
        None => stmt
            .query_map(params![branch, entity], raw)
            .map_err(db_err)?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>(),
    }
    .map_err(db_err)?;

    raws.into_iter().map(build).collect()
}

pub fn all_for_branch(conn: &Connection, branch: &str) -> Result<Vec<Relation>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM relations WHERE branch_name = ?1 ORDER BY created_at, id"
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

    fn relation(branch: &str, src: &str, tgt: &str) -> Relation {
        Relation {
            id: new_id(),
            source_entity: src.to_string(),
            target_entity: tgt.to_string(),
            relation_type: "depends_on".to_string(),
            properties: serde_json::json!({}),
            confidence: 1.0,
            valid_from: Utc::now(),
            valid_to: None,
            session_id: None,
            branch_name: branch.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn close_then_reopen_leaves_history() -> Result<()> {
        let store = Store::open_in_memory()?;
        store.with_conn(|conn| {
            let first = relation("main", "svc-a", "svc-b");
            insert(conn, &first)?;

            let open = find_open(conn, "main", "svc-a", "svc-b", "depends_on")?.expect("open");
            assert_eq!(open.id, first.id);

            assert!(close(conn, &first.id, "main", Utc::now())?);
            assert!(find_open(conn, "main", "svc-a", "svc-b", "depends_on")?.is_none());

            let second = relation("main", "svc-a", "svc-b");
            insert(conn, &second)?;
            let edges = open_edges_touching(conn, "main", "svc-a", None)?;
            assert_eq!(edges.len(), 1);
            assert_eq!(edges[0].id, second.id);
            Ok(())
        })
    }
}
