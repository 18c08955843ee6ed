// Branch-level row operations over the five branched tables.
// Fork is a transactional row copy under the child branch name; diff and
// merge compare/move branch-scoped row sets keyed by id.

use std::sync::Once;

use agmem_types::{
    ConflictPolicy, Conversation, Error, Fact, Message, Observation, Relation, Result,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::db::{db_err, to_ts};
use crate::queries;
use crate::schema::{data_columns, BRANCHED_TABLES};

static FORK_DEGRADE_WARNING: Once = Once::new();

/// Copy every branched row of `parent` under `child`.
///
/// Runs inside the caller's transaction so a partial fork never survives.
pub fn fork_branch(conn: &Connection, parent: &str, child: &str) -> Result<()> {
    FORK_DEGRADE_WARNING.call_once(|| {
        tracing::warn!(
            "substrate has no zero-copy table fork; branch forks copy rows per branch_name"
        );
    });

    for table in BRANCHED_TABLES {
        let cols = data_columns(table);
        conn.execute(
            &format!(
                "INSERT INTO {table} (branch_name, {cols})
                 SELECT ?1, {cols} FROM {table} WHERE branch_name = ?2"
            ),
            params![child, parent],
        )
        .map_err(db_err)?;
    }

    Ok(())
}

/// Copy only rows created at or before `as_of` — the point-in-time fork
/// behind native snapshot restore.
pub fn fork_branch_as_of(
    conn: &Connection,
    parent: &str,
    child: &str,
    as_of: DateTime<Utc>,
) -> Result<()> {
    let ts = to_ts(as_of);
    for table in BRANCHED_TABLES {
        let cols = data_columns(table);
        conn.execute(
            &format!(
                "INSERT INTO {table} (branch_name, {cols})
                 SELECT ?1, {cols} FROM {table}
                 WHERE branch_name = ?2 AND created_at <= ?3"
            ),
            params![child, parent, &ts],
        )
        .map_err(db_err)?;
    }

    Ok(())
}

/// Remove every branched row of `branch`. Registry rows are untouched.
pub fn delete_branch_rows(conn: &Connection, branch: &str) -> Result<()> {
    for table in BRANCHED_TABLES {
        conn.execute(
            &format!("DELETE FROM {table} WHERE branch_name = ?1"),
            [branch],
        )
        .map_err(db_err)?;
    }

    Ok(())
}

/// Row-level diff of one table between two branches.
#[derive(Debug, Clone, Default)]
pub struct RowSetDiff {
    /// Ids present in source but not in target.
    pub new: Vec<String>,
    /// Ids present in both with differing row content.
    pub modified: Vec<String>,
}

pub fn diff_table(
    conn: &Connection,
    table: &str,
    source: &str,
    target: &str,
) -> Result<RowSetDiff> {
    if !BRANCHED_TABLES.contains(&table) {
        return Err(Error::invalid_argument(format!(
            "table '{table}' does not participate in branching"
        )));
    }

    let mut stmt = conn
        .prepare(&format!(
            "SELECT s.id FROM {table} s
             WHERE s.branch_name = ?1
               AND NOT EXISTS (
                   SELECT 1 FROM {table} d WHERE d.id = s.id AND d.branch_name = ?2
               )
             ORDER BY s.id"
        ))
        .map_err(db_err)?;
    let new = stmt
        .query_map(params![source, target], |row| row.get::<_, String>(0))
        .map_err(db_err)?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()
        .map_err(db_err)?;

    let differs = data_columns(table)
        .split(',')
        .map(|c| {
            let c = c.trim();
            format!("s.{c} IS NOT d.{c}")
        })
        .collect::<Vec<_>>()
        .join(" OR ");

    let mut stmt = conn
        .prepare(&format!(
            "SELECT s.id FROM {table} s
             JOIN {table} d ON d.id = s.id AND d.branch_name = ?2
             WHERE s.branch_name = ?1 AND ({differs})
             ORDER BY s.id"
        ))
        .map_err(db_err)?;
    let modified = stmt
        .query_map(params![source, target], |row| row.get::<_, String>(0))
        .map_err(db_err)?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()
        .map_err(db_err)?;

    Ok(RowSetDiff { new, modified })
}

/// Copy specific rows of one table from source to target branch.
///
/// `Skip` keeps an existing target row; `Accept` overwrites it.
pub fn copy_rows(
    conn: &Connection,
    table: &str,
    source: &str,
    target: &str,
    ids: &[String],
    policy: ConflictPolicy,
) -> Result<usize> {
    if !BRANCHED_TABLES.contains(&table) {
        return Err(Error::invalid_argument(format!(
            "table '{table}' does not participate in branching"
        )));
    }

    let verb = match policy {
        ConflictPolicy::Skip => "INSERT OR IGNORE",
        ConflictPolicy::Accept => "INSERT OR REPLACE",
    };
    let cols = data_columns(table);

    let mut copied = 0;
    for id in ids {
        copied += conn
            .execute(
                &format!(
                    "{verb} INTO {table} (branch_name, {cols})
                     SELECT ?1, {cols} FROM {table} WHERE branch_name = ?2 AND id = ?3"
                ),
                params![target, source, id],
            )
            .map_err(db_err)?;
    }

    Ok(copied)
}

/// Serialized rows of one branch, used by payload snapshots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BranchPayload {
    pub facts: Vec<Fact>,
    pub observations: Vec<Observation>,
    pub relations: Vec<Relation>,
    pub conversations: Vec<Conversation>,
    pub messages: Vec<Message>,
}

pub fn branch_payload(conn: &Connection, branch: &str) -> Result<BranchPayload> {
    Ok(BranchPayload {
        facts: queries::facts::all_for_branch(conn, branch)?,
        observations: queries::observations::all_for_branch(conn, branch)?,
        relations: queries::relations::all_for_branch(conn, branch)?,
        conversations: queries::conversations::all_for_branch(conn, branch)?,
        messages: queries::messages::all_for_branch(conn, branch)?,
    })
}

/// Insert payload rows under `branch`, rewriting the branch discriminator.
pub fn restore_payload(conn: &Connection, payload: &BranchPayload, branch: &str) -> Result<()> {
    for fact in &payload.facts {
        let mut fact = fact.clone();
        fact.branch_name = branch.to_string();
        queries::facts::insert(conn, &fact)?;
    }
    for observation in &payload.observations {
        let mut observation = observation.clone();
        observation.branch_name = branch.to_string();
        queries::observations::insert(conn, &observation)?;
    }
    for relation in &payload.relations {
        let mut relation = relation.clone();
        relation.branch_name = branch.to_string();
        queries::relations::insert(conn, &relation)?;
    }
    for conversation in &payload.conversations {
        let mut conversation = conversation.clone();
        conversation.branch_name = branch.to_string();
        queries::conversations::insert(conn, &conversation)?;
    }
    for message in &payload.messages {
        let mut message = message.clone();
        message.branch_name = branch.to_string();
        queries::messages::insert(conn, &message)?;
    }

    Ok(())
}
