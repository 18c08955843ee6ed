use agmem_types::{Result, Score};
use rusqlite::{params, Connection, Row};

use crate::db::{db_err, parse_ts, to_ts};

const COLUMNS: &str =
    "id, target_type, target_id, scorer, dimension, value, explanation, created_at";

fn raw(
    row: &Row<'_>,
) -> rusqlite::Result<(String, String, String, String, String, f64, Option<String>, String)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn build(
    (id, target_type, target_id, scorer, dimension, value, explanation, created_at): (
        String,
        String,
        String,
        String,
        String,
        f64,
        Option<String>,
        String,
    ),
) -> Result<Score> {
    Ok(Score {
        id,
        target_type,
        target_id,
        scorer,
        dimension,
        value,
        explanation,
        created_at: parse_ts(&created_at)?,
    })
}

pub fn insert(conn: &Connection, score: &Score) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO scores (id, target_type, target_id, scorer, dimension, value,
                            explanation, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
        params![
            &score.id,
            &score.target_type,
            &score.target_id,
            &score.scorer,
            &score.dimension,
            score.value,
            &score.explanation,
            to_ts(score.created_at),
        ],
    )
    .map_err(db_err)?;

    Ok(())
}

pub fn list_for_target(
    conn: &Connection,
    target_type: &str,
    target_id: &str,
) -> Result<Vec<Score>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM scores
             WHERE target_type = ?1 AND target_id = ?2
             ORDER BY created_at, id"
        ))
        .map_err(db_err)?;

    let rows = stmt
        .query_map(params![target_type, target_id], raw)
        .map_err(db_err)?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()
        .map_err(db_err)?;

    rows.into_iter().map(build).collect()
}
