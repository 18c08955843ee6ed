use agmem_types::{Result, Snapshot};
use rusqlite::{params, Connection, Row};

use crate::db::{db_err, parse_ts, to_ts};

const COLUMNS: &str = "id, branch_name, label, captured_at, native, payload";

fn from_row(row: &Row<'_>) -> rusqlite::Result<(String, String, Option<String>, String, bool, Option<String>)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn build(
    (id, branch_name, label, captured_at, native, payload): (
        String,
        String,
        Option<String>,
        String,
        bool,
        Option<String>,
    ),
) -> Result<Snapshot> {
    Ok(Snapshot {
        id,
        branch_name,
        label,
        captured_at: parse_ts(&captured_at)?,
        native,
        payload,
    })
}

pub fn insert(conn: &Connection, snapshot: &Snapshot) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO snapshots (id, branch_name, label, captured_at, native, payload)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
        params![
            &snapshot.id,
            &snapshot.branch_name,
            &snapshot.label,
            to_ts(snapshot.captured_at),
            snapshot.native,
            &snapshot.payload,
        ],
    )
    .map_err(db_err)?;

    Ok(())
}

pub fn get(conn: &Connection, id: &str) -> Result<Option<Snapshot>> {
    let mut stmt = conn
        .prepare(&format!("SELECT {COLUMNS} FROM snapshots WHERE id = ?1"))
        .map_err(db_err)?;

    let mut rows = stmt.query([id]).map_err(db_err)?;
    match rows.next().map_err(db_err)? {
        Some(row) => Ok(Some(build(from_row(row).map_err(db_err)?)?)),
        None => Ok(None),
    }
}

pub fn list(conn: &Connection, branch: Option<&str>) -> Result<Vec<Snapshot>> {
    let (query, args): (String, Vec<Box<dyn rusqlite::ToSql>>) = match branch {
        Some(branch) => (
            format!(
                "SELECT {COLUMNS} FROM snapshots WHERE branch_name = ?1 ORDER BY captured_at DESC, id"
            ),
            vec![Box::new(branch.to_string())],
        ),
        None => (
            format!("SELECT {COLUMNS} FROM snapshots ORDER BY captured_at DESC, id"),
            vec![],
        ),
    };

    let mut stmt = conn.prepare(&query).map_err(db_err)?;
    let arg_refs: Vec<&dyn rusqlite::ToSql> = args.iter().map(|a| a.as_ref()).collect();
    let rows = stmt
        .query_map(arg_refs.as_slice(), from_row)
        .map_err(db_err)?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()
        .map_err(db_err)?;

    rows.into_iter().map(build).collect()
}
