use std::path::Path;
use std::sync::Mutex;

use agmem_types::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

use crate::schema;

/// Render a timestamp as RFC 3339 UTC with fixed precision.
///
/// The fixed format keeps string comparison equal to time comparison, which
/// the point-in-time queries rely on.
pub fn to_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::internal(format!("bad timestamp '{s}': {e}")))
}

/// Map a substrate error onto the closed error set: busy/locked states are
/// retryable, anything else is a bug or corruption.
pub(crate) fn db_err(err: rusqlite::Error) -> Error {
    let retryable = matches!(
        &err,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            )
    );
    if retryable {
        Error::unavailable("storage busy").with_source(err)
    } else {
        Error::internal(format!("storage error: {err}")).with_source(err)
    }
}

/// Handle to the backing database.
///
/// A single connection guarded by a mutex: every engine operation is a short
/// transaction, so writer contention stays bounded by SQLite's own locking.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path).map_err(db_err)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        // INSERT OR REPLACE must fire the delete triggers that keep the
        // external-content FTS tables in sync.
        conn.pragma_update(None, "recursive_triggers", true)
            .map_err(db_err)?;
        schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run a read or single-statement write against the connection.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| Error::internal("storage connection poisoned"))?;
        f(&conn)
    }

    /// Run a multi-statement write inside one transaction.
    ///
    /// The closure's error rolls everything back.
    pub fn with_tx<T>(&self, f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| Error::internal("storage connection poisoned"))?;
        let tx = conn.transaction().map_err(db_err)?;
        let out = f(&tx)?;
        tx.commit().map_err(db_err)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_in_memory_and_initializes_schema() -> Result<()> {
        let store = Store::open_in_memory()?;
        store.with_conn(|conn| {
            let n: i64 = conn
                .query_row(
                    "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = 'facts'",
                    [],
                    |row| row.get(0),
                )
                .map_err(db_err)?;
            assert_eq!(n, 1);
            Ok(())
        })
    }

    #[test]
    fn opens_on_disk() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("agmem.db"))?;
        store.with_conn(|_| Ok(()))
    }

    #[test]
    fn timestamps_round_trip_and_sort_lexically() -> Result<()> {
        let a = parse_ts("2026-01-01T00:00:00Z")?;
        let b = parse_ts("2026-06-01T12:30:00Z")?;
        assert!(to_ts(a) < to_ts(b));
        assert_eq!(parse_ts(&to_ts(a))?, a);
        Ok(())
    }
}
