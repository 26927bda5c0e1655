mod schema;

use std::path::Path;

use parking_lot::{Mutex, MutexGuard};
use rusqlite::Connection;

use crate::error::Result;

/// Durable relational backing for the leaderboard. A single `rusqlite`
/// connection, WAL-mode, guarded by a mutex so it can be shared across the
/// async handler tasks described in spec.md §5 ("Store is opened once per
/// process and shared across concurrent readers").
///
/// `IngestionEngine` is the sole writer against a given `Store`; readers
/// (`QueryEngine`) only ever issue `SELECT`s, so lock contention is brief
/// even though the mutex serializes all access at the connection level.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Opens (creating if absent) the database at `path`, applies pragmas,
    /// and ensures the schema exists. Safe to call against an existing,
    /// already-populated file.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;",
        )?;
        conn.execute_batch(schema::SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Locks and returns the underlying connection. Callers issuing a
    /// single statement can use this directly; multi-statement writers
    /// should use [`Store::transaction`] instead so the amortized-fsync
    /// grouping described in spec.md §4.2 actually happens.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    /// Runs `f` inside a single SQLite transaction, committing on success
    /// and rolling back on error. Used by the ingestion engine to group a
    /// batch's phases (spec.md §4.2: "all six phases of one batch execute
    /// inside transactions grouped to amortize fsync").
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_in_memory_and_creates_schema() {
        let store = Store::open_in_memory().expect("open");
        let conn = store.conn();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'repo_metrics_hist'",
                [],
                |row| row.get(0),
            )
            .expect("query");
        assert_eq!(count, 1);
    }

    #[test]
    fn foreign_keys_are_enforced() {
        let store = Store::open_in_memory().expect("open");
        let conn = store.conn();
        let err = conn
            .execute(
                "INSERT INTO repo_latest(repo_id, run_id, history_start_run_id, stars, forks, watchers, is_archived)
                 VALUES (1, 1, 1, 0, 0, 0, 0)",
                [],
            )
            .unwrap_err();
        match err {
            rusqlite::Error::SqliteFailure(e, _) => {
                assert_eq!(e.code, rusqlite::ErrorCode::ConstraintViolation)
            }
            other => panic!("expected constraint violation, got {other:?}"),
        }
    }
}
