//! Launch store: SQLite-backed persistence for the authentication core.
//!
//! One [`LaunchStore`] owns all four relational concerns:
//!
//! - credential singleton ([`credentials`])
//! - identity mapping ([`identity`])
//! - nonce replay protection ([`replay`])
//! - session and course reconciliation ([`session`])
//!
//! # Design
//!
//! A single connection behind a mutex, with every compare-and-insert running
//! inside a `BEGIN IMMEDIATE` transaction. The immediate write lock makes
//! check-then-insert sequences atomic with respect to concurrent launches,
//! which is what closes the duplicate-identity and double-spend-nonce races.

mod credentials;
mod identity;
mod replay;
mod schema;
mod session;

pub use credentials::SigningCredential;
pub use session::SessionRecord;

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::Result;
use schema::LAUNCH_SCHEMA;

/// SQLite-backed launch store.
#[derive(Clone)]
pub struct LaunchStore {
    conn: Arc<Mutex<Connection>>,
}

impl LaunchStore {
    /// Open a file-backed store.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store (for testing).
    pub fn memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_connection(conn: &Connection) -> Result<()> {
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        // WAL mode for file-backed DBs (no-op for in-memory)
        let _ = conn.execute("PRAGMA journal_mode = WAL", []);
        conn.execute_batch(LAUNCH_SCHEMA)?;
        Ok(())
    }

    /// Run `f` inside a `BEGIN IMMEDIATE` transaction, committing on success
    /// and rolling back on error. No partial writes survive a failure.
    fn in_immediate_tx<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        conn.execute("BEGIN IMMEDIATE", [])?;
        match f(&conn) {
            Ok(value) => {
                conn.execute("COMMIT", [])?;
                Ok(value)
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                Err(e)
            }
        }
    }

    /// Run a read-only query outside any explicit transaction.
    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&conn)
    }
}

/// True when a rusqlite error is a constraint (UNIQUE/CHECK) violation.
fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

impl std::fmt::Debug for LaunchStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn memory_store_initializes() {
        let store = LaunchStore::memory().unwrap();
        // All tables exist and are empty
        let count: i64 = store
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM usermap", [], |row| row.get(0))
                    .map_err(Error::from)
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("launch.db");

        {
            let store = LaunchStore::open(&path).unwrap();
            store.resolve_or_create_user("canvas-1").unwrap();
        }

        let store = LaunchStore::open(&path).unwrap();
        assert_eq!(store.resolve_or_create_user("canvas-1").unwrap(), "user-1");
    }

    #[test]
    fn failed_transaction_rolls_back() {
        let store = LaunchStore::memory().unwrap();
        let result: Result<()> = store.in_immediate_tx(|conn| {
            conn.execute(
                "INSERT INTO usermap (user_id, unix_name) VALUES ('u1', 'user-1')",
                [],
            )?;
            Err(Error::Internal("forced failure".to_string()))
        });
        assert!(result.is_err());

        let count: i64 = store
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM usermap", [], |row| row.get(0))
                    .map_err(Error::from)
            })
            .unwrap();
        assert_eq!(count, 0);
    }
}
