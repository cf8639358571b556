//! SQLite store for synced agents, calls, reports and sync run history.
//!
//! The path comes from `Config::database_path`. All writes for one call go
//! through `with_transaction` so an item either lands completely or not at
//! all.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::Connection;

mod calls;
mod sync_runs;
pub mod types;
pub use types::*;

/// How long a write waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite connection wrapper.
///
/// Not `Sync`: the poll loop owns it exclusively.
pub struct CallDb {
    conn: Connection,
}

impl CallDb {
    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Execute a closure within a SQLite transaction.
    /// Commits on Ok, rolls back on Err.
    pub fn with_transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<DbError>,
    {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| E::from(DbError::Sqlite(e)))?;
        match f(self) {
            Ok(val) => {
                if let Err(e) = self.conn.execute_batch("COMMIT") {
                    let _ = self.conn.execute_batch("ROLLBACK");
                    return Err(E::from(DbError::Sqlite(e)));
                }
                Ok(val)
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Open a database at an explicit path and bring its schema up to date.
    pub fn open_at(path: PathBuf) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        // WAL lets read-only inspection run alongside the daemon
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        crate::migrations::run_migrations(&conn).map_err(DbError::Migration)?;

        // Reports must point at an existing call row
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        Ok(Self { conn })
    }

    /// Run a trivial query and return the SQLite library version.
    pub fn check_connection(&self) -> Result<String, DbError> {
        Ok(self
            .conn
            .query_row("SELECT sqlite_version()", [], |row| row.get(0))?)
    }

    /// File backing the main database, if any.
    pub fn path(&self) -> Option<&Path> {
        self.conn.path().filter(|p| !p.is_empty()).map(Path::new)
    }
}
