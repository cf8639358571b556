//! Numbered schema migrations.
//!
//! SQL files are embedded with `include_str!` and each runs exactly once,
//! tracked by the `schema_version` table.

use std::path::PathBuf;

use rusqlite::{Connection, DatabaseName};

struct Migration {
    version: i32,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        sql: include_str!("migrations/001_baseline.sql"),
    },
    Migration {
        version: 2,
        sql: include_str!("migrations/002_sync_runs.sql"),
    },
];

fn ensure_schema_version_table(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("Failed to create schema_version table: {}", e))
}

/// Highest applied migration version, or 0 for a fresh database.
fn current_version(conn: &Connection) -> Result<i32, String> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .map_err(|e| format!("Failed to read schema version: {}", e))
}

/// Copy a file-backed database to `<path>.pre-migration.bak` before its
/// schema changes. Returns the backup path, or `None` for in-memory databases.
fn snapshot_before_upgrade(conn: &Connection) -> Result<Option<PathBuf>, String> {
    let Some(source) = conn.path().filter(|p| !p.is_empty()) else {
        return Ok(None);
    };
    let mut target = PathBuf::from(source).into_os_string();
    target.push(".pre-migration.bak");
    let target = PathBuf::from(target);

    conn.backup(DatabaseName::Main, &target, None)
        .map_err(|e| format!("Pre-migration backup to {} failed: {}", target.display(), e))?;
    Ok(Some(target))
}

/// Run one migration and record it, atomically.
fn apply(conn: &Connection, migration: &Migration) -> Result<(), String> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| format!("Migration v{}: cannot begin: {}", migration.version, e))?;
    tx.execute_batch(migration.sql)
        .map_err(|e| format!("Migration v{} failed: {}", migration.version, e))?;
    tx.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [migration.version],
    )
    .map_err(|e| format!("Migration v{}: cannot record version: {}", migration.version, e))?;
    tx.commit()
        .map_err(|e| format!("Migration v{}: commit failed: {}", migration.version, e))
}

/// Bring the schema up to date, returning how many migrations ran.
///
/// A database stamped with a version newer than this build knows is left
/// untouched and reported as an error. A database that already has a schema
/// is snapshotted first; a brand-new one is not.
pub fn run_migrations(conn: &Connection) -> Result<usize, String> {
    ensure_schema_version_table(conn)?;

    let current = current_version(conn)?;
    let newest_known = MIGRATIONS.iter().map(|m| m.version).max().unwrap_or(0);
    if current > newest_known {
        return Err(format!(
            "Database is at schema v{} but this callsync build only knows up to v{}; \
             it is newer than this version of callsync",
            current, newest_known
        ));
    }

    let pending = MIGRATIONS.iter().filter(|m| m.version > current);
    let mut applied = 0;
    for migration in pending {
        if applied == 0 && current > 0 {
            if let Some(backup) = snapshot_before_upgrade(conn)? {
                log::info!("Migrations: snapshot of v{} schema at {}", current, backup.display());
            }
        }
        apply(conn, migration)?;
        log::info!("Migrations: applied v{}", migration.version);
        applied += 1;
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem_db() -> Connection {
        Connection::open_in_memory().expect("in-memory db")
    }

    #[test]
    fn test_fresh_db_applies_all_migrations() {
        let conn = mem_db();
        let applied = run_migrations(&conn).expect("migrations should succeed");
        assert_eq!(applied, MIGRATIONS.len());
        assert_eq!(current_version(&conn).unwrap(), 2);

        conn.execute(
            "INSERT INTO calls (external_call_id, created_at, updated_at)
             VALUES ('conv_1', '2025-01-01', '2025-01-01')",
            [],
        )
        .expect("calls table");
        conn.execute(
            "INSERT INTO reports (call_id, created_at, updated_at) VALUES (1, '2025-01-01', '2025-01-01')",
            [],
        )
        .expect("reports table");
        conn.execute(
            "INSERT INTO sync_runs (kind, started_at, finished_at) VALUES ('poll', 'a', 'b')",
            [],
        )
        .expect("sync_runs table");
    }

    #[test]
    fn test_forward_compat_guard() {
        let conn = mem_db();
        ensure_schema_version_table(&conn).unwrap();
        conn.execute("INSERT INTO schema_version (version) VALUES (999)", [])
            .unwrap();

        let err = run_migrations(&conn).unwrap_err();
        assert!(
            err.contains("newer than this version"),
            "error should mention version mismatch: {}",
            err
        );
    }

    #[test]
    fn test_idempotency() {
        let conn = mem_db();
        assert_eq!(run_migrations(&conn).expect("first run"), 2);
        assert_eq!(run_migrations(&conn).expect("second run"), 0);
        assert_eq!(current_version(&conn).unwrap(), 2);
    }

    #[test]
    fn test_failed_migration_leaves_no_trace() {
        let conn = mem_db();
        ensure_schema_version_table(&conn).unwrap();
        let broken = Migration {
            version: 7,
            sql: "CREATE TABLE half_done (id INTEGER); SELECT missing_column FROM half_done;",
        };

        let err = apply(&conn, &broken).unwrap_err();
        assert!(err.contains("v7"), "{}", err);
        assert_eq!(current_version(&conn).unwrap(), 0);
        let leftover: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name = 'half_done'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(leftover, 0);
    }

    #[test]
    fn test_partial_upgrade_backs_up_first() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("upgrade.db");
        let conn = Connection::open(&db_path).expect("open db");

        // Simulate a database created before sync_runs existed
        ensure_schema_version_table(&conn).unwrap();
        conn.execute_batch(MIGRATIONS[0].sql).unwrap();
        conn.execute("INSERT INTO schema_version (version) VALUES (1)", [])
            .unwrap();

        let applied = run_migrations(&conn).expect("upgrade");
        assert_eq!(applied, 1);
        assert!(dir.path().join("upgrade.db.pre-migration.bak").exists());
    }

    #[test]
    fn test_fresh_file_skips_backup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("fresh.db");
        let conn = Connection::open(&db_path).expect("open db");

        run_migrations(&conn).expect("migrations");
        assert!(!dir.path().join("fresh.db.pre-migration.bak").exists());
    }
}
