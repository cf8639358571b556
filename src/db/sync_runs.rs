//! Persisted history of poll cycles and forced syncs.

use rusqlite::params;

use super::{CallDb, DbError, DbSyncRun, NewSyncRun};

impl CallDb {
    pub fn record_sync_run(&self, run: &NewSyncRun) -> Result<i64, DbError> {
        self.conn.execute(
            "INSERT INTO sync_runs
                (kind, started_at, finished_at, change_detected, newest_call_id,
                 listed, synced_count, error_count, skipped_count, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                run.kind,
                run.started_at,
                run.finished_at,
                run.change_detected,
                run.newest_call_id,
                run.listed as i64,
                run.synced_count as i64,
                run.error_count as i64,
                run.skipped_count as i64,
                run.error_message,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Most recent runs first.
    pub fn recent_sync_runs(&self, limit: usize) -> Result<Vec<DbSyncRun>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, kind, started_at, finished_at, change_detected, newest_call_id,
                    listed, synced_count, error_count, skipped_count, error_message
             FROM sync_runs
             ORDER BY id DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(DbSyncRun {
                id: row.get(0)?,
                kind: row.get(1)?,
                started_at: row.get(2)?,
                finished_at: row.get(3)?,
                change_detected: row.get(4)?,
                newest_call_id: row.get(5)?,
                listed: row.get(6)?,
                synced_count: row.get(7)?,
                error_count: row.get(8)?,
                skipped_count: row.get(9)?,
                error_message: row.get(10)?,
            })
        })?;

        let mut runs = Vec::new();
        for row in rows {
            runs.push(row?);
        }
        Ok(runs)
    }
}
