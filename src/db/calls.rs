//! Agent, call and report upserts.
//!
//! Conflict policy:
//! - agents: display name only moves from null/old to a newer non-null value
//! - calls: transcript and duration follow the latest sync; start time, call
//!   date and agent linkage keep the first non-null value. End time is
//!   recomputed from the kept start so `end - start == duration` holds
//! - reports: one per call, every extracted field replaced on each upsert

use std::collections::BTreeMap;

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::{CallDb, DbAgent, DbCall, DbError, DbReport};
use crate::types::{CallRecord, FIELD_CASE_ID, FIELD_MODE, FIELD_PLACE, FIELD_TIME};

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

impl CallDb {
    // =========================================================================
    // Agents
    // =========================================================================

    /// Insert or update an agent, returning its internal id.
    ///
    /// A null `display_name` never clears a stored one.
    pub fn upsert_agent(
        &self,
        external_agent_id: &str,
        display_name: Option<&str>,
    ) -> Result<i64, DbError> {
        let now = Utc::now().to_rfc3339();
        let id = self.conn.query_row(
            "INSERT INTO agents (external_agent_id, display_name, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(external_agent_id) DO UPDATE SET
                display_name = COALESCE(excluded.display_name, agents.display_name),
                updated_at = excluded.updated_at
             RETURNING id",
            params![external_agent_id, display_name, now],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn get_agent(&self, external_agent_id: &str) -> Result<Option<DbAgent>, DbError> {
        let agent = self
            .conn
            .query_row(
                "SELECT id, external_agent_id, display_name, created_at, updated_at
                 FROM agents WHERE external_agent_id = ?1",
                params![external_agent_id],
                |row| {
                    Ok(DbAgent {
                        id: row.get(0)?,
                        external_agent_id: row.get(1)?,
                        display_name: row.get(2)?,
                        created_at: row.get(3)?,
                        updated_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(agent)
    }

    // =========================================================================
    // Calls
    // =========================================================================

    /// Insert or update a call keyed on its external id.
    ///
    /// Returns the internal id on both insert and update so the report can be
    /// linked either way.
    pub fn upsert_call(&self, record: &CallRecord) -> Result<i64, DbError> {
        let now = Utc::now().to_rfc3339();
        let id = self.conn.query_row(
            "INSERT INTO calls
                (external_call_id, external_agent_id, call_date, start_time, end_time,
                 duration_seconds, transcript, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
             ON CONFLICT(external_call_id) DO UPDATE SET
                transcript = excluded.transcript,
                end_time = CASE
                    WHEN calls.start_time IS NOT NULL AND excluded.duration_seconds IS NOT NULL
                        THEN datetime(calls.start_time, excluded.duration_seconds || ' seconds')
                    ELSE excluded.end_time
                END,
                duration_seconds = excluded.duration_seconds,
                external_agent_id = COALESCE(calls.external_agent_id, excluded.external_agent_id),
                call_date = COALESCE(calls.call_date, excluded.call_date),
                start_time = COALESCE(calls.start_time, excluded.start_time),
                updated_at = excluded.updated_at
             RETURNING id",
            params![
                record.external_call_id,
                record.agent_id,
                record.call_date.map(|d| d.format(DATE_FORMAT).to_string()),
                record.start_time.map(|t| t.format(DATETIME_FORMAT).to_string()),
                record.end_time.map(|t| t.format(DATETIME_FORMAT).to_string()),
                record.duration_seconds,
                record.transcript_text,
                now,
            ],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn get_call_by_external_id(
        &self,
        external_call_id: &str,
    ) -> Result<Option<DbCall>, DbError> {
        let call = self
            .conn
            .query_row(
                "SELECT id, external_call_id, external_agent_id, call_date, start_time,
                        end_time, duration_seconds, transcript, created_at, updated_at
                 FROM calls WHERE external_call_id = ?1",
                params![external_call_id],
                map_call_row,
            )
            .optional()?;
        Ok(call)
    }

    pub fn count_calls(&self) -> Result<i64, DbError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM calls", [], |row| row.get(0))?)
    }

    // =========================================================================
    // Reports
    // =========================================================================

    /// Insert or replace the report for `call_id`, returning the report id.
    pub fn upsert_report(
        &self,
        call_id: i64,
        fields: &BTreeMap<String, Option<String>>,
    ) -> Result<i64, DbError> {
        let field = |key: &str| fields.get(key).cloned().flatten();
        let fields_json = serde_json::to_string(fields)?;
        let now = Utc::now().to_rfc3339();

        let id = self.conn.query_row(
            "INSERT INTO reports
                (call_id, case_id, mode, time_of_incident, place, fields_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
             ON CONFLICT(call_id) DO UPDATE SET
                case_id = excluded.case_id,
                mode = excluded.mode,
                time_of_incident = excluded.time_of_incident,
                place = excluded.place,
                fields_json = excluded.fields_json,
                updated_at = excluded.updated_at
             RETURNING id",
            params![
                call_id,
                field(FIELD_CASE_ID),
                field(FIELD_MODE),
                field(FIELD_TIME),
                field(FIELD_PLACE),
                fields_json,
                now,
            ],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn get_report_for_call(&self, call_id: i64) -> Result<Option<DbReport>, DbError> {
        let report = self
            .conn
            .query_row(
                "SELECT id, call_id, case_id, mode, time_of_incident, place, fields_json, updated_at
                 FROM reports WHERE call_id = ?1",
                params![call_id],
                |row| {
                    Ok(DbReport {
                        id: row.get(0)?,
                        call_id: row.get(1)?,
                        case_id: row.get(2)?,
                        mode: row.get(3)?,
                        time_of_incident: row.get(4)?,
                        place: row.get(5)?,
                        fields_json: row.get(6)?,
                        updated_at: row.get(7)?,
                    })
                },
            )
            .optional()?;
        Ok(report)
    }
}

fn map_call_row(row: &Row<'_>) -> rusqlite::Result<DbCall> {
    Ok(DbCall {
        id: row.get(0)?,
        external_call_id: row.get(1)?,
        external_agent_id: row.get(2)?,
        call_date: row.get(3)?,
        start_time: row.get(4)?,
        end_time: row.get(5)?,
        duration_seconds: row.get(6)?,
        transcript: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_db;
    use chrono::{Duration, NaiveDate};

    fn record(external_call_id: &str) -> CallRecord {
        let start = NaiveDate::from_ymd_opt(2025, 3, 4)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        let mut extracted_fields = BTreeMap::new();
        extracted_fields.insert(FIELD_MODE.to_string(), Some("llamada".to_string()));
        extracted_fields.insert(FIELD_TIME.to_string(), Some("ayer".to_string()));
        extracted_fields.insert(FIELD_PLACE.to_string(), None);
        extracted_fields.insert(FIELD_CASE_ID.to_string(), Some("EXT-1".to_string()));
        CallRecord {
            external_call_id: external_call_id.to_string(),
            agent_id: Some("agent_1".to_string()),
            agent_display_name: None,
            call_date: Some(start.date()),
            start_time: Some(start),
            end_time: Some(start + Duration::seconds(90)),
            duration_seconds: Some(90),
            transcript_text: "[0.0s] AGENT: hola".to_string(),
            extracted_fields,
        }
    }

    #[test]
    fn test_display_name_non_regression() {
        let db = test_db();

        let first = db.upsert_agent("agent_1", None).unwrap();
        assert_eq!(db.get_agent("agent_1").unwrap().unwrap().display_name, None);

        let second = db.upsert_agent("agent_1", Some("Ana")).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            db.get_agent("agent_1").unwrap().unwrap().display_name.as_deref(),
            Some("Ana")
        );

        db.upsert_agent("agent_1", None).unwrap();
        assert_eq!(
            db.get_agent("agent_1").unwrap().unwrap().display_name.as_deref(),
            Some("Ana")
        );

        db.upsert_agent("agent_1", Some("Ana María")).unwrap();
        assert_eq!(
            db.get_agent("agent_1").unwrap().unwrap().display_name.as_deref(),
            Some("Ana María")
        );
    }

    #[test]
    fn test_upsert_call_returns_same_id_on_update() {
        let db = test_db();
        let rec = record("conv_1");

        let inserted = db.upsert_call(&rec).unwrap();
        let updated = db.upsert_call(&rec).unwrap();

        assert_eq!(inserted, updated);
        assert_eq!(db.count_calls().unwrap(), 1);
    }

    #[test]
    fn test_call_update_keeps_start_and_agent() {
        let db = test_db();
        let original = record("conv_1");
        db.upsert_call(&original).unwrap();

        let mut changed = original.clone();
        changed.agent_id = Some("agent_2".to_string());
        changed.start_time = changed.start_time.map(|t| t + Duration::hours(1));
        changed.call_date = NaiveDate::from_ymd_opt(2025, 3, 5);
        changed.end_time = changed.start_time.map(|t| t + Duration::seconds(120));
        changed.duration_seconds = Some(120);
        changed.transcript_text = "[0.0s] AGENT: hola\n[2.0s] USER: buenas".to_string();
        db.upsert_call(&changed).unwrap();

        let stored = db.get_call_by_external_id("conv_1").unwrap().unwrap();
        assert_eq!(stored.external_agent_id.as_deref(), Some("agent_1"));
        assert_eq!(stored.start_time.as_deref(), Some("2025-03-04 10:00:00"));
        assert_eq!(stored.call_date.as_deref(), Some("2025-03-04"));
        // End follows the kept start, not the moved one
        assert_eq!(stored.end_time.as_deref(), Some("2025-03-04 10:02:00"));
        assert_eq!(stored.duration_seconds, Some(120));
        assert!(stored.transcript.contains("USER: buenas"));
    }

    #[test]
    fn test_call_start_filled_when_previously_unknown() {
        let db = test_db();
        let mut partial = record("conv_1");
        partial.start_time = None;
        partial.call_date = None;
        partial.end_time = None;
        db.upsert_call(&partial).unwrap();

        db.upsert_call(&record("conv_1")).unwrap();
        let stored = db.get_call_by_external_id("conv_1").unwrap().unwrap();
        assert_eq!(stored.start_time.as_deref(), Some("2025-03-04 10:00:00"));
        assert_eq!(stored.end_time.as_deref(), Some("2025-03-04 10:01:30"));
    }

    #[test]
    fn test_report_upsert_replaces_all_fields() {
        let db = test_db();
        let rec = record("conv_1");
        let call_id = db.upsert_call(&rec).unwrap();

        let first = db.upsert_report(call_id, &rec.extracted_fields).unwrap();
        let stored = db.get_report_for_call(call_id).unwrap().unwrap();
        assert_eq!(stored.mode.as_deref(), Some("llamada"));
        assert_eq!(stored.case_id.as_deref(), Some("EXT-1"));
        assert_eq!(stored.place, None);

        let mut next = rec.extracted_fields.clone();
        next.insert(FIELD_MODE.to_string(), None);
        next.insert(FIELD_PLACE.to_string(), Some("Centro".to_string()));
        let second = db.upsert_report(call_id, &next).unwrap();

        assert_eq!(first, second);
        let stored = db.get_report_for_call(call_id).unwrap().unwrap();
        assert_eq!(stored.mode, None);
        assert_eq!(stored.place.as_deref(), Some("Centro"));
        assert_eq!(stored.time_of_incident.as_deref(), Some("ayer"));

        let json: BTreeMap<String, Option<String>> =
            serde_json::from_str(&stored.fields_json).unwrap();
        assert_eq!(json, next);
    }

}
