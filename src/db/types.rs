//! Shared type definitions for the database layer.

use serde::Serialize;
use thiserror::Error;

/// Errors specific to database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("Failed to encode extracted fields: {0}")]
    Json(#[from] serde_json::Error),
}

/// A row from the `agents` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbAgent {
    pub id: i64,
    pub external_agent_id: String,
    pub display_name: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A row from the `calls` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbCall {
    pub id: i64,
    pub external_call_id: String,
    pub external_agent_id: Option<String>,
    /// `YYYY-MM-DD` in the sync time zone.
    pub call_date: Option<String>,
    /// `YYYY-MM-DD HH:MM:SS` in the sync time zone.
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub duration_seconds: Option<i64>,
    pub transcript: String,
    pub created_at: String,
    pub updated_at: String,
}

/// A row from the `reports` table. `id` is the report folio.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbReport {
    pub id: i64,
    pub call_id: i64,
    pub case_id: Option<String>,
    pub mode: Option<String>,
    pub time_of_incident: Option<String>,
    pub place: Option<String>,
    /// Every extracted field, including ones without a dedicated column.
    pub fields_json: String,
    pub updated_at: String,
}

/// A row from the `sync_runs` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbSyncRun {
    pub id: i64,
    pub kind: String,
    pub started_at: String,
    pub finished_at: String,
    pub change_detected: bool,
    pub newest_call_id: Option<String>,
    pub listed: i64,
    pub synced_count: i64,
    pub error_count: i64,
    pub skipped_count: i64,
    pub error_message: Option<String>,
}

/// Input for `CallDb::record_sync_run`.
#[derive(Debug, Clone, Default)]
pub struct NewSyncRun {
    /// `poll` for loop cycles, `manual` for forced syncs.
    pub kind: String,
    pub started_at: String,
    pub finished_at: String,
    pub change_detected: bool,
    pub newest_call_id: Option<String>,
    pub listed: usize,
    pub synced_count: usize,
    pub error_count: usize,
    pub skipped_count: usize,
    pub error_message: Option<String>,
}
