//! Conversation detail -> `CallRecord`.
//!
//! Pure transformation: no I/O, no clock. Missing optional parts of the
//! payload become nulls; only a missing conversation id is rejected.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDateTime};
use chrono_tz::Tz;
use serde_json::Value;

use crate::error::SyncError;
use crate::types::{
    AgentInfo, CallRecord, CollectedField, RemoteCallDetail, TranscriptTurn, FIELD_CASE_ID,
    FIELD_MODE, FIELD_PLACE, FIELD_TIME,
};

/// How to render timestamps and which collection entries to extract.
#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    pub timezone: Tz,
    /// (extracted field key, data-collection entry name)
    pub fields: Vec<(String, String)>,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            timezone: Tz::UTC,
            fields: vec![
                (FIELD_MODE.to_string(), "forma".to_string()),
                (FIELD_TIME.to_string(), "tiempo".to_string()),
                (FIELD_PLACE.to_string(), "lugar".to_string()),
                (FIELD_CASE_ID.to_string(), "id_extorsion".to_string()),
            ],
        }
    }
}

pub fn normalize(
    detail: &RemoteCallDetail,
    agent: Option<&AgentInfo>,
    options: &NormalizeOptions,
) -> Result<CallRecord, SyncError> {
    let external_call_id = detail
        .call_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| SyncError::MalformedInput("conversation detail has no id".to_string()))?
        .to_string();

    let extracted_fields = options
        .fields
        .iter()
        .map(|(key, source)| {
            let value = detail
                .collected(source)
                .map(|raw| CollectedField::from_value(raw).into_value())
                .and_then(value_to_text);
            (key.clone(), value)
        })
        .collect::<BTreeMap<_, _>>();

    let metadata = detail.metadata.clone().unwrap_or_default();
    let start_time = metadata
        .start_time_unix_secs
        .and_then(|secs| local_datetime(secs, options.timezone));
    let duration_seconds = metadata.call_duration_secs;
    let end_time = match (start_time, duration_seconds) {
        (Some(start), Some(secs)) => {
            Duration::try_seconds(secs).and_then(|d| start.checked_add_signed(d))
        }
        _ => None,
    };

    let agent_display_name = agent
        .and_then(|a| a.display_name.as_deref())
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string);

    Ok(CallRecord {
        external_call_id,
        agent_id: detail.agent_id.clone().filter(|id| !id.trim().is_empty()),
        agent_display_name,
        call_date: start_time.map(|dt| dt.date()),
        start_time,
        end_time,
        duration_seconds,
        transcript_text: render_transcript(&detail.transcript),
        extracted_fields,
    })
}

/// `[12.5s] AGENT: message`, one line per turn.
pub fn render_transcript(turns: &[TranscriptTurn]) -> String {
    turns
        .iter()
        .map(|turn| {
            format!(
                "[{:.1}s] {}: {}",
                turn.time_in_call_secs.unwrap_or(0.0),
                turn.role.as_deref().unwrap_or("unknown").to_uppercase(),
                turn.message.as_deref().unwrap_or("")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn local_datetime(unix_secs: i64, tz: Tz) -> Option<NaiveDateTime> {
    DateTime::from_timestamp(unix_secs, 0).map(|utc| utc.with_timezone(&tz).naive_local())
}

fn value_to_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}
