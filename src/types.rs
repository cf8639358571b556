//! Remote payload types, the canonical call record, and sync summaries.
//!
//! Remote types mirror the ElevenLabs Conversational AI JSON. Every field is
//! optional on the wire; the normalizer decides what is required.

use std::collections::{BTreeMap, HashMap};

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Canonical extracted-field keys every `CallRecord` carries.
pub const FIELD_MODE: &str = "mode";
pub const FIELD_TIME: &str = "time";
pub const FIELD_PLACE: &str = "place";
pub const FIELD_CASE_ID: &str = "case_id";

pub const REQUIRED_FIELDS: [&str; 4] = [FIELD_MODE, FIELD_TIME, FIELD_PLACE, FIELD_CASE_ID];

// =============================================================================
// Remote payloads
// =============================================================================

/// One entry of the conversation list, newest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteCallSummary {
    #[serde(default, rename = "conversation_id")]
    pub call_id: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
}

impl RemoteCallSummary {
    pub fn new(call_id: &str, agent_id: &str) -> Self {
        Self {
            call_id: Some(call_id.to_string()),
            agent_id: Some(agent_id.to_string()),
        }
    }

    /// Both identifiers, or `None` if either is missing or blank.
    pub fn ids(&self) -> Option<(&str, &str)> {
        let call_id = non_blank(self.call_id.as_deref())?;
        let agent_id = non_blank(self.agent_id.as_deref())?;
        Some((call_id, agent_id))
    }
}

/// Full conversation detail.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteCallDetail {
    #[serde(default, rename = "conversation_id")]
    pub call_id: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<CallMetadata>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub transcript: Vec<TranscriptTurn>,
    #[serde(default)]
    pub analysis: Option<CallAnalysis>,
}

impl RemoteCallDetail {
    /// Raw data-collection entry for `name`, if the payload has one.
    pub fn collected(&self, name: &str) -> Option<&Value> {
        self.analysis
            .as_ref()
            .and_then(|a| a.data_collection_results.get(name))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallMetadata {
    #[serde(default, deserialize_with = "lenient_secs")]
    pub start_time_unix_secs: Option<i64>,
    #[serde(default, deserialize_with = "lenient_secs")]
    pub call_duration_secs: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptTurn {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub time_in_call_secs: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallAnalysis {
    #[serde(default, deserialize_with = "null_as_default")]
    pub data_collection_results: HashMap<String, Value>,
}

/// Agent metadata. Only the display name is used downstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    #[serde(default)]
    pub agent_id: String,
    #[serde(default, rename = "name")]
    pub display_name: Option<String>,
}

/// A data-collection entry: either the raw value or a wrapper object
/// (`{"value": ..., "rationale": ...}`) around it.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectedField {
    Scalar(Value),
    Wrapped { value: Value },
}

impl CollectedField {
    pub fn from_value(raw: &Value) -> Self {
        match raw {
            Value::Object(map) => CollectedField::Wrapped {
                value: map.get("value").cloned().unwrap_or(Value::Null),
            },
            other => CollectedField::Scalar(other.clone()),
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            CollectedField::Scalar(v) | CollectedField::Wrapped { value: v } => v,
        }
    }
}

// =============================================================================
// Canonical record
// =============================================================================

/// One normalized call, built per sync attempt and consumed immediately.
///
/// `start_time` and `end_time` are wall-clock values in the configured sync
/// time zone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallRecord {
    pub external_call_id: String,
    pub agent_id: Option<String>,
    pub agent_display_name: Option<String>,
    pub call_date: Option<NaiveDate>,
    pub start_time: Option<NaiveDateTime>,
    pub end_time: Option<NaiveDateTime>,
    pub duration_seconds: Option<i64>,
    pub transcript_text: String,
    pub extracted_fields: BTreeMap<String, Option<String>>,
}

impl CallRecord {
    pub fn field(&self, key: &str) -> Option<&str> {
        self.extracted_fields.get(key).and_then(|v| v.as_deref())
    }
}

// =============================================================================
// Sync summaries
// =============================================================================

/// Totals for one `sync_all` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub listed: usize,
    pub synced_count: usize,
    pub error_count: usize,
    pub skipped_count: usize,
    pub cancelled: bool,
}

/// What a single synced item produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncedCall {
    pub external_call_id: String,
    pub call_id: i64,
    pub report_id: i64,
}

// =============================================================================
// Serde helpers
// =============================================================================

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accept integer or float seconds; fractional parts are truncated.
/// Floats outside the `i64` range become `None` rather than saturating.
fn lenient_secs<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Number>::deserialize(deserializer)?;
    Ok(raw.and_then(|n| {
        n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        })
    }))
}
