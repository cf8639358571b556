//! ElevenLabs Conversational AI integration.
//!
//! Lists conversations, fetches conversation detail and agent metadata over
//! the public REST API. Retry with backoff lives here, not in the sync core.

pub mod client;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

pub use client::{ElevenLabsClient, ElevenLabsError};

pub const DEFAULT_BASE_URL: &str = "https://api.elevenlabs.io/v1";

/// ElevenLabs settings stored under `elevenlabs` in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElevenLabsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Upper bound on conversations returned by one list call.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_page_size() -> u32 {
    100
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for ElevenLabsConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            page_size: default_page_size(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl ElevenLabsConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            ..RetryPolicy::default()
        }
    }
}

/// Longest server-requested pause we honour.
const RETRY_AFTER_CAP: Duration = Duration::from_secs(30);
/// Upper bound (exclusive) on random spread added to computed backoff.
const JITTER_MS: u64 = 150;

/// Attempt budget and exponential backoff bounds for one API request.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    /// Rate limiting, request timeouts and server faults are worth another try.
    pub fn retries_status(status: StatusCode) -> bool {
        matches!(status.as_u16(), 408 | 429 | 500..=599)
    }

    /// Pause before the attempt following `failed_attempt` (1-based).
    ///
    /// A server hint wins, capped at [`RETRY_AFTER_CAP`]. Otherwise the
    /// initial backoff doubles per failed attempt up to `max_backoff_ms`, plus
    /// a little jitter.
    pub fn backoff(&self, failed_attempt: u32, server_hint: Option<Duration>) -> Duration {
        if let Some(hint) = server_hint {
            return hint.min(RETRY_AFTER_CAP);
        }
        let doublings = failed_attempt.saturating_sub(1).min(20);
        let computed = self
            .initial_backoff_ms
            .saturating_mul(1u64 << doublings)
            .min(self.max_backoff_ms);
        Duration::from_millis(computed + jitter_ms())
    }
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn jitter_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::from(d.subsec_micros()) % JITTER_MS)
}
