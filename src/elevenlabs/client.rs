//! REST client for the ElevenLabs Conversational AI API.
//!
//! Uses reqwest with the `xi-api-key` header. Endpoints:
//! - `GET {base}/convai/conversations`
//! - `GET {base}/convai/conversations/{conversation_id}`
//! - `GET {base}/convai/agents/{agent_id}`

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

use super::{retry_after, ElevenLabsConfig, RetryPolicy};
use crate::error::SyncError;
use crate::source::CallSource;
use crate::types::{AgentInfo, RemoteCallDetail, RemoteCallSummary};

#[derive(Debug, thiserror::Error)]
pub enum ElevenLabsError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid base URL: {0}")]
    InvalidUrl(String),
    #[error("API key not configured (set elevenlabs.apiKey or ELEVENLABS_API_KEY)")]
    MissingApiKey,
}

impl From<ElevenLabsError> for SyncError {
    fn from(err: ElevenLabsError) -> Self {
        match err {
            ElevenLabsError::NotFound(what) => SyncError::NotFound(what),
            other => SyncError::Transport(other.to_string()),
        }
    }
}

#[derive(Deserialize)]
struct ConversationsPage {
    #[serde(default)]
    conversations: Vec<RemoteCallSummary>,
}

pub struct ElevenLabsClient {
    client: reqwest::Client,
    base_url: Url,
    api_key: String,
    retry: RetryPolicy,
    page_size: u32,
}

impl ElevenLabsClient {
    pub fn new(config: &ElevenLabsConfig) -> Result<Self, ElevenLabsError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ElevenLabsError::MissingApiKey)?;

        let base_url = Url::parse(config.base_url.trim_end_matches('/'))
            .map_err(|e| ElevenLabsError::InvalidUrl(format!("{}: {}", config.base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ElevenLabsError::InvalidUrl(config.base_url.clone()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.request_timeout_secs.min(10)))
            .build()?;

        Ok(Self {
            client,
            base_url,
            api_key,
            retry: config.retry_policy(),
            page_size: config.page_size.max(1),
        })
    }

    /// Build `{base}/seg/seg/...`, percent-encoding each segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ElevenLabsError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ElevenLabsError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Send `request`, retrying transient failures per the client's policy.
    ///
    /// Requests whose body cannot be cloned are sent exactly once.
    async fn send_with_retry(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, ElevenLabsError> {
        let budget = self.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let Some(this_try) = request.try_clone() else {
                return Ok(request.send().await?);
            };
            let can_retry = attempt < budget;

            let pause = match this_try.send().await {
                Ok(resp) if can_retry && RetryPolicy::retries_status(resp.status()) => {
                    let pause = self.retry.backoff(attempt, retry_after(resp.headers()));
                    log::warn!(
                        "ElevenLabs: HTTP {} on attempt {}/{}, retrying in {:?}",
                        resp.status(),
                        attempt,
                        budget,
                        pause
                    );
                    pause
                }
                Ok(resp) => return Ok(resp),
                Err(e) if can_retry && (e.is_timeout() || e.is_connect()) => {
                    let pause = self.retry.backoff(attempt, None);
                    log::warn!(
                        "ElevenLabs: {} on attempt {}/{}, retrying in {:?}",
                        e,
                        attempt,
                        budget,
                        pause
                    );
                    pause
                }
                Err(e) => return Err(e.into()),
            };
            tokio::time::sleep(pause).await;
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        what: &str,
    ) -> Result<T, ElevenLabsError> {
        let request = self.client.get(url).header("xi-api-key", &self.api_key);
        let resp = self.send_with_retry(request).await?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ElevenLabsError::NotFound(what.to_string()));
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ElevenLabsError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body = resp.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// List the most recent conversations, newest first.
    pub async fn list_conversations(
        &self,
        page_size: u32,
    ) -> Result<Vec<RemoteCallSummary>, ElevenLabsError> {
        let mut url = self.endpoint(&["convai", "conversations"])?;
        url.query_pairs_mut()
            .append_pair("page_size", &page_size.to_string());
        let page: ConversationsPage = self.get_json(url, "conversation list").await?;
        Ok(page.conversations)
    }

    pub async fn get_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<RemoteCallDetail, ElevenLabsError> {
        let url = self.endpoint(&["convai", "conversations", conversation_id])?;
        self.get_json(url, &format!("conversation {}", conversation_id))
            .await
    }

    pub async fn get_agent(&self, agent_id: &str) -> Result<AgentInfo, ElevenLabsError> {
        let url = self.endpoint(&["convai", "agents", agent_id])?;
        let mut agent: AgentInfo = self.get_json(url, &format!("agent {}", agent_id)).await?;
        if agent.agent_id.is_empty() {
            agent.agent_id = agent_id.to_string();
        }
        Ok(agent)
    }

    /// Verify credentials with a one-item list call. Returns the item count.
    pub async fn test_connection(&self) -> Result<usize, ElevenLabsError> {
        Ok(self.list_conversations(1).await?.len())
    }
}

#[async_trait]
impl CallSource for ElevenLabsClient {
    async fn list_recent_calls(&self) -> Result<Vec<RemoteCallSummary>, SyncError> {
        Ok(self.list_conversations(self.page_size).await?)
    }

    async fn fetch_call_detail(&self, call_id: &str) -> Result<RemoteCallDetail, SyncError> {
        Ok(self.get_conversation(call_id).await?)
    }

    async fn fetch_agent(&self, agent_id: &str) -> Result<AgentInfo, SyncError> {
        Ok(self.get_agent(agent_id).await?)
    }
}
