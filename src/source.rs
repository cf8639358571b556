//! Remote source boundary consumed by the synchronizer and poll loop.
//!
//! Implementations do I/O only: no caching, no business rules. Retries, auth
//! and pagination stay inside the implementation.

use async_trait::async_trait;

use crate::error::SyncError;
use crate::types::{AgentInfo, RemoteCallDetail, RemoteCallSummary};

#[async_trait]
pub trait CallSource: Send + Sync {
    /// Recent call summaries, newest first. Empty when there is nothing to list.
    async fn list_recent_calls(&self) -> Result<Vec<RemoteCallSummary>, SyncError>;

    /// Full detail for one call; `SyncError::NotFound` if the id no longer resolves.
    async fn fetch_call_detail(&self, call_id: &str) -> Result<RemoteCallDetail, SyncError>;

    /// Agent metadata; `SyncError::NotFound` if the agent no longer exists.
    async fn fetch_agent(&self, agent_id: &str) -> Result<AgentInfo, SyncError>;
}
