use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::conversation::{ConversationState, SessionId, SessionStatus};
use crate::domain::customer::CustomerId;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CheckpointError {
    #[error("stale checkpoint for session {session_id}: version {version} is already superseded")]
    StaleWrite { session_id: String, version: u64 },
    #[error("checkpoint encoding error: {0}")]
    Encoding(String),
    #[error("checkpoint backend error: {0}")]
    Backend(String),
}

/// Listing entry for administrative session views.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub customer_id: CustomerId,
    pub status: SessionStatus,
    pub pending_action: Option<String>,
    pub turns: usize,
    pub updated_at: DateTime<Utc>,
}

impl From<&ConversationState> for SessionSummary {
    fn from(state: &ConversationState) -> Self {
        Self {
            session_id: state.session_id.clone(),
            customer_id: state.customer_id.clone(),
            status: state.status,
            pending_action: state.pending_action.as_ref().map(|action| action.name.clone()),
            turns: state.history.len(),
            updated_at: state.updated_at,
        }
    }
}

/// Durable per-session snapshots of the dialogue graph.
///
/// `save` must refuse a state whose `version` is not strictly greater than the
/// stored one, so a writer holding an outdated snapshot cannot clobber progress.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, state: &ConversationState) -> Result<(), CheckpointError>;

    async fn load(&self, session_id: &SessionId)
        -> Result<Option<ConversationState>, CheckpointError>;

    /// Returns whether a checkpoint existed.
    async fn delete(&self, session_id: &SessionId) -> Result<bool, CheckpointError>;

    /// Most recently updated first.
    async fn list(&self) -> Result<Vec<SessionSummary>, CheckpointError>;
}
