use async_trait::async_trait;
use sqlx::Row;

use shopkeep_core::checkpoint::{CheckpointError, CheckpointStore, SessionSummary};
use shopkeep_core::domain::conversation::{ConversationState, SessionId, SessionStatus};
use shopkeep_core::domain::customer::CustomerId;

use super::{parse_timestamp, timestamp, RepositoryError};
use crate::DbPool;

/// Conversation checkpoints stored as one JSON document per session, with the
/// listing columns denormalized next to it.
pub struct SqlCheckpointStore {
    pool: DbPool,
}

impl SqlCheckpointStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckpointStore for SqlCheckpointStore {
    async fn save(&self, state: &ConversationState) -> Result<(), CheckpointError> {
        let state_json = serde_json::to_string(state)
            .map_err(|error| CheckpointError::Encoding(error.to_string()))?;
        let version = i64::try_from(state.version).map_err(|_| {
            CheckpointError::Encoding(format!("version {} does not fit in INTEGER", state.version))
        })?;

        let result = sqlx::query(
            "INSERT INTO conversation_checkpoints
                (session_id, customer_id, status, version, pending_action, turn_count,
                 state_json, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(session_id) DO UPDATE SET
                 customer_id = excluded.customer_id,
                 status = excluded.status,
                 version = excluded.version,
                 pending_action = excluded.pending_action,
                 turn_count = excluded.turn_count,
                 state_json = excluded.state_json,
                 updated_at = excluded.updated_at
             WHERE conversation_checkpoints.version < excluded.version",
        )
        .bind(&state.session_id.0)
        .bind(&state.customer_id.0)
        .bind(state.status.as_str())
        .bind(version)
        .bind(state.pending_action.as_ref().map(|action| action.name.clone()))
        .bind(state.history.len() as i64)
        .bind(state_json)
        .bind(timestamp(state.created_at))
        .bind(timestamp(state.updated_at))
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        if result.rows_affected() == 0 {
            return Err(CheckpointError::StaleWrite {
                session_id: state.session_id.0.clone(),
                version: state.version,
            });
        }
        Ok(())
    }

    async fn load(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<ConversationState>, CheckpointError> {
        let state_json: Option<String> = sqlx::query_scalar(
            "SELECT state_json FROM conversation_checkpoints WHERE session_id = ?",
        )
        .bind(&session_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        state_json
            .map(|json| {
                serde_json::from_str(&json).map_err(|error| {
                    CheckpointError::Encoding(format!(
                        "checkpoint for session {session_id} is unreadable: {error}"
                    ))
                })
            })
            .transpose()
    }

    async fn delete(&self, session_id: &SessionId) -> Result<bool, CheckpointError> {
        let result = sqlx::query("DELETE FROM conversation_checkpoints WHERE session_id = ?")
            .bind(&session_id.0)
            .execute(&self.pool)
            .await
            .map_err(RepositoryError::from)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> Result<Vec<SessionSummary>, CheckpointError> {
        let rows = sqlx::query(
            "SELECT session_id, customer_id, status, pending_action, turn_count, updated_at
             FROM conversation_checkpoints
             ORDER BY updated_at DESC, session_id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        let decode = |error: sqlx::Error| RepositoryError::Decode(error.to_string());
        let mut summaries = Vec::with_capacity(rows.len());
        for row in &rows {
            let status: String = row.try_get("status").map_err(decode)?;
            let updated_at: String = row.try_get("updated_at").map_err(decode)?;
            let turns: i64 = row.try_get("turn_count").map_err(decode)?;
            summaries.push(SessionSummary {
                session_id: SessionId(row.try_get("session_id").map_err(decode)?),
                customer_id: CustomerId(row.try_get("customer_id").map_err(decode)?),
                status: SessionStatus::parse(&status).ok_or_else(|| {
                    RepositoryError::Decode(format!("unknown session status `{status}`"))
                })?,
                pending_action: row.try_get("pending_action").map_err(decode)?,
                turns: usize::try_from(turns).unwrap_or_default(),
                updated_at: parse_timestamp("updated_at", &updated_at)?,
            });
        }
        Ok(summaries)
    }
}
