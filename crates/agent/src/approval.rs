use serde::{Deserialize, Serialize};

use shopkeep_core::domain::conversation::{
    ConversationState, GraphNode, RequestedAction, SessionId, SessionStatus, ToolFailure,
    ToolResult,
};
use shopkeep_core::errors::DialogueError;

pub const DEFAULT_REJECTION_REASON: &str = "Hành động bị từ chối bởi người dùng.";

/// External decision on the action a suspended session is waiting on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub session_id: SessionId,
    pub approved: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

impl ApprovalRequest {
    pub fn approve(session_id: SessionId) -> Self {
        Self { session_id, approved: true, reason: None }
    }

    pub fn reject(session_id: SessionId, reason: Option<String>) -> Self {
        Self { session_id, approved: false, reason }
    }

    pub fn decision(&self) -> ApprovalDecision {
        if self.approved {
            return ApprovalDecision::Approve;
        }
        let reason = self
            .reason
            .as_deref()
            .map(str::trim)
            .filter(|reason| !reason.is_empty())
            .unwrap_or(DEFAULT_REJECTION_REASON)
            .to_string();
        ApprovalDecision::Reject { reason }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approve,
    Reject { reason: String },
}

fn ensure_suspended(state: &ConversationState) -> Result<(), DialogueError> {
    if state.status == SessionStatus::SuspendedForApproval && state.pending_action.is_some() {
        Ok(())
    } else {
        Err(DialogueError::NoPendingApproval { session_id: state.session_id.0.clone() })
    }
}

/// Moves the pending action into dispatch. Nothing is executed here; the
/// runtime dispatches the returned action from `DispatchSensitive`.
pub fn grant(state: &mut ConversationState) -> Result<RequestedAction, DialogueError> {
    ensure_suspended(state)?;
    let action = state
        .pending_action
        .take()
        .ok_or_else(|| DialogueError::NoPendingApproval {
            session_id: state.session_id.0.clone(),
        })?;

    state.in_flight_action = Some(action.clone());
    state.status = SessionStatus::Running;
    state.next_node = GraphNode::DispatchSensitive;
    Ok(action)
}

/// Records a `UserRejected` result for the pending action and for every action
/// still queued behind it, then hands control back to the reasoner. No
/// collaborator is involved.
pub fn reject(
    state: &mut ConversationState,
    reason: &str,
) -> Result<Vec<RequestedAction>, DialogueError> {
    ensure_suspended(state)?;
    let mut skipped: Vec<RequestedAction> = state.pending_action.take().into_iter().collect();
    skipped.append(&mut state.queued_actions);

    for action in &skipped {
        state.push_tool_result(ToolResult::failure(
            action,
            ToolFailure::UserRejected(reason.to_string()),
        ));
    }

    state.status = SessionStatus::Running;
    state.next_node = GraphNode::Reason;
    Ok(skipped)
}
