use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::domain::customer::{CustomerContext, CustomerId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(pub String);

impl ActionId {
    pub fn generate() -> Self {
        Self(format!("call_{}", Uuid::new_v4().simple()))
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An action the reasoner asked for. The name is kept as received; it is only
/// resolved against the action catalog when the action is routed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestedAction {
    pub id: ActionId,
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl RequestedAction {
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self { id: ActionId::generate(), name: name.into(), arguments }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum ToolFailure {
    Validation(String),
    Collaborator(String),
    UserRejected(String),
}

impl ToolFailure {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Collaborator(_) => "collaborator_error",
            Self::UserRejected(_) => "user_rejected",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Validation(message)
            | Self::Collaborator(message)
            | Self::UserRejected(message) => message,
        }
    }
}

impl fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success { payload: Value },
    Failure { error: ToolFailure },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub action_id: ActionId,
    pub action_name: String,
    #[serde(flatten)]
    pub outcome: ToolOutcome,
}

impl ToolResult {
    pub fn success(action: &RequestedAction, payload: Value) -> Self {
        Self {
            action_id: action.id.clone(),
            action_name: action.name.clone(),
            outcome: ToolOutcome::Success { payload },
        }
    }

    pub fn failure(action: &RequestedAction, error: ToolFailure) -> Self {
        Self {
            action_id: action.id.clone(),
            action_name: action.name.clone(),
            outcome: ToolOutcome::Failure { error },
        }
    }

    pub fn ok(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Success { .. })
    }

    pub fn error(&self) -> Option<&ToolFailure> {
        match &self.outcome {
            ToolOutcome::Success { .. } => None,
            ToolOutcome::Failure { error } => Some(error),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Turn {
    User { text: String },
    Assistant { text: String, requested_actions: Vec<RequestedAction> },
    Tool(ToolResult),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    SuspendedForApproval,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::SuspendedForApproval => "suspended_for_approval",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "running" => Some(Self::Running),
            "suspended_for_approval" => Some(Self::SuspendedForApproval),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_turn_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Node the graph executes next when the session is driven.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphNode {
    FetchContext,
    Reason,
    Route,
    DispatchSafe,
    DispatchSensitive,
    Finalize,
    /// The turn has ended; the session waits for the next utterance.
    Idle,
}

/// The unit of persisted, resumable dialogue state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub session_id: SessionId,
    pub customer_id: CustomerId,
    pub history: Vec<Turn>,
    pub context: Option<CustomerContext>,
    /// Present if and only if `status` is `SuspendedForApproval`.
    pub pending_action: Option<RequestedAction>,
    /// Actions from the latest reasoning step still waiting to be routed.
    pub queued_actions: Vec<RequestedAction>,
    /// Action whose dispatch started but whose result is not yet recorded.
    pub in_flight_action: Option<RequestedAction>,
    pub status: SessionStatus,
    pub next_node: GraphNode,
    /// Checkpoint version, bumped on every save.
    pub version: u64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    pub fn new(session_id: SessionId, customer_id: CustomerId) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            customer_id,
            history: Vec::new(),
            context: None,
            pending_action: None,
            queued_actions: Vec::new(),
            in_flight_action: None,
            status: SessionStatus::Completed,
            next_node: GraphNode::Idle,
            version: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Reopens the session for a new utterance.
    pub fn begin_turn(&mut self, text: impl Into<String>) {
        self.history.push(Turn::User { text: text.into() });
        self.status = SessionStatus::Running;
        self.next_node = GraphNode::FetchContext;
        self.last_error = None;
    }

    pub fn push_tool_result(&mut self, result: ToolResult) {
        self.history.push(Turn::Tool(result));
    }

    pub fn is_suspended(&self) -> bool {
        self.status == SessionStatus::SuspendedForApproval
    }

    /// Text of the most recent assistant message, if any.
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.history.iter().rev().find_map(|turn| match turn {
            Turn::Assistant { text, .. } => Some(text.as_str()),
            _ => None,
        })
    }

    /// Most recent tool result recorded in the history.
    pub fn last_tool_result(&self) -> Option<&ToolResult> {
        self.history.iter().rev().find_map(|turn| match turn {
            Turn::Tool(result) => Some(result),
            _ => None,
        })
    }

    pub fn needs_context(&self) -> bool {
        self.context.as_ref().map_or(true, |context| context.degraded)
    }

    pub fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }
}
