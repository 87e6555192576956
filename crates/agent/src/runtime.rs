use std::sync::Arc;

use tracing::{error, info, warn};
use uuid::Uuid;

use shopkeep_core::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink, TracingAuditSink};
use shopkeep_core::checkpoint::{CheckpointStore, SessionSummary};
use shopkeep_core::config::{AgentConfig, AppConfig};
use shopkeep_core::domain::conversation::{
    ConversationState, GraphNode, RequestedAction, SessionId, SessionStatus, ToolFailure,
    ToolResult, Turn,
};
use shopkeep_core::domain::customer::{CustomerContext, CustomerId, CustomerProfile, LoyaltyTier};
use shopkeep_core::errors::DialogueError;

use crate::approval::{self, ApprovalDecision, ApprovalRequest};
use crate::conversation::TurnResult;
use crate::guardrails::{GuardrailDecision, GuardrailPolicy};
use crate::llm::{LlmClient, ReasonerAdapter, ReasonerOutput, ReasonerSettings};
use crate::locks::SessionLocks;
use crate::tools::ToolDispatcher;

const INTERRUPTED_DISPATCH: &str = "outcome unknown after interruption";
const ABANDONED_ACTION: &str = "not executed: the previous turn was interrupted";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub max_graph_steps: u32,
    pub default_customer_id: CustomerId,
    pub guardrails: GuardrailPolicy,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            max_graph_steps: 25,
            default_customer_id: CustomerId("CUST001".to_string()),
            guardrails: GuardrailPolicy,
        }
    }
}

impl RuntimeSettings {
    pub fn from_config(agent: &AgentConfig) -> Self {
        Self {
            max_graph_steps: agent.max_graph_steps.max(1),
            default_customer_id: CustomerId(agent.default_customer_id.clone()),
            guardrails: GuardrailPolicy,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnRequest {
    pub session_id: Option<SessionId>,
    pub customer_id: Option<CustomerId>,
    pub message: String,
}

impl TurnRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self { session_id: None, customer_id: None, message: message.into() }
    }

    pub fn in_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn for_customer(mut self, customer_id: CustomerId) -> Self {
        self.customer_id = Some(customer_id);
        self
    }
}

/// Drives the approval-gated dialogue graph.
///
/// Every node transition is checkpointed before the next node runs, and a
/// suspension for approval is nothing more than a saved state: the call
/// returns and `resolve` picks the session up again, in this process or in
/// another one. Calls for the same session are serialized; calls for
/// different sessions never wait on each other.
pub struct AgentRuntime {
    reasoner: ReasonerAdapter,
    dispatcher: ToolDispatcher,
    checkpoints: Arc<dyn CheckpointStore>,
    locks: SessionLocks,
    audit: Arc<dyn AuditSink>,
    settings: RuntimeSettings,
}

impl AgentRuntime {
    pub fn new(
        reasoner: ReasonerAdapter,
        dispatcher: ToolDispatcher,
        checkpoints: Arc<dyn CheckpointStore>,
        settings: RuntimeSettings,
    ) -> Self {
        Self {
            reasoner,
            dispatcher,
            checkpoints,
            locks: SessionLocks::new(),
            audit: Arc::new(TracingAuditSink),
            settings,
        }
    }

    /// Runtime wired with the reasoner and graph limits of `config`.
    pub fn from_config(
        config: &AppConfig,
        llm: Arc<dyn LlmClient>,
        dispatcher: ToolDispatcher,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        let reasoner =
            ReasonerAdapter::new(llm, ReasonerSettings::from_config(&config.agent, &config.llm));
        Self::new(reasoner, dispatcher, checkpoints, RuntimeSettings::from_config(&config.agent))
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    /// Runs one user utterance through the graph until it completes, fails or
    /// suspends for approval.
    pub async fn handle_turn(&self, request: TurnRequest) -> TurnResult {
        let session_id = request.session_id.unwrap_or_else(SessionId::generate);
        let audit = self.audit_context(&session_id, "customer");
        let _guard = self.locks.acquire(&session_id).await;

        let existing = match self.checkpoints.load(&session_id).await {
            Ok(existing) => existing,
            Err(error) => return self.refuse(session_id, error.into(), None, &audit),
        };

        let mut state = match existing {
            Some(state) => {
                if request.customer_id.as_ref().is_some_and(|id| *id != state.customer_id) {
                    let error =
                        DialogueError::CustomerMismatch { session_id: session_id.0.clone() };
                    return self.refuse(session_id, error, None, &audit);
                }
                if state.is_suspended() {
                    let error =
                        DialogueError::AwaitingApproval { session_id: session_id.0.clone() };
                    return self.refuse(session_id, error, Some(&state), &audit);
                }
                state
            }
            None => ConversationState::new(
                session_id.clone(),
                request.customer_id.unwrap_or_else(|| self.settings.default_customer_id.clone()),
            ),
        };

        if state.status == SessionStatus::Running {
            abandon_interrupted_turn(&mut state);
        }
        state.begin_turn(request.message);

        info!(
            event_name = "dialogue.turn.started",
            correlation_id = %audit.correlation_id,
            session_id = %state.session_id,
            customer_id = %state.customer_id,
            "turn started"
        );
        self.audit.emit(
            audit
                .event("dialogue.turn.started", AuditCategory::Dialogue, AuditOutcome::Success)
                .with_metadata("customer_id", state.customer_id.0.clone()),
        );

        if let Err(error) = self.checkpoint(&mut state).await {
            return self.fail_turn(state, error, &audit).await;
        }
        self.drive(state, &audit).await
    }

    /// Applies an approve or reject decision to a suspended session and drives
    /// the graph on from the suspension point.
    pub async fn resolve(&self, request: ApprovalRequest) -> TurnResult {
        let session_id = request.session_id.clone();
        let audit = self.audit_context(&session_id, "approver");
        let _guard = self.locks.acquire(&session_id).await;

        let mut state = match self.checkpoints.load(&session_id).await {
            Ok(Some(state)) => state,
            Ok(None) => {
                let error = DialogueError::NoPendingApproval { session_id: session_id.0.clone() };
                return self.refuse(session_id, error, None, &audit);
            }
            Err(error) => return self.refuse(session_id, error.into(), None, &audit),
        };

        match request.decision() {
            ApprovalDecision::Approve => {
                let action = match approval::grant(&mut state) {
                    Ok(action) => action,
                    Err(error) => return self.refuse(session_id, error, Some(&state), &audit),
                };
                info!(
                    event_name = "dialogue.approval.granted",
                    correlation_id = %audit.correlation_id,
                    session_id = %session_id,
                    action = %action.name,
                    action_id = %action.id,
                    "pending action approved"
                );
                self.audit.emit(
                    audit
                        .event("approval.granted", AuditCategory::Approval, AuditOutcome::Success)
                        .with_metadata("action", action.name)
                        .with_metadata("action_id", action.id.0),
                );
            }
            ApprovalDecision::Reject { reason } => {
                let skipped = match approval::reject(&mut state, &reason) {
                    Ok(skipped) => skipped,
                    Err(error) => return self.refuse(session_id, error, Some(&state), &audit),
                };
                info!(
                    event_name = "dialogue.approval.rejected",
                    correlation_id = %audit.correlation_id,
                    session_id = %session_id,
                    skipped_actions = skipped.len(),
                    reason = %reason,
                    "pending action rejected"
                );
                self.audit.emit(
                    audit
                        .event("approval.rejected", AuditCategory::Approval, AuditOutcome::Rejected)
                        .with_metadata(
                            "actions",
                            skipped.iter().map(|a| a.name.as_str()).collect::<Vec<_>>().join(","),
                        )
                        .with_metadata("reason", reason),
                );
            }
        }

        if let Err(error) = self.checkpoint(&mut state).await {
            return self.fail_turn(state, error, &audit).await;
        }
        self.drive(state, &audit).await
    }

    /// Resumes a session whose last checkpoint is still `Running`, which only
    /// happens when the process driving it stopped mid-turn. An action that
    /// was being dispatched at that moment is answered with a failure instead
    /// of being dispatched again.
    pub async fn recover(&self, session_id: &SessionId) -> Result<TurnResult, DialogueError> {
        let audit = self.audit_context(session_id, "system");
        let _guard = self.locks.acquire(session_id).await;

        let mut state = self
            .checkpoints
            .load(session_id)
            .await?
            .ok_or_else(|| DialogueError::SessionNotFound { session_id: session_id.0.clone() })?;

        if state.status != SessionStatus::Running {
            return Ok(TurnResult::from_state(&state));
        }

        let interrupted = state.in_flight_action.take();
        if let Some(action) = &interrupted {
            state.push_tool_result(ToolResult::failure(
                action,
                ToolFailure::Collaborator(INTERRUPTED_DISPATCH.to_string()),
            ));
        }
        if matches!(state.next_node, GraphNode::DispatchSafe | GraphNode::DispatchSensitive) {
            state.next_node = GraphNode::Route;
        }

        warn!(
            event_name = "dialogue.session.recovered",
            correlation_id = %audit.correlation_id,
            session_id = %session_id,
            next_node = ?state.next_node,
            interrupted_action = interrupted.as_ref().map(|a| a.name.as_str()).unwrap_or(""),
            "resuming interrupted session"
        );
        self.audit.emit(
            audit
                .event("dialogue.session.recovered", AuditCategory::Dialogue, AuditOutcome::Success)
                .with_metadata(
                    "interrupted_action",
                    interrupted.map(|action| action.name).unwrap_or_default(),
                ),
        );

        if let Err(error) = self.checkpoint(&mut state).await {
            return Ok(self.fail_turn(state, error, &audit).await);
        }
        Ok(self.drive(state, &audit).await)
    }

    pub async fn delete_session(&self, session_id: &SessionId) -> Result<bool, DialogueError> {
        let audit = self.audit_context(session_id, "operator");
        let _guard = self.locks.acquire(session_id).await;
        let deleted = self.checkpoints.delete(session_id).await?;

        info!(
            event_name = "dialogue.session.deleted",
            correlation_id = %audit.correlation_id,
            session_id = %session_id,
            deleted,
            "session delete requested"
        );
        if deleted {
            self.audit.emit(audit.event(
                "dialogue.session.deleted",
                AuditCategory::Persistence,
                AuditOutcome::Success,
            ));
        }
        Ok(deleted)
    }

    /// Known sessions, unfinished ones first.
    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>, DialogueError> {
        let mut sessions = self.checkpoints.list().await?;
        sessions.sort_by_key(|session| session.status.is_turn_terminal());
        Ok(sessions)
    }

    fn audit_context(&self, session_id: &SessionId, actor: &str) -> AuditContext {
        AuditContext::new(Some(session_id.clone()), Uuid::new_v4().to_string(), actor)
    }

    fn refuse(
        &self,
        session_id: SessionId,
        error: DialogueError,
        state: Option<&ConversationState>,
        audit: &AuditContext,
    ) -> TurnResult {
        warn!(
            event_name = "dialogue.request.refused",
            correlation_id = %audit.correlation_id,
            session_id = %session_id,
            error_code = error.code(),
            error = %error,
            "request refused before the graph ran"
        );
        self.audit.emit(
            audit
                .event("dialogue.request.refused", AuditCategory::Ingress, AuditOutcome::Rejected)
                .with_metadata("error_code", error.code()),
        );
        TurnResult::failed(session_id, &error, state)
    }

    async fn checkpoint(&self, state: &mut ConversationState) -> Result<(), DialogueError> {
        state.touch();
        self.checkpoints.save(state).await?;
        Ok(())
    }

    async fn drive(&self, mut state: ConversationState, audit: &AuditContext) -> TurnResult {
        match self.run_graph(&mut state, audit).await {
            Ok(()) => TurnResult::from_state(&state),
            Err(error) => self.fail_turn(state, error, audit).await,
        }
    }

    async fn run_graph(
        &self,
        state: &mut ConversationState,
        audit: &AuditContext,
    ) -> Result<(), DialogueError> {
        let limit = self.settings.max_graph_steps.max(1);
        let mut steps = 0_u32;

        while state.status == SessionStatus::Running {
            if steps >= limit {
                return Err(DialogueError::StepLimitExceeded { limit });
            }
            steps += 1;
            self.step(state, audit).await?;
            self.checkpoint(state).await?;
        }
        Ok(())
    }

    async fn step(
        &self,
        state: &mut ConversationState,
        audit: &AuditContext,
    ) -> Result<(), DialogueError> {
        match state.next_node {
            GraphNode::FetchContext => {
                self.fetch_context(state).await;
                state.next_node = GraphNode::Reason;
            }
            GraphNode::Reason => {
                match self.reasoner.reason(&state.history, state.context.as_ref()).await? {
                    ReasonerOutput::Final(text) => {
                        state.history.push(Turn::Assistant { text, requested_actions: Vec::new() });
                        state.next_node = GraphNode::Finalize;
                    }
                    ReasonerOutput::ActionRequest { preamble, actions } => {
                        state.history.push(Turn::Assistant {
                            text: preamble,
                            requested_actions: actions.clone(),
                        });
                        state.queued_actions = actions;
                        state.next_node = GraphNode::Route;
                    }
                }
            }
            GraphNode::Route => self.route(state, audit)?,
            GraphNode::DispatchSafe | GraphNode::DispatchSensitive => {
                self.dispatch_in_flight(state, audit).await?
            }
            GraphNode::Finalize | GraphNode::Idle => {
                state.status = SessionStatus::Completed;
                state.next_node = GraphNode::Idle;
                info!(
                    event_name = "dialogue.turn.completed",
                    correlation_id = %audit.correlation_id,
                    session_id = %state.session_id,
                    "turn completed"
                );
            }
        }
        Ok(())
    }

    async fn fetch_context(&self, state: &mut ConversationState) {
        if !state.needs_context() {
            return;
        }

        let store = self.dispatcher.store();
        let customer_id = state.customer_id.clone();
        let fetched = match store.customer_profile(&customer_id).await {
            Ok(profile) => store.order_history(&customer_id).await.map(|orders| (profile, orders)),
            Err(error) => Err(error),
        };

        let context = match fetched {
            Ok((profile, orders)) => {
                let profile = profile.unwrap_or_else(|| CustomerProfile {
                    id: customer_id.clone(),
                    display_name: None,
                    loyalty_tier: LoyaltyTier::Standard,
                });
                CustomerContext::from_profile(profile, orders)
            }
            Err(error) => {
                warn!(
                    event_name = "dialogue.context.degraded",
                    session_id = %state.session_id,
                    customer_id = %customer_id,
                    error = %error,
                    "customer context unavailable, continuing without it"
                );
                CustomerContext::degraded(customer_id)
            }
        };
        state.context = Some(context);
    }

    fn route(
        &self,
        state: &mut ConversationState,
        audit: &AuditContext,
    ) -> Result<(), DialogueError> {
        let Some(next) = state.queued_actions.first() else {
            state.next_node = GraphNode::Reason;
            return Ok(());
        };

        match self.settings.guardrails.evaluate(next) {
            GuardrailDecision::Allow { .. } => {
                let action = state.queued_actions.remove(0);
                state.in_flight_action = Some(action);
                state.next_node = GraphNode::DispatchSafe;
            }
            GuardrailDecision::RequireApproval { reason_code, .. } => {
                if let Some(pending) = &state.pending_action {
                    return Err(DialogueError::ConcurrentApproval {
                        pending: pending.name.clone(),
                        requested: next.name.clone(),
                    });
                }
                let action = state.queued_actions.remove(0);
                info!(
                    event_name = "dialogue.approval.suspended",
                    correlation_id = %audit.correlation_id,
                    session_id = %state.session_id,
                    action = %action.name,
                    action_id = %action.id,
                    reason_code,
                    queued_behind = state.queued_actions.len(),
                    "turn suspended for approval"
                );
                self.audit.emit(
                    audit
                        .event(
                            "dialogue.approval.suspended",
                            AuditCategory::Approval,
                            AuditOutcome::Success,
                        )
                        .with_metadata("action", action.name.clone())
                        .with_metadata("action_id", action.id.0.clone())
                        .with_metadata("reason_code", reason_code),
                );
                state.pending_action = Some(action);
                state.status = SessionStatus::SuspendedForApproval;
                state.next_node = GraphNode::DispatchSensitive;
            }
        }
        Ok(())
    }

    async fn dispatch_in_flight(
        &self,
        state: &mut ConversationState,
        audit: &AuditContext,
    ) -> Result<(), DialogueError> {
        let Some(action) = state.in_flight_action.clone() else {
            state.next_node = GraphNode::Route;
            return Ok(());
        };

        let result = self.dispatcher.dispatch(&action, &state.customer_id).await?;
        let outcome = if result.ok() { AuditOutcome::Success } else { AuditOutcome::Failed };
        let mut event = audit
            .event("tool.dispatched", AuditCategory::Tool, outcome)
            .with_metadata("action", action.name.clone())
            .with_metadata("action_id", action.id.0.clone());
        if let Some(failure) = result.error() {
            event = event.with_metadata("error_code", failure.code());
        }
        self.audit.emit(event);

        state.push_tool_result(result);
        state.in_flight_action = None;
        state.next_node = GraphNode::Route;
        Ok(())
    }

    /// Ends the turn on a fatal error. Every action still waiting for a result
    /// gets a failed one, so no pending action is left dangling.
    async fn fail_turn(
        &self,
        mut state: ConversationState,
        error: DialogueError,
        audit: &AuditContext,
    ) -> TurnResult {
        if let Some(action) = state.in_flight_action.take() {
            state.push_tool_result(ToolResult::failure(
                &action,
                ToolFailure::Collaborator(error.to_string()),
            ));
        }
        let unanswered: Vec<RequestedAction> = state
            .pending_action
            .take()
            .into_iter()
            .chain(state.queued_actions.drain(..))
            .collect();
        for action in &unanswered {
            state.push_tool_result(ToolResult::failure(
                action,
                ToolFailure::Collaborator(format!("not executed: turn failed ({})", error.code())),
            ));
        }
        state.status = SessionStatus::Failed;
        state.next_node = GraphNode::Idle;
        state.last_error = Some(error.code().to_string());

        error!(
            event_name = "dialogue.turn.failed",
            correlation_id = %audit.correlation_id,
            session_id = %state.session_id,
            error_code = error.code(),
            error = %error,
            "turn failed"
        );
        self.audit.emit(
            audit
                .event("dialogue.turn.failed", AuditCategory::Dialogue, AuditOutcome::Failed)
                .with_metadata("error_code", error.code()),
        );

        if let Err(save_error) = self.checkpoint(&mut state).await {
            error!(
                event_name = "dialogue.checkpoint.failed",
                correlation_id = %audit.correlation_id,
                session_id = %state.session_id,
                error = %save_error,
                "could not record failed turn"
            );
        }
        TurnResult::failed(state.session_id.clone(), &error, None)
    }
}

/// A `Running` checkpoint at the start of a new turn was left by a process
/// that stopped mid-turn. Its unanswered actions are closed out before the
/// new utterance is appended.
fn abandon_interrupted_turn(state: &mut ConversationState) {
    if let Some(action) = state.in_flight_action.take() {
        state.push_tool_result(ToolResult::failure(
            &action,
            ToolFailure::Collaborator(INTERRUPTED_DISPATCH.to_string()),
        ));
    }
    let abandoned: Vec<RequestedAction> =
        state.pending_action.take().into_iter().chain(state.queued_actions.drain(..)).collect();
    for action in &abandoned {
        state.push_tool_result(ToolResult::failure(
            action,
            ToolFailure::Collaborator(ABANDONED_ACTION.to_string()),
        ));
    }
    warn!(
        event_name = "dialogue.turn.abandoned",
        session_id = %state.session_id,
        abandoned_actions = abandoned.len(),
        "interrupted turn closed before starting a new one"
    );
}

#[cfg(test)]
mod tests {
    use shopkeep_core::config::{AgentConfig, AppConfig};
    use shopkeep_core::domain::conversation::{
        ConversationState, GraphNode, RequestedAction, SessionId, SessionStatus, ToolFailure, Turn,
    };
    use shopkeep_core::domain::customer::CustomerId;
    use serde_json::Map;

    use super::{abandon_interrupted_turn, RuntimeSettings, TurnRequest};

    #[test]
    fn settings_follow_agent_config() {
        let settings = RuntimeSettings::from_config(&AgentConfig {
            max_reasoner_attempts: 3,
            max_graph_steps: 0,
            default_customer_id: "CUST002".to_string(),
            corrective_prompt: "again".to_string(),
        });
        assert_eq!(settings.max_graph_steps, 1);
        assert_eq!(settings.default_customer_id, CustomerId("CUST002".to_string()));
    }

    #[test]
    fn turn_request_builder_sets_optional_fields() {
        let request = TurnRequest::new("xin chào")
            .in_session(SessionId("s".to_string()))
            .for_customer(CustomerId("CUST003".to_string()));
        assert_eq!(request.session_id, Some(SessionId("s".to_string())));
        assert_eq!(request.customer_id, Some(CustomerId("CUST003".to_string())));
    }

    #[test]
    fn interrupted_turn_answers_every_open_action() {
        let mut state =
            ConversationState::new(SessionId("s".to_string()), CustomerId("CUST001".to_string()));
        state.begin_turn("xem giỏ hàng rồi đặt hàng");
        state.in_flight_action = Some(RequestedAction::new("view_cart", Map::new()));
        state.queued_actions = vec![RequestedAction::new("place_order", Map::new())];
        state.next_node = GraphNode::DispatchSafe;

        abandon_interrupted_turn(&mut state);

        assert!(state.in_flight_action.is_none());
        assert!(state.queued_actions.is_empty());
        let failures: Vec<String> = state
            .history
            .iter()
            .filter_map(|turn| match turn {
                Turn::Tool(result) => result.error().map(ToolFailure::message).map(str::to_string),
                _ => None,
            })
            .collect();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0], "outcome unknown after interruption");
        assert_eq!(state.status, SessionStatus::Running);
    }
}
