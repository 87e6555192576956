use shopkeep_core::actions::{classify, ActionClass, ActionKind};
use shopkeep_core::domain::conversation::RequestedAction;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    /// Read-only action; dispatch without asking.
    Allow { kind: ActionKind },
    /// Suspend the turn until a human approves or rejects the action.
    RequireApproval { kind: Option<ActionKind>, reason_code: &'static str },
}

impl GuardrailDecision {
    pub fn requires_approval(&self) -> bool {
        matches!(self, Self::RequireApproval { .. })
    }
}

/// Routing policy in front of the tool dispatcher.
///
/// Classification comes from the static action catalog. Names outside the
/// catalog are never auto-executed: they are held for approval like any
/// mutating action and fail at dispatch if the approver lets them through.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GuardrailPolicy;

impl GuardrailPolicy {
    pub fn evaluate(&self, action: &RequestedAction) -> GuardrailDecision {
        let unknown =
            GuardrailDecision::RequireApproval { kind: None, reason_code: "unknown_action" };
        let Ok(class) = classify(&action.name) else {
            return unknown;
        };

        match (class, ActionKind::parse(&action.name)) {
            (ActionClass::Safe, Some(kind)) => GuardrailDecision::Allow { kind },
            (ActionClass::Safe, None) => unknown,
            (ActionClass::Sensitive, kind) => {
                GuardrailDecision::RequireApproval { kind, reason_code: "mutating_action" }
            }
        }
    }
}
