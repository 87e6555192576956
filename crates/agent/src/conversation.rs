//! Caller-facing view of a session after the graph stops: the turn result,
//! the approval prompt for a pending action and the follow-up selections.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use shopkeep_core::actions::{ActionCall, ActionKind};
use shopkeep_core::domain::conversation::{
    ConversationState, RequestedAction, SessionId, SessionStatus, Turn,
};
use shopkeep_core::errors::DialogueError;

pub const DEFAULT_SELECTIONS: [&str; 3] = ["Xem sản phẩm", "Xem giỏ hàng", "Chính sách"];
const WAITING_SELECTIONS: [(&str, &str); 3] =
    [("Đồng ý", "approve"), ("Từ chối", "reject"), ("Xem giỏ hàng", "Xem giỏ hàng")];
const ERROR_SELECTIONS: [&str; 3] = ["Thử lại", "Xem sản phẩm", "Chính sách"];
const EMPTY_RESPONSE: &str = "Không có phản hồi.";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Completed,
    Waiting,
    Error,
}

impl TurnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Waiting => "waiting",
            Self::Error => "error",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingActionView {
    pub action_id: String,
    pub name: String,
    pub arguments: Map<String, Value>,
    pub prompt: String,
}

impl From<&RequestedAction> for PendingActionView {
    fn from(action: &RequestedAction) -> Self {
        Self {
            action_id: action.id.0.clone(),
            name: action.name.clone(),
            arguments: action.arguments.clone(),
            prompt: approval_prompt(action),
        }
    }
}

/// Quick-reply button. `value` is what the client sends back: the text itself
/// for follow-up messages, `approve` or `reject` for approval choices.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionOption {
    pub text: String,
    pub value: String,
}

impl SelectionOption {
    pub fn new(text: impl Into<String>, value: impl Into<String>) -> Self {
        Self { text: text.into(), value: value.into() }
    }
}

/// What a turn, approval or recovery hands back to its caller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnResult {
    pub session_id: SessionId,
    pub status: TurnStatus,
    pub response: String,
    pub pending_action: Option<PendingActionView>,
    pub selections: Vec<SelectionOption>,
    pub error_code: Option<String>,
}

impl TurnResult {
    pub fn waiting_for_approval(&self) -> bool {
        self.status == TurnStatus::Waiting
    }

    /// Result for a session the graph has stopped driving.
    pub fn from_state(state: &ConversationState) -> Self {
        match state.status {
            SessionStatus::SuspendedForApproval => {
                let pending = state.pending_action.as_ref().map(PendingActionView::from);
                Self {
                    session_id: state.session_id.clone(),
                    status: TurnStatus::Waiting,
                    response: pending
                        .as_ref()
                        .map(|view| view.prompt.clone())
                        .unwrap_or_else(|| EMPTY_RESPONSE.to_string()),
                    pending_action: pending,
                    selections: waiting_selections(),
                    error_code: None,
                }
            }
            SessionStatus::Failed => Self {
                session_id: state.session_id.clone(),
                status: TurnStatus::Error,
                response: DialogueError::user_message_for_code(
                    state.last_error.as_deref().unwrap_or_default(),
                )
                .to_string(),
                pending_action: None,
                selections: echo_selections(&ERROR_SELECTIONS),
                error_code: state.last_error.clone(),
            },
            SessionStatus::Completed | SessionStatus::Running => Self {
                session_id: state.session_id.clone(),
                status: TurnStatus::Completed,
                response: state
                    .last_assistant_text()
                    .filter(|text| !text.trim().is_empty())
                    .unwrap_or(EMPTY_RESPONSE)
                    .to_string(),
                pending_action: None,
                selections: selections_for(state),
                error_code: None,
            },
        }
    }

    /// Result for a fatal error. When the call was refused before the graph ran
    /// the session is left as it was, so a pending action is still surfaced.
    pub fn failed(
        session_id: SessionId,
        error: &DialogueError,
        state: Option<&ConversationState>,
    ) -> Self {
        let pending_action = state
            .filter(|state| state.is_suspended())
            .and_then(|state| state.pending_action.as_ref())
            .map(PendingActionView::from);
        let selections = if pending_action.is_some() {
            waiting_selections()
        } else {
            echo_selections(&ERROR_SELECTIONS)
        };
        Self {
            session_id,
            status: TurnStatus::Error,
            response: error.user_message().to_string(),
            pending_action,
            selections,
            error_code: Some(error.code().to_string()),
        }
    }
}

/// Question put to the human approver for a pending action.
pub fn approval_prompt(action: &RequestedAction) -> String {
    let Some(kind) = ActionKind::parse(&action.name) else {
        return format!(
            "Cần xác nhận: {} với tham số {}",
            action.name,
            Value::Object(action.arguments.clone())
        );
    };

    match kind.validate(&action.arguments) {
        Ok(ActionCall::AddToCart { product_id, quantity }) => {
            format!("Bạn có muốn thêm {quantity} sản phẩm (ID: {product_id}) vào giỏ hàng không?")
        }
        Ok(ActionCall::UpdateCartItem { product_id, quantity: 0 }) => {
            format!("Bạn có muốn xóa sản phẩm (ID: {product_id}) khỏi giỏ hàng không?")
        }
        Ok(ActionCall::UpdateCartItem { product_id, quantity }) => {
            format!(
                "Bạn có muốn cập nhật số lượng sản phẩm (ID: {product_id}) thành {quantity} không?"
            )
        }
        Ok(ActionCall::ClearCart) => {
            "Bạn có muốn xóa tất cả sản phẩm trong giỏ hàng không?".to_string()
        }
        Ok(ActionCall::PlaceOrder) => {
            "Bạn có muốn đặt hàng với các sản phẩm trong giỏ hàng hiện tại không?".to_string()
        }
        Ok(ActionCall::CancelOrder { order_id }) => {
            format!("Bạn có muốn hủy đơn hàng #{order_id} không?")
        }
        Ok(_) | Err(_) => format!("Cần xác nhận: {}", kind.description()),
    }
}

/// Follow-up suggestions for a finished turn, keyed on the last action
/// dispatched since the latest user utterance.
pub fn selections_for(state: &ConversationState) -> Vec<SelectionOption> {
    match state.status {
        SessionStatus::SuspendedForApproval => return waiting_selections(),
        SessionStatus::Failed => return echo_selections(&ERROR_SELECTIONS),
        SessionStatus::Running | SessionStatus::Completed => {}
    }

    let last_action = state
        .history
        .iter()
        .rev()
        .take_while(|turn| !matches!(turn, Turn::User { .. }))
        .find_map(|turn| match turn {
            Turn::Tool(result) => ActionKind::parse(&result.action_name),
            _ => None,
        });

    let selections: &[&str] = match last_action {
        Some(ActionKind::SearchProducts) => {
            &["Thêm vào giỏ hàng", "Xem giỏ hàng", "Tìm sản phẩm khác"]
        }
        Some(ActionKind::ViewCart | ActionKind::AddToCart | ActionKind::UpdateCartItem) => {
            &["Đặt hàng", "Tiếp tục mua sắm", "Xóa giỏ hàng"]
        }
        Some(ActionKind::ClearCart) => &["Xem sản phẩm", "Chính sách"],
        Some(ActionKind::PlaceOrder) => {
            &["Xem đơn hàng", "Chính sách vận chuyển", "Tiếp tục mua sắm"]
        }
        Some(ActionKind::FetchUserOrderInformation | ActionKind::CancelOrder) => {
            &["Xem đơn hàng", "Chính sách đổi trả", "Xem sản phẩm"]
        }
        Some(ActionKind::LookupStorePolicy) => {
            &["Chính sách vận chuyển", "Chính sách đổi trả", "Xem sản phẩm"]
        }
        None => &DEFAULT_SELECTIONS,
    };
    echo_selections(selections)
}

fn echo_selections(texts: &[&str]) -> Vec<SelectionOption> {
    texts.iter().map(|text| SelectionOption::new(*text, *text)).collect()
}

fn waiting_selections() -> Vec<SelectionOption> {
    WAITING_SELECTIONS.iter().map(|(text, value)| SelectionOption::new(*text, *value)).collect()
}
