use thiserror::Error;

use crate::actions::UnknownActionError;
use crate::checkpoint::CheckpointError;

/// Errors that abort the current turn. Validation and collaborator failures are
/// not listed here: they become tool results in the conversation instead.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DialogueError {
    #[error("reasoner produced no usable output after {attempts} attempts")]
    ReasonerExhausted { attempts: u32 },
    #[error("session `{session_id}` has no action awaiting approval")]
    NoPendingApproval { session_id: String },
    #[error(transparent)]
    UnknownAction(#[from] UnknownActionError),
    #[error("action `{requested}` requested while `{pending}` is still awaiting approval")]
    ConcurrentApproval { pending: String, requested: String },
    #[error("session `{session_id}` is waiting for an approval decision")]
    AwaitingApproval { session_id: String },
    #[error("session `{session_id}` not found")]
    SessionNotFound { session_id: String },
    #[error("session `{session_id}` belongs to another customer")]
    CustomerMismatch { session_id: String },
    #[error("graph exceeded {limit} node transitions")]
    StepLimitExceeded { limit: u32 },
    #[error("collaborator unavailable: {0}")]
    CollaboratorUnavailable(String),
    #[error("checkpoint failure: {0}")]
    Checkpoint(String),
}

impl DialogueError {
    /// Stable machine-readable code returned to callers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ReasonerExhausted { .. } => "reasoner_exhausted",
            Self::NoPendingApproval { .. } => "no_pending_approval",
            Self::UnknownAction(_) => "unknown_action",
            Self::ConcurrentApproval { .. } => "concurrent_approval",
            Self::AwaitingApproval { .. } => "awaiting_approval",
            Self::SessionNotFound { .. } => "session_not_found",
            Self::CustomerMismatch { .. } => "customer_mismatch",
            Self::StepLimitExceeded { .. } => "step_limit_exceeded",
            Self::CollaboratorUnavailable(_) => "collaborator_unavailable",
            Self::Checkpoint(_) => "checkpoint_failure",
        }
    }

    pub fn user_message(&self) -> &'static str {
        Self::user_message_for_code(self.code())
    }

    /// Customer-facing text for a stored error code. Unknown codes get the
    /// generic apology.
    pub fn user_message_for_code(code: &str) -> &'static str {
        match code {
            "awaiting_approval" => {
                "Vui lòng xác nhận hoặc từ chối thao tác đang chờ trước khi tiếp tục."
            }
            "no_pending_approval" => "Hiện không có thao tác nào đang chờ xác nhận.",
            "session_not_found" | "customer_mismatch" => {
                "Không tìm thấy phiên trò chuyện này. Vui lòng bắt đầu phiên mới."
            }
            "collaborator_unavailable" | "checkpoint_failure" => {
                "Xin lỗi, hệ thống cửa hàng đang tạm thời gián đoạn. Vui lòng thử lại sau ít phút."
            }
            _ => "Xin lỗi, tôi gặp sự cố khi xử lý yêu cầu. Bạn vui lòng thử lại nhé.",
        }
    }
}

impl From<CheckpointError> for DialogueError {
    fn from(value: CheckpointError) -> Self {
        Self::Checkpoint(value.to_string())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Dialogue(#[from] DialogueError),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The requested resource does not exist.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Dialogue(
                error @ (DialogueError::SessionNotFound { .. }
                | DialogueError::CustomerMismatch { .. }),
            ) => Self::NotFound { message: error.to_string(), correlation_id },
            ApplicationError::Dialogue(
                error @ (DialogueError::CollaboratorUnavailable(_) | DialogueError::Checkpoint(_)),
            ) => Self::ServiceUnavailable { message: error.to_string(), correlation_id },
            ApplicationError::Dialogue(error) => {
                Self::BadRequest { message: error.to_string(), correlation_id }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{ApplicationError, DialogueError, InterfaceError};

    #[test]
    fn every_fatal_error_has_a_stable_code() {
        let cases = [
            (DialogueError::ReasonerExhausted { attempts: 3 }, "reasoner_exhausted"),
            (
                DialogueError::NoPendingApproval { session_id: "s".to_owned() },
                "no_pending_approval",
            ),
            (
                DialogueError::ConcurrentApproval {
                    pending: "add_to_cart".to_owned(),
                    requested: "place_order".to_owned(),
                },
                "concurrent_approval",
            ),
            (DialogueError::StepLimitExceeded { limit: 25 }, "step_limit_exceeded"),
        ];

        for (error, code) in cases {
            assert_eq!(error.code(), code);
            assert!(!error.user_message().is_empty());
        }
    }

    #[test]
    fn stored_codes_resolve_to_the_same_message_as_the_error() {
        let errors = [
            DialogueError::AwaitingApproval { session_id: "s".to_owned() },
            DialogueError::CustomerMismatch { session_id: "s".to_owned() },
            DialogueError::CollaboratorUnavailable("catalog down".to_owned()),
            DialogueError::Checkpoint("disk full".to_owned()),
            DialogueError::StepLimitExceeded { limit: 25 },
        ];
        for error in errors {
            assert_eq!(DialogueError::user_message_for_code(error.code()), error.user_message());
        }
        assert_eq!(
            DialogueError::user_message_for_code("something_new"),
            DialogueError::ReasonerExhausted { attempts: 3 }.user_message()
        );
    }

    #[test]
    fn missing_session_maps_to_not_found_with_correlation_id() {
        let interface =
            ApplicationError::from(DialogueError::SessionNotFound { session_id: "s-9".to_owned() })
                .into_interface("req-1");

        assert!(matches!(interface, InterfaceError::NotFound { .. }));
        assert_eq!(interface.correlation_id(), "req-1");
    }

    #[test]
    fn checkpoint_failure_maps_to_service_unavailable() {
        let interface =
            ApplicationError::from(DialogueError::Checkpoint("database lock timeout".to_owned()))
                .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            interface.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }

    #[test]
    fn refused_approval_maps_to_bad_request_with_detail() {
        let error = DialogueError::NoPendingApproval { session_id: "s-2".to_owned() };
        let interface = ApplicationError::from(error).into_interface("req-4");

        assert!(matches!(interface, InterfaceError::BadRequest { .. }));
        assert_eq!(
            interface.to_string(),
            "bad request: session `s-2` has no action awaiting approval"
        );
    }
}
