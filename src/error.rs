//! User-facing error taxonomy for the conversation core.
//!
//! ERROR HANDLING
//! ==============
//! Every failure here is local and recoverable. Nothing propagates beyond the
//! active conversation: a failed send restores the draft, a failed edit or
//! delete restores the prior snapshot, a failed join waits for the next
//! explicit project selection.

use crate::api::ApiError;
use crate::transport::TransportError;
use crate::types::{MessageId, ProjectId};

/// Grepable error code and retryable flag for structured error reporting.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("message could not be sent: {source}")]
    SendFailed { project_id: ProjectId, source: ApiError },
    #[error("message {message_id} could not be edited: {source}")]
    EditFailed { message_id: i64, source: ApiError },
    #[error("message {message_id} could not be deleted: {source}")]
    DeleteFailed { message_id: i64, source: ApiError },
    #[error("could not subscribe to project {project_id}: {source}")]
    SubscriptionFailed { project_id: ProjectId, source: TransportError },
    #[error("could not load messages for project {project_id}: {source}")]
    FetchFailed { project_id: ProjectId, source: ApiError },
    #[error("could not mark mentions viewed for project {project_id}: {source}")]
    MentionClearFailed { project_id: ProjectId, source: ApiError },
    #[error("no project is selected")]
    NoActiveProject,
    #[error("message has no content or attachments")]
    EmptyMessage,
    #[error("message {0} is not in the conversation")]
    UnknownMessage(MessageId),
    #[error("message {0} belongs to another user")]
    NotOwner(i64),
    #[error("message {0} already has an edit or delete in flight")]
    ActionInFlight(i64),
    #[error("cannot reply to a message that has not been confirmed")]
    ReplyTargetUnconfirmed,
}

impl ErrorCode for ChatError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::SendFailed { .. } => "E_SEND_FAILED",
            Self::EditFailed { .. } => "E_EDIT_FAILED",
            Self::DeleteFailed { .. } => "E_DELETE_FAILED",
            Self::SubscriptionFailed { .. } => "E_SUBSCRIPTION_FAILED",
            Self::FetchFailed { .. } => "E_FETCH_FAILED",
            Self::MentionClearFailed { .. } => "E_MENTION_CLEAR_FAILED",
            Self::NoActiveProject => "E_NO_ACTIVE_PROJECT",
            Self::EmptyMessage => "E_EMPTY_MESSAGE",
            Self::UnknownMessage(_) => "E_UNKNOWN_MESSAGE",
            Self::NotOwner(_) => "E_NOT_OWNER",
            Self::ActionInFlight(_) => "E_ACTION_IN_FLIGHT",
            Self::ReplyTargetUnconfirmed => "E_REPLY_TARGET_UNCONFIRMED",
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::SendFailed { source, .. }
            | Self::EditFailed { source, .. }
            | Self::DeleteFailed { source, .. }
            | Self::FetchFailed { source, .. }
            | Self::MentionClearFailed { source, .. } => source.retryable(),
            Self::SubscriptionFailed { .. } => true,
            _ => false,
        }
    }
}

impl ChatError {
    /// Whether this error is shown to the user. Mention-clear failures are
    /// only logged; the unread flag is repaired by the next refresh.
    #[must_use]
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, Self::MentionClearFailed { .. })
    }
}

/// Dismissible error notice rendered by the UI.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
}

impl From<&ChatError> for Notice {
    fn from(error: &ChatError) -> Self {
        Self { code: error.error_code(), message: error.to_string(), retryable: error.retryable() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_and_grepable() {
        assert_eq!(ChatError::NoActiveProject.error_code(), "E_NO_ACTIVE_PROJECT");
        assert_eq!(ChatError::NotOwner(4).error_code(), "E_NOT_OWNER");
        let err = ChatError::SendFailed { project_id: 7, source: ApiError::Request("offline".into()) };
        assert_eq!(err.error_code(), "E_SEND_FAILED");
    }

    #[test]
    fn retryable_follows_the_api_cause() {
        let offline = ChatError::SendFailed { project_id: 7, source: ApiError::Request("offline".into()) };
        let rejected = ChatError::EditFailed {
            message_id: 1,
            source: ApiError::Status { status: 403, body: String::new() },
        };
        assert!(offline.retryable());
        assert!(!rejected.retryable());
        assert!(!ChatError::EmptyMessage.retryable());
    }

    #[test]
    fn mention_clear_failures_are_not_user_visible() {
        let err = ChatError::MentionClearFailed { project_id: 7, source: ApiError::Request("x".into()) };
        assert!(!err.is_user_visible());
        assert!(ChatError::EmptyMessage.is_user_visible());
    }

    #[test]
    fn notice_carries_code_and_text() {
        let notice = Notice::from(&ChatError::UnknownMessage(MessageId::Server(9)));
        assert_eq!(notice.code, "E_UNKNOWN_MESSAGE");
        assert_eq!(notice.message, "message 9 is not in the conversation");
        assert!(!notice.retryable);
    }
}
