//! Broadcast channel contract.
//!
//! ARCHITECTURE
//! ============
//! The core consumes the broadcast channel through [`RoomTransport`] (room
//! join/leave plus outbound typing signals) and a stream of
//! [`TransportEvent`]s. Frames are mapped to typed events here so the rest of
//! the crate never inspects syscall strings.

#[cfg(test)]
#[path = "transport_test.rs"]
mod transport_test;

use frames::{Frame, syscall};
use serde_json::Value;
use tracing::trace;

use crate::types::{Message, ProjectId};
use crate::wire::{MessageRecord, i64_from_value};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
    #[error("websocket connect failed: {0}")]
    WsConnect(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("transport is not connected")]
    Closed,
    #[error("frame decode failed: {0}")]
    Decode(#[from] frames::CodecError),
    #[error("timed out waiting for {0} response")]
    Timeout(String),
    #[error("server rejected {syscall}: {message}")]
    Rejected { syscall: String, message: String },
}

impl crate::error::ErrorCode for TransportError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidBaseUrl(_) => "E_INVALID_BASE_URL",
            Self::WsConnect(_) => "E_WS_CONNECT",
            Self::Closed => "E_TRANSPORT_CLOSED",
            Self::Decode(_) => "E_FRAME_DECODE",
            Self::Timeout(_) => "E_TRANSPORT_TIMEOUT",
            Self::Rejected { .. } => "E_REQUEST_REJECTED",
        }
    }

    fn retryable(&self) -> bool {
        !matches!(self, Self::InvalidBaseUrl(_) | Self::Rejected { .. })
    }
}

/// Event pushed by the server to members of a project room (or to the user).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BroadcastEvent {
    MessageCreated { project_id: ProjectId, message: Message },
    MessageUpdated { project_id: ProjectId, message: Message },
    MessageDeleted { project_id: ProjectId, message_id: i64 },
    Typing { project_id: ProjectId, user_name: String },
    /// Without a user name every typer of the project is cleared.
    StopTyping { project_id: ProjectId, user_name: Option<String> },
    MentionCreated { project_id: ProjectId },
}

impl BroadcastEvent {
    #[must_use]
    pub fn project_id(&self) -> ProjectId {
        match self {
            Self::MessageCreated { project_id, .. }
            | Self::MessageUpdated { project_id, .. }
            | Self::MessageDeleted { project_id, .. }
            | Self::Typing { project_id, .. }
            | Self::StopTyping { project_id, .. }
            | Self::MentionCreated { project_id } => *project_id,
        }
    }
}

/// Connection lifecycle and inbound traffic of the broadcast channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// The server greeted a new connection. `reconnect` is false only for
    /// the first connection of the transport.
    Connected { reconnect: bool },
    Disconnected,
    Broadcast(BroadcastEvent),
}

/// Outbound typing signal for the active project.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypingSignal {
    Start,
    Stop,
}

impl TypingSignal {
    fn syscall(self) -> &'static str {
        match self {
            Self::Start => syscall::TYPING_START,
            Self::Stop => syscall::TYPING_STOP,
        }
    }
}

/// Room membership and signalling half of the broadcast channel.
#[async_trait::async_trait]
pub trait RoomTransport: Send + Sync {
    /// Join the broadcast room of `project_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is down or the server rejects the join.
    async fn join(&self, project_id: ProjectId) -> Result<(), TransportError>;

    /// Leave the broadcast room of `project_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is down or the server rejects the leave.
    async fn leave(&self, project_id: ProjectId) -> Result<(), TransportError>;

    /// Emit a typing signal. Fire-and-forget: callers ignore failures.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal could not be queued.
    async fn signal_typing(
        &self,
        project_id: ProjectId,
        user_name: &str,
        signal: TypingSignal,
    ) -> Result<(), TransportError>;
}

/// Map an inbound server frame to a broadcast event.
///
/// Returns `None` for frames that are not broadcast events (responses,
/// greetings) and for events whose payload is malformed.
#[must_use]
pub fn parse_event(frame: &Frame) -> Option<BroadcastEvent> {
    if frame.parent_id.is_some() {
        return None;
    }

    let event = match frame.syscall.as_str() {
        syscall::MESSAGE_CREATED => {
            let message = parse_message(&frame.data)?;
            BroadcastEvent::MessageCreated { project_id: frame.project_id.unwrap_or(message.project_id), message }
        }
        syscall::MESSAGE_UPDATED => {
            let message = parse_message(&frame.data)?;
            BroadcastEvent::MessageUpdated { project_id: frame.project_id.unwrap_or(message.project_id), message }
        }
        syscall::MESSAGE_DELETED => BroadcastEvent::MessageDeleted {
            project_id: frame.project_id?,
            message_id: frame.data.get("message_id").or_else(|| frame.data.get("id")).and_then(i64_from_value)?,
        },
        syscall::TYPING_START => BroadcastEvent::Typing {
            project_id: frame.project_id?,
            user_name: user_name(&frame.data)?.to_owned(),
        },
        syscall::TYPING_STOP => BroadcastEvent::StopTyping {
            project_id: frame.project_id?,
            user_name: user_name(&frame.data).map(ToOwned::to_owned),
        },
        syscall::MENTION_CREATED => BroadcastEvent::MentionCreated { project_id: frame.project_id? },
        _ => return None,
    };

    trace!(syscall = %frame.syscall, project_id = event.project_id(), "broadcast event parsed");
    Some(event)
}

/// Build the request frame for an outbound typing signal.
#[must_use]
pub fn typing_frame(project_id: ProjectId, user_name: &str, signal: TypingSignal) -> Frame {
    Frame::request(signal.syscall(), Some(project_id), serde_json::json!({ "user_name": user_name }))
}

fn parse_message(data: &Value) -> Option<Message> {
    let payload = data.get("message").unwrap_or(data);
    serde_json::from_value::<MessageRecord>(payload.clone())
        .ok()
        .map(Message::from)
}

fn user_name(data: &Value) -> Option<&str> {
    data.get("user_name")
        .and_then(Value::as_str)
        .filter(|name| !name.trim().is_empty())
}
