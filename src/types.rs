//! Conversation data model.
//!
//! DESIGN
//! ======
//! A message is identified either by a client-local temporary id (before the
//! durable API confirms it) or by the permanent server id. The two never mix:
//! confirmation rewrites the id in place and flips `delivery` exactly once.

use std::fmt;

/// Project (room) identifier assigned by the server.
pub type ProjectId = i64;

/// User identifier assigned by the server.
pub type UserId = i64;

/// Session-unique temporary id of an optimistic message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TempId(pub u64);

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tmp-{}", self.0)
    }
}

/// Identity of a conversation entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageId {
    /// Not yet confirmed by the durable API.
    Temp(TempId),
    /// Permanent id assigned by the server.
    Server(i64),
}

impl MessageId {
    /// The permanent id, if this entry has been confirmed.
    #[must_use]
    pub fn server(self) -> Option<i64> {
        match self {
            Self::Server(id) => Some(id),
            Self::Temp(_) => None,
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Temp(id) => id.fmt(f),
            Self::Server(id) => id.fmt(f),
        }
    }
}

/// Lifecycle of a message with respect to the durable API.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeliveryState {
    /// Rendered optimistically, durable call still in flight.
    Pending,
    /// Persisted by the server; `id` is a [`MessageId::Server`].
    #[default]
    Confirmed,
    /// The durable call failed and the entry was rolled back out of the store.
    Failed,
}

/// File attached to a message. Storage is handled elsewhere; only metadata lives here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// Download URL once uploaded.
    pub url: Option<String>,
    /// True while the upload has not finished.
    pub pending: bool,
}

/// Immutable copy of a parent message taken when a reply is composed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplySnapshot {
    pub id: i64,
    pub content: Option<String>,
    pub sender_name: String,
    pub sender_id: UserId,
}

/// One entry of a project conversation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub project_id: ProjectId,
    pub sender_id: UserId,
    pub sender_name: String,
    /// `None` for attachment-only messages.
    pub content: Option<String>,
    pub attachments: Vec<Attachment>,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    pub is_edited: bool,
    pub reply_to_id: Option<i64>,
    pub reply_to: Option<ReplySnapshot>,
    pub delivery: DeliveryState,
}

impl Message {
    /// True while the durable send for this entry is still in flight.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.delivery == DeliveryState::Pending
    }
}

/// Contents of the composer. Restored verbatim when a send fails.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Draft {
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub reply_to: Option<ReplySnapshot>,
}

impl Draft {
    /// A draft with only text content.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: content.into(), ..Self::default() }
    }

    /// True when there is neither text nor an attachment to send.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty() && self.attachments.is_empty()
    }

    /// Combine a draft being put back with whatever the composer holds now.
    /// The restored text goes first; nothing from either side is dropped.
    #[must_use]
    pub fn merge(restored: Self, current: Self) -> Self {
        if current.is_empty() && current.reply_to.is_none() {
            return restored;
        }
        let content = match (restored.content.trim().is_empty(), current.content.trim().is_empty()) {
            (true, _) => current.content,
            (false, true) => restored.content,
            (false, false) => format!("{}\n{}", restored.content, current.content),
        };
        let mut attachments = restored.attachments;
        attachments.extend(current.attachments);
        Self { content, attachments, reply_to: restored.reply_to.or(current.reply_to) }
    }
}

/// The user this client session acts as.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalUser {
    pub id: UserId,
    pub name: String,
}

/// Member of a project team, used to resolve `@name` mentions for display.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TeamMember {
    pub id: UserId,
    pub name: String,
}
