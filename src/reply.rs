//! Reply threading: immutable parent snapshots and derived thread data.
//!
//! A reply carries a copy of its parent taken at compose time. Rendering reads
//! that copy only, so later edits or deletes of the parent never change what
//! the reply quotes. Reply counts and parent availability are derived from the
//! store on every call and never cached.

#[cfg(test)]
#[path = "reply_test.rs"]
mod reply_test;

use crate::error::ChatError;
use crate::store::ConversationStore;
use crate::types::{Message, MessageId, ReplySnapshot};

/// Longest quoted snippet, in characters, before truncation.
pub const SNIPPET_MAX_CHARS: usize = 120;

/// Placeholder quoted for a parent that had no text.
pub const ATTACHMENT_ONLY_SNIPPET: &str = "[attachment]";

/// Capture the reply context for `parent`.
///
/// # Errors
///
/// [`ChatError::ReplyTargetUnconfirmed`] for a pending parent (the server
/// cannot reference it yet) and [`ChatError::UnknownMessage`] when it is not
/// in the conversation.
pub fn capture(store: &ConversationStore, parent: MessageId) -> Result<ReplySnapshot, ChatError> {
    let MessageId::Server(id) = parent else {
        return Err(ChatError::ReplyTargetUnconfirmed);
    };
    let message = store.get(parent).ok_or(ChatError::UnknownMessage(parent))?;
    Ok(ReplySnapshot {
        id,
        content: message.content.clone(),
        sender_name: message.sender_name.clone(),
        sender_id: message.sender_id,
    })
}

/// Text to quote above `reply`, or `None` when it is not a reply.
#[must_use]
pub fn quoted_snippet(reply: &Message) -> Option<String> {
    let snapshot = reply.reply_to.as_ref()?;
    let text = snapshot.content.as_deref().map(str::trim).filter(|t| !t.is_empty());
    Some(text.map_or_else(|| ATTACHMENT_ONLY_SNIPPET.to_owned(), truncate))
}

fn truncate(text: &str) -> String {
    match text.char_indices().nth(SNIPPET_MAX_CHARS) {
        Some((cut, _)) => format!("{}…", text[..cut].trim_end()),
        None => text.to_owned(),
    }
}

/// Number of messages in the conversation replying to `message_id`.
#[must_use]
pub fn reply_count(store: &ConversationStore, message_id: i64) -> usize {
    store.iter().filter(|m| m.reply_to_id == Some(message_id)).count()
}

/// Whether the parent of `reply` is still in the conversation (for jump-to).
#[must_use]
pub fn parent_available(store: &ConversationStore, reply: &Message) -> bool {
    reply.reply_to_id.is_some_and(|id| store.contains(MessageId::Server(id)))
}
