//! Reconciliation of confirmations arriving over two unordered channels.
//!
//! DESIGN
//! ======
//! One logical send is confirmed twice: by the sender's durable-call response
//! and by the room broadcast (which also reaches the sender). Neither channel
//! is ordered relative to the other, so correctness comes from identity:
//!
//! 1. an entry with the same server id exists: duplicate, no mutation;
//! 2. the message is ours and a pending optimistic entry exists: replace it
//!    in place, keeping its list position;
//! 3. otherwise: insert at the tail (by `created_at` for resync cases).
//!
//! A send that failed locally but was persisted anyway falls into rule 3 when
//! its broadcast arrives. That is accepted eventual consistency; the engine
//! never assumes exactly-once delivery.

#[cfg(test)]
#[path = "reconcile_test.rs"]
mod reconcile_test;

use tracing::{debug, trace};

use crate::store::ConversationStore;
use crate::transport::BroadcastEvent;
use crate::types::{Message, MessageId, ProjectId, TempId, UserId};

/// What [`merge_confirmed`] did with an incoming message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    /// An entry with this server id already exists.
    Duplicate,
    /// The server copy already existed, so the sender's own pending entry for
    /// it was dropped instead of being confirmed a second time.
    Superseded { temp_id: TempId },
    /// A pending optimistic entry was replaced in place at `index`.
    ReplacedPending { index: usize, temp_id: TempId },
    /// The message was inserted at `index`.
    Inserted { index: usize },
}

/// Merge a confirmed message into the store under the at-most-one-copy rule.
///
/// `hint` is the temporary id the sender's own durable call was issued for.
/// Broadcast confirmations pass `None` and can only claim a pending entry
/// whose text and reply target match; a send from another session of the
/// same user therefore falls through to rule 3 and is appended.
pub fn merge_confirmed(
    store: &mut ConversationStore,
    mut incoming: Message,
    local_user: UserId,
    hint: Option<TempId>,
) -> MergeOutcome {
    if store.contains(incoming.id) {
        if let Some(temp_id) = hint.filter(|t| is_pending(store, *t)) {
            store.remove(MessageId::Temp(temp_id));
            debug!(message_id = %incoming.id, %temp_id, "pending entry superseded by existing copy");
            return MergeOutcome::Superseded { temp_id };
        }
        debug!(message_id = %incoming.id, "duplicate confirmation ignored");
        return MergeOutcome::Duplicate;
    }

    if incoming.sender_id == local_user {
        let claimed = hint
            .filter(|t| is_pending(store, *t))
            .or_else(|| store.first_pending_like(local_user, &incoming));
        if let Some(temp_id) = claimed {
            match store.replace(MessageId::Temp(temp_id), incoming) {
                Ok(index) => {
                    trace!(%temp_id, index, "pending entry confirmed in place");
                    return MergeOutcome::ReplacedPending { index, temp_id };
                }
                Err(unclaimed) => incoming = unclaimed,
            }
        }
    }

    let index = store.insert_by_created_at(incoming);
    MergeOutcome::Inserted { index }
}

fn is_pending(store: &ConversationStore, temp_id: TempId) -> bool {
    store.get(MessageId::Temp(temp_id)).is_some_and(Message::is_pending)
}

/// Apply an edit confirmation. No-op when the id is not present yet; the
/// next full fetch will carry the edited content.
pub fn apply_update(store: &mut ConversationStore, updated: &Message) -> bool {
    let Some(entry) = store.get_mut(updated.id) else {
        debug!(message_id = %updated.id, "update for unknown message ignored");
        return false;
    };
    entry.content.clone_from(&updated.content);
    entry.attachments.clone_from(&updated.attachments);
    entry.is_edited |= updated.is_edited;
    true
}

/// Apply a delete confirmation. No-op when the id is not present.
pub fn apply_delete(store: &mut ConversationStore, message_id: i64) -> bool {
    store.remove(MessageId::Server(message_id)).is_some()
}

/// Replace the confirmed contents of the store with a full fetch, keeping
/// still-pending optimistic entries after the fetched history in their
/// original order. Their confirmations later merge through the usual rules.
pub fn resync(store: &mut ConversationStore, mut fetched: Vec<Message>) {
    fetched.sort_by_key(|m| m.created_at);

    let mut rebuilt = ConversationStore::new();
    for message in fetched {
        if !rebuilt.contains(message.id) {
            rebuilt.push(message);
        }
    }
    for message in store.iter().filter(|m| m.is_pending()) {
        rebuilt.push(message.clone());
    }
    *store = rebuilt;
}

/// Stateless application of broadcast events to the active conversation.
#[derive(Clone, Copy, Debug)]
pub struct ReconciliationEngine {
    local_user: UserId,
}

/// Result of feeding one broadcast event to the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventOutcome {
    /// The event belongs to a different project than the active one.
    Stale,
    /// The event does not touch the message list (typing, mentions).
    NotMessage,
    Merged(MergeOutcome),
    Updated(bool),
    Deleted(bool),
}

impl ReconciliationEngine {
    #[must_use]
    pub fn new(local_user: UserId) -> Self {
        Self { local_user }
    }

    #[must_use]
    pub fn local_user(&self) -> UserId {
        self.local_user
    }

    /// Merge a durable-call confirmation for our own send.
    pub fn confirm_own(&self, store: &mut ConversationStore, message: Message, temp_id: TempId) -> MergeOutcome {
        merge_confirmed(store, message, self.local_user, Some(temp_id))
    }

    /// Apply a broadcast event to the conversation of `active_project`.
    ///
    /// Events whose project id does not match are dropped, so a late event
    /// from a room we just left never lands in the newly active conversation.
    pub fn apply_event(
        &self,
        store: &mut ConversationStore,
        active_project: ProjectId,
        event: &BroadcastEvent,
    ) -> EventOutcome {
        if event.project_id() != active_project {
            debug!(
                event_project = event.project_id(),
                active_project, "stale broadcast event dropped"
            );
            return EventOutcome::Stale;
        }

        match event {
            BroadcastEvent::MessageCreated { message, .. } => {
                EventOutcome::Merged(merge_confirmed(store, message.clone(), self.local_user, None))
            }
            BroadcastEvent::MessageUpdated { message, .. } => EventOutcome::Updated(apply_update(store, message)),
            BroadcastEvent::MessageDeleted { message_id, .. } => {
                EventOutcome::Deleted(apply_delete(store, *message_id))
            }
            BroadcastEvent::Typing { .. }
            | BroadcastEvent::StopTyping { .. }
            | BroadcastEvent::MentionCreated { .. } => EventOutcome::NotMessage,
        }
    }
}
