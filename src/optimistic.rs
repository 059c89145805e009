//! Optimistic send, edit and delete with rollback.
//!
//! DESIGN
//! ======
//! Every user action mutates the store first and then hands a request to the
//! caller, who performs the durable call and feeds the result back through
//! the matching `complete_*` method. In-flight actions are tracked by an
//! [`ActionTicket`] so each completion finds exactly the snapshot it needs to
//! confirm or roll back, independent of what happened to the store meanwhile.
//!
//! ERROR HANDLING
//! ==============
//! Nothing is retried. A failed send removes the pending entry and returns
//! the draft; a failed edit or delete restores the pre-mutation snapshot.
//! A completion whose project is no longer displayed is settled against a
//! detached, empty store: the rollback is moot but the error and the draft
//! still come back.

#[cfg(test)]
#[path = "optimistic_test.rs"]
mod optimistic_test;

use std::collections::HashMap;
use std::fmt;

use tracing::{debug, warn};

use crate::api::ApiError;
use crate::error::ChatError;
use crate::reconcile::{self, MergeOutcome, ReconciliationEngine};
use crate::store::ConversationStore;
use crate::types::{DeliveryState, Draft, LocalUser, Message, MessageId, ProjectId, TempId};
use crate::wire::{AttachmentRecord, ReplyRecord, SendBody};

/// Handle of one in-flight durable call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ActionTicket(pub u64);

impl fmt::Display for ActionTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "act-{}", self.0)
    }
}

/// Durable send to issue after [`OptimisticSendCoordinator::begin_send`].
#[derive(Clone, Debug, PartialEq)]
pub struct SendRequest {
    pub ticket: ActionTicket,
    pub project_id: ProjectId,
    pub temp_id: TempId,
    pub body: SendBody,
}

/// Durable update to issue after [`OptimisticSendCoordinator::begin_edit`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EditRequest {
    pub ticket: ActionTicket,
    pub project_id: ProjectId,
    pub message_id: i64,
    pub content: String,
}

/// Durable delete to issue after [`OptimisticSendCoordinator::begin_delete`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeleteRequest {
    pub ticket: ActionTicket,
    pub project_id: ProjectId,
    pub message_id: i64,
}

#[derive(Clone, Debug)]
enum InFlight {
    Send { project_id: ProjectId, temp_id: TempId, draft: Draft },
    Edit { project_id: ProjectId, message_id: i64, prior: Message, applied: Option<String> },
    Delete { project_id: ProjectId, index: usize, prior: Message },
}

impl InFlight {
    fn project_id(&self) -> ProjectId {
        match self {
            Self::Send { project_id, .. } | Self::Edit { project_id, .. } | Self::Delete { project_id, .. } => {
                *project_id
            }
        }
    }

    fn targets(&self, message_id: i64) -> bool {
        match self {
            Self::Send { .. } => false,
            Self::Edit { message_id: id, .. } => *id == message_id,
            Self::Delete { prior, .. } => prior.id == MessageId::Server(message_id),
        }
    }
}

/// Result of feeding a durable-call result back to the coordinator.
#[derive(Debug)]
pub enum Completion {
    /// The send was confirmed and merged.
    Sent(MergeOutcome),
    /// The edit or delete was confirmed.
    Applied,
    /// The send failed: the pending entry was removed (`failed` carries it,
    /// tagged [`DeliveryState::Failed`]) and `draft` should be restored.
    SendRolledBack { failed: Message, draft: Draft, error: ChatError },
    /// The edit or delete failed. `restored` is false when a newer change
    /// already replaced the optimistic state and was left untouched.
    RolledBack { restored: bool, error: ChatError },
    /// No in-flight action has this ticket.
    Unknown,
}

pub struct OptimisticSendCoordinator {
    user: LocalUser,
    next_temp: u64,
    next_ticket: u64,
    in_flight: HashMap<ActionTicket, InFlight>,
}

impl OptimisticSendCoordinator {
    #[must_use]
    pub fn new(user: LocalUser) -> Self {
        Self { user, next_temp: 0, next_ticket: 0, in_flight: HashMap::new() }
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Project an in-flight action was issued for.
    #[must_use]
    pub fn project_of(&self, ticket: ActionTicket) -> Option<ProjectId> {
        self.in_flight.get(&ticket).map(InFlight::project_id)
    }

    /// Whether an edit or delete of `message_id` is awaiting its durable call.
    #[must_use]
    pub fn is_busy(&self, message_id: i64) -> bool {
        self.in_flight.values().any(|action| action.targets(message_id))
    }

    // =========================================================================
    // SEND
    // =========================================================================

    /// Append a pending entry for `draft` and return the durable call to make.
    ///
    /// # Errors
    ///
    /// [`ChatError::EmptyMessage`] when the draft has neither text nor attachments.
    pub fn begin_send(
        &mut self,
        store: &mut ConversationStore,
        project_id: ProjectId,
        draft: Draft,
        now_ms: i64,
    ) -> Result<SendRequest, ChatError> {
        if draft.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        self.next_temp += 1;
        let temp_id = TempId(self.next_temp);
        let ticket = self.ticket();

        let text = draft.content.trim();
        let content = (!text.is_empty()).then(|| text.to_owned());
        store.push(Message {
            id: MessageId::Temp(temp_id),
            project_id,
            sender_id: self.user.id,
            sender_name: self.user.name.clone(),
            content: content.clone(),
            attachments: draft.attachments.clone(),
            created_at: now_ms,
            is_edited: false,
            reply_to_id: draft.reply_to.as_ref().map(|r| r.id),
            reply_to: draft.reply_to.clone(),
            delivery: DeliveryState::Pending,
        });

        let body = SendBody {
            content,
            attachments: draft.attachments.iter().map(AttachmentRecord::from).collect(),
            reply_to_message_id: draft.reply_to.as_ref().map(|r| r.id),
            reply_to: draft.reply_to.as_ref().map(ReplyRecord::from),
        };
        self.in_flight.insert(ticket, InFlight::Send { project_id, temp_id, draft });
        Ok(SendRequest { ticket, project_id, temp_id, body })
    }

    /// Feed the durable send result back. Confirmation goes through the
    /// reconciliation engine; failure removes the pending entry.
    pub fn complete_send(
        &mut self,
        store: &mut ConversationStore,
        engine: &ReconciliationEngine,
        ticket: ActionTicket,
        result: Result<Message, ApiError>,
    ) -> Completion {
        let Some(InFlight::Send { project_id, temp_id, draft }) = self.take_matching(ticket, |a| {
            matches!(a, InFlight::Send { .. })
        }) else {
            return Completion::Unknown;
        };

        match result {
            Ok(message) => Completion::Sent(engine.confirm_own(store, message, temp_id)),
            Err(source) => {
                warn!(project_id, %temp_id, error = %source, "send failed; rolling back");
                let mut failed = store
                    .remove(MessageId::Temp(temp_id))
                    .map(|(_, message)| message)
                    .unwrap_or_else(|| self.placeholder(project_id, temp_id, &draft));
                failed.delivery = DeliveryState::Failed;
                Completion::SendRolledBack { failed, draft, error: ChatError::SendFailed { project_id, source } }
            }
        }
    }

    // =========================================================================
    // EDIT
    // =========================================================================

    /// Apply the new content locally and return the durable call to make.
    ///
    /// # Errors
    ///
    /// Fails when the message is unknown, not ours, already busy, or the new
    /// content is empty.
    pub fn begin_edit(
        &mut self,
        store: &mut ConversationStore,
        message_id: i64,
        content: &str,
    ) -> Result<EditRequest, ChatError> {
        let content = content.trim();
        let prior = self.editable(store, message_id)?.clone();
        if content.is_empty() && prior.attachments.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let applied = (!content.is_empty()).then(|| content.to_owned());
        if let Some(entry) = store.get_mut(MessageId::Server(message_id)) {
            entry.content.clone_from(&applied);
            entry.is_edited = true;
        }

        let ticket = self.ticket();
        let project_id = prior.project_id;
        self.in_flight.insert(ticket, InFlight::Edit { project_id, message_id, prior, applied });
        Ok(EditRequest { ticket, project_id, message_id, content: content.to_owned() })
    }

    /// Feed the durable update result back.
    pub fn complete_edit(
        &mut self,
        store: &mut ConversationStore,
        ticket: ActionTicket,
        result: Result<Message, ApiError>,
    ) -> Completion {
        let Some(InFlight::Edit { message_id, prior, applied, .. }) =
            self.take_matching(ticket, |a| matches!(a, InFlight::Edit { .. }))
        else {
            return Completion::Unknown;
        };

        match result {
            Ok(updated) => {
                reconcile::apply_update(store, &updated);
                Completion::Applied
            }
            Err(source) => {
                let restored = match store.get_mut(MessageId::Server(message_id)) {
                    Some(entry) if entry.content == applied => {
                        entry.content = prior.content;
                        entry.is_edited = prior.is_edited;
                        true
                    }
                    _ => false,
                };
                warn!(message_id, restored, error = %source, "edit failed; rolling back");
                Completion::RolledBack { restored, error: ChatError::EditFailed { message_id, source } }
            }
        }
    }

    // =========================================================================
    // DELETE
    // =========================================================================

    /// Remove the message locally and return the durable call to make.
    ///
    /// # Errors
    ///
    /// Fails when the message is unknown, not ours, or already busy.
    pub fn begin_delete(&mut self, store: &mut ConversationStore, message_id: i64) -> Result<DeleteRequest, ChatError> {
        self.editable(store, message_id)?;
        let Some((index, prior)) = store.remove(MessageId::Server(message_id)) else {
            return Err(ChatError::UnknownMessage(MessageId::Server(message_id)));
        };

        let ticket = self.ticket();
        let project_id = prior.project_id;
        self.in_flight.insert(ticket, InFlight::Delete { project_id, index, prior });
        Ok(DeleteRequest { ticket, project_id, message_id })
    }

    /// Feed the durable delete result back.
    pub fn complete_delete(
        &mut self,
        store: &mut ConversationStore,
        ticket: ActionTicket,
        result: Result<(), ApiError>,
    ) -> Completion {
        let Some(InFlight::Delete { index, prior, .. }) =
            self.take_matching(ticket, |a| matches!(a, InFlight::Delete { .. }))
        else {
            return Completion::Unknown;
        };

        let message_id = prior.id.server().unwrap_or_default();
        match result {
            Ok(()) => {
                if store.remove(prior.id).is_some() {
                    debug!(message_id, "deleted message reappeared during the call; removed again");
                }
                Completion::Applied
            }
            Err(source) => {
                let restored = !store.contains(prior.id);
                if restored {
                    store.insert_at(index, prior);
                }
                warn!(message_id, restored, error = %source, "delete failed; rolling back");
                Completion::RolledBack { restored, error: ChatError::DeleteFailed { message_id, source } }
            }
        }
    }

    fn ticket(&mut self) -> ActionTicket {
        self.next_ticket += 1;
        ActionTicket(self.next_ticket)
    }

    fn take_matching(&mut self, ticket: ActionTicket, kind: impl Fn(&InFlight) -> bool) -> Option<InFlight> {
        if !self.in_flight.get(&ticket).is_some_and(kind) {
            return None;
        }
        self.in_flight.remove(&ticket)
    }

    fn editable<'a>(&self, store: &'a ConversationStore, message_id: i64) -> Result<&'a Message, ChatError> {
        let id = MessageId::Server(message_id);
        let message = store.get(id).ok_or(ChatError::UnknownMessage(id))?;
        if message.sender_id != self.user.id {
            return Err(ChatError::NotOwner(message_id));
        }
        if self.is_busy(message_id) {
            return Err(ChatError::ActionInFlight(message_id));
        }
        Ok(message)
    }

    /// Stand-in when the pending entry is already gone at failure time (a
    /// broadcast with the same text from another session claimed it).
    fn placeholder(&self, project_id: ProjectId, temp_id: TempId, draft: &Draft) -> Message {
        Message {
            id: MessageId::Temp(temp_id),
            project_id,
            sender_id: self.user.id,
            sender_name: self.user.name.clone(),
            content: Some(draft.content.clone()),
            attachments: draft.attachments.clone(),
            created_at: 0,
            is_edited: false,
            reply_to_id: draft.reply_to.as_ref().map(|r| r.id),
            reply_to: draft.reply_to.clone(),
            delivery: DeliveryState::Failed,
        }
    }
}
