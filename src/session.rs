//! State of one open project conversation.
//!
//! DESIGN
//! ======
//! Everything scoped to the active project lives in one value that is built
//! when the project is selected and dropped when another one is: the message
//! store, typing presence, composer draft, team roster and load state. A
//! switch therefore cannot leak timers or messages into the next project.
//!
//! While a full fetch is in flight, message events are queued instead of
//! applied. The fetched list replaces the confirmed history and the queue is
//! replayed on top, so nothing that happened during the fetch is lost and
//! dedup keeps the replay from duplicating anything.

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;

use std::time::{Duration, Instant};

use tracing::debug;

use crate::mention;
use crate::presence::PresenceTracker;
use crate::reconcile::{self, EventOutcome, ReconciliationEngine};
use crate::store::ConversationStore;
use crate::transport::BroadcastEvent;
use crate::types::{Attachment, Draft, Message, ProjectId, ReplySnapshot, TeamMember};

/// Initial load progress of the conversation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadState {
    Loading,
    Ready,
    /// The initial list call failed; retryable by the user.
    Failed,
}

#[derive(Clone, Debug)]
pub struct ConversationSession {
    project_id: ProjectId,
    pub(crate) store: ConversationStore,
    pub(crate) presence: PresenceTracker,
    draft: Draft,
    roster: Vec<TeamMember>,
    load: LoadState,
    backlog: Option<Vec<BroadcastEvent>>,
}

impl ConversationSession {
    /// A fresh session waiting for its first fetch.
    #[must_use]
    pub fn new(project_id: ProjectId, local_name: &str, typing_idle: Duration, typing_ttl: Duration) -> Self {
        Self {
            project_id,
            store: ConversationStore::new(),
            presence: PresenceTracker::new(local_name, typing_idle, typing_ttl),
            draft: Draft::default(),
            roster: Vec::new(),
            load: LoadState::Loading,
            backlog: Some(Vec::new()),
        }
    }

    #[must_use]
    pub fn project_id(&self) -> ProjectId {
        self.project_id
    }

    #[must_use]
    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    #[must_use]
    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    #[must_use]
    pub fn load_state(&self) -> LoadState {
        self.load
    }

    #[must_use]
    pub fn is_fetching(&self) -> bool {
        self.backlog.is_some()
    }

    // =========================================================================
    // FETCH
    // =========================================================================

    /// A full fetch was issued (retry or resync). Message events queue up
    /// until it completes.
    pub fn begin_fetch(&mut self) {
        if self.load == LoadState::Failed {
            self.load = LoadState::Loading;
        }
        self.backlog.get_or_insert_with(Vec::new);
    }

    /// Install a fetched history and replay queued events on top of it.
    pub fn apply_fetch(&mut self, engine: &ReconciliationEngine, fetched: Vec<Message>) {
        reconcile::resync(&mut self.store, fetched);
        self.load = LoadState::Ready;
        self.replay_backlog(engine);
    }

    /// The fetch failed. Queued events are applied to whatever is loaded.
    pub fn fetch_failed(&mut self, engine: &ReconciliationEngine) {
        if self.load == LoadState::Loading {
            self.load = LoadState::Failed;
        }
        self.replay_backlog(engine);
    }

    fn replay_backlog(&mut self, engine: &ReconciliationEngine) {
        let backlog = self.backlog.take().unwrap_or_default();
        if !backlog.is_empty() {
            debug!(project_id = self.project_id, events = backlog.len(), "replaying events queued during fetch");
        }
        for event in &backlog {
            engine.apply_event(&mut self.store, self.project_id, event);
        }
    }

    // =========================================================================
    // EVENTS
    // =========================================================================

    /// Route a broadcast event of this project to the store or presence.
    /// Returns whether anything visible may have changed.
    pub fn on_event(&mut self, engine: &ReconciliationEngine, event: BroadcastEvent, now: Instant) -> bool {
        if event.project_id() != self.project_id {
            debug!(event_project = event.project_id(), project_id = self.project_id, "stale event dropped by session");
            return false;
        }

        match event {
            BroadcastEvent::Typing { user_name, .. } => self.presence.on_remote_typing(&user_name, now),
            BroadcastEvent::StopTyping { user_name, .. } => self.presence.on_remote_stop(user_name.as_deref()),
            BroadcastEvent::MentionCreated { .. } => false,
            message_event => {
                if let Some(backlog) = self.backlog.as_mut() {
                    backlog.push(message_event);
                    return false;
                }
                !matches!(
                    engine.apply_event(&mut self.store, self.project_id, &message_event),
                    EventOutcome::Stale | EventOutcome::NotMessage
                )
            }
        }
    }

    // =========================================================================
    // COMPOSER
    // =========================================================================

    #[must_use]
    pub fn draft(&self) -> &Draft {
        &self.draft
    }

    pub fn set_draft_content(&mut self, content: impl Into<String>) {
        self.draft.content = content.into();
    }

    /// Add an uploaded (or still uploading) file to the draft.
    pub fn attach(&mut self, attachment: Attachment) {
        self.draft.attachments.push(attachment);
    }

    pub fn set_reply_target(&mut self, snapshot: Option<ReplySnapshot>) {
        self.draft.reply_to = snapshot;
    }

    pub fn take_draft(&mut self) -> Draft {
        std::mem::take(&mut self.draft)
    }

    /// Put a failed send back into the composer. If the user already started
    /// a new draft, the restored text goes first and nothing is dropped.
    pub fn restore_draft(&mut self, restored: Draft) {
        self.draft = Draft::merge(restored, std::mem::take(&mut self.draft));
    }

    // =========================================================================
    // ROSTER
    // =========================================================================

    #[must_use]
    pub fn roster(&self) -> &[TeamMember] {
        &self.roster
    }

    pub fn set_roster(&mut self, roster: Vec<TeamMember>) {
        self.roster = roster;
    }

    /// Team members `@`-mentioned in `message`, for highlighting.
    #[must_use]
    pub fn mentioned_members(&self, message: &Message) -> Vec<&TeamMember> {
        message
            .content
            .as_deref()
            .map(|content| mention::find_mentions(&self.roster, content))
            .unwrap_or_default()
    }
}
