//! Conversation core: one aggregate that turns user actions, broadcast
//! events and durable-call results into state changes plus effects.
//!
//! ARCHITECTURE
//! ============
//! [`ChatState`] performs no I/O. Every input returns the [`Effect`]s the
//! driver has to carry out, and the driver feeds their outcomes back as
//! [`CallResult`]s. Any interleaving of the two confirmation channels can
//! therefore be replayed in a plain unit test.
//!
//! ```text
//! user action ──┐                      ┌── Effect::Send / Edit / Fetch ...
//! broadcast  ───┼──► ChatState ────────┤
//! call result ──┘                      └── ChatView (rendered snapshot)
//! ```
//!
//! TRADE-OFFS
//! ==========
//! Results for a project that is no longer displayed are settled against a
//! detached store. Their rollback has nothing to act on, but a failed send
//! still parks its draft for the next visit and every failure still raises a
//! notice. A successful late result is simply dropped; the next full fetch
//! of that project shows it.

#[cfg(test)]
#[path = "chat_test.rs"]
mod chat_test;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::api::ApiError;
use crate::config::ChatConfig;
use crate::error::{ChatError, ErrorCode, Notice};
use crate::mention::MentionTracker;
use crate::optimistic::{ActionTicket, Completion, DeleteRequest, EditRequest, OptimisticSendCoordinator, SendRequest};
use crate::reconcile::ReconciliationEngine;
use crate::reply;
use crate::session::{ConversationSession, LoadState};
use crate::store::ConversationStore;
use crate::transport::{BroadcastEvent, TransportEvent, TypingSignal};
use crate::types::{Attachment, Draft, LocalUser, Message, MessageId, ProjectId, TeamMember};

/// Side effect requested by [`ChatState`]. The driver performs it and reports
/// back through [`ChatState::on_result`] where a result exists.
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    /// Make `project_id` the one subscribed room.
    Subscribe(ProjectId),
    /// Re-join the subscribed room on a fresh connection.
    Resubscribe,
    /// The connection dropped and room membership with it.
    ConnectionLost,
    /// Full history fetch. Only the result carrying the latest `seq` is applied.
    Fetch { project_id: ProjectId, seq: u64 },
    Send(SendRequest),
    Edit(EditRequest),
    Delete(DeleteRequest),
    /// Fire-and-forget typing signal.
    Typing { project_id: ProjectId, signal: TypingSignal },
    MarkMentionsViewed(ProjectId),
    ListMentions,
    RememberProject(ProjectId),
}

/// Outcome of an effect, fed back into [`ChatState::on_result`].
#[derive(Debug)]
pub enum CallResult {
    Subscribed { project_id: ProjectId, result: Result<(), ChatError> },
    Fetched { project_id: ProjectId, seq: u64, result: Result<Vec<Message>, ApiError> },
    Sent { ticket: ActionTicket, result: Result<Message, ApiError> },
    Edited { ticket: ActionTicket, result: Result<Message, ApiError> },
    Deleted { ticket: ActionTicket, result: Result<(), ApiError> },
    MentionsViewed { project_id: ProjectId, result: Result<(), ApiError> },
    MentionsListed(Result<Vec<ProjectId>, ApiError>),
}

/// Render snapshot of the whole chat surface.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChatView {
    pub project_id: Option<ProjectId>,
    pub load: Option<LoadState>,
    pub messages: Vec<Message>,
    /// "Bo is typing…" style indicator.
    pub typing: Option<String>,
    pub draft: Draft,
    pub notice: Option<Notice>,
    pub unread_mentions: Vec<ProjectId>,
    pub connected: bool,
    /// Sends, edits and deletes awaiting their durable call.
    pub in_flight: usize,
}

pub struct ChatState {
    user: LocalUser,
    engine: ReconciliationEngine,
    coordinator: OptimisticSendCoordinator,
    mentions: MentionTracker,
    session: Option<ConversationSession>,
    /// Drafts of projects that are not displayed, restored on the next visit.
    parked_drafts: HashMap<ProjectId, Draft>,
    notice: Option<Notice>,
    connected: bool,
    /// The last join of the active project's room was rejected.
    join_failed: bool,
    next_fetch: u64,
    awaited_fetch: Option<u64>,
    typing_idle: Duration,
    typing_ttl: Duration,
}

impl ChatState {
    #[must_use]
    pub fn new(user: LocalUser, typing_idle: Duration, typing_ttl: Duration) -> Self {
        Self {
            engine: ReconciliationEngine::new(user.id),
            coordinator: OptimisticSendCoordinator::new(user.clone()),
            user,
            mentions: MentionTracker::new(),
            session: None,
            parked_drafts: HashMap::new(),
            notice: None,
            connected: false,
            join_failed: false,
            next_fetch: 0,
            awaited_fetch: None,
            typing_idle,
            typing_ttl,
        }
    }

    #[must_use]
    pub fn from_config(config: &ChatConfig) -> Self {
        Self::new(config.user.clone(), config.typing_idle, config.typing_ttl)
    }

    #[must_use]
    pub fn user(&self) -> &LocalUser {
        &self.user
    }

    #[must_use]
    pub fn active_project(&self) -> Option<ProjectId> {
        self.session.as_ref().map(ConversationSession::project_id)
    }

    #[must_use]
    pub fn session(&self) -> Option<&ConversationSession> {
        self.session.as_ref()
    }

    #[must_use]
    pub fn mentions(&self) -> &MentionTracker {
        &self.mentions
    }

    #[must_use]
    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Durable calls issued and not yet answered.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.coordinator.in_flight()
    }

    #[must_use]
    pub fn view(&self) -> ChatView {
        let session = self.session.as_ref();
        ChatView {
            project_id: self.active_project(),
            load: session.map(ConversationSession::load_state),
            messages: session.map(|s| s.store().messages().to_vec()).unwrap_or_default(),
            typing: session.and_then(|s| s.presence().indicator_text()),
            draft: session.map(|s| s.draft().clone()).unwrap_or_default(),
            notice: self.notice.clone(),
            unread_mentions: self.mentions.unread_projects().collect(),
            connected: self.connected,
            in_flight: self.coordinator.in_flight(),
        }
    }

    // =========================================================================
    // PROJECT SELECTION
    // =========================================================================

    /// Open `project_id`, tearing down the previous conversation. Selecting
    /// the open project again only retries a rejected room join.
    pub fn select_project(&mut self, project_id: ProjectId) -> Vec<Effect> {
        if self.active_project() == Some(project_id) {
            if !std::mem::take(&mut self.join_failed) {
                return Vec::new();
            }
            info!(project_id, "retrying room join");
            return vec![Effect::Subscribe(project_id)];
        }

        let mut effects = Vec::new();
        if let Some(mut previous) = self.session.take() {
            let previous_id = previous.project_id();
            if let Some(signal) = previous.presence.on_local_submit() {
                effects.push(Effect::Typing { project_id: previous_id, signal });
            }
            let draft = previous.take_draft();
            if !draft.is_empty() || draft.reply_to.is_some() {
                self.park_draft(previous_id, draft);
            }
        }

        let mut session = ConversationSession::new(project_id, &self.user.name, self.typing_idle, self.typing_ttl);
        if let Some(draft) = self.parked_drafts.remove(&project_id) {
            session.restore_draft(draft);
        }
        self.session = Some(session);
        self.join_failed = false;
        self.mentions.open(project_id);
        info!(project_id, "project selected");

        effects.push(Effect::Subscribe(project_id));
        effects.push(self.issue_fetch(project_id));
        effects.push(Effect::MarkMentionsViewed(project_id));
        effects.push(Effect::RememberProject(project_id));
        effects
    }

    /// Re-issue the full fetch after a failed load.
    ///
    /// # Errors
    ///
    /// [`ChatError::NoActiveProject`] when no project is open.
    pub fn retry_fetch(&mut self) -> Result<Vec<Effect>, ChatError> {
        let project_id = self.active_project().ok_or(ChatError::NoActiveProject)?;
        if self.awaited_fetch.is_some() {
            debug!(project_id, "fetch already in flight");
            return Ok(Vec::new());
        }
        Ok(vec![self.issue_fetch(project_id)])
    }

    /// Ask for the mentioned-projects list again.
    #[must_use]
    pub fn refresh_mentions(&self) -> Vec<Effect> {
        vec![Effect::ListMentions]
    }

    fn issue_fetch(&mut self, project_id: ProjectId) -> Effect {
        self.next_fetch += 1;
        self.awaited_fetch = Some(self.next_fetch);
        if let Some(session) = self.session.as_mut() {
            session.begin_fetch();
        }
        Effect::Fetch { project_id, seq: self.next_fetch }
    }

    // =========================================================================
    // COMPOSER
    // =========================================================================

    /// Replace the composer text. Emits typing start on the first keystroke
    /// and typing stop when the composer is cleared.
    ///
    /// # Errors
    ///
    /// [`ChatError::NoActiveProject`] when no project is open.
    pub fn set_draft(&mut self, content: &str, now: Instant) -> Result<Vec<Effect>, ChatError> {
        let session = self.session.as_mut().ok_or(ChatError::NoActiveProject)?;
        session.set_draft_content(content);
        let signal = if content.trim().is_empty() {
            session.presence.on_local_submit()
        } else {
            session.presence.on_local_keystroke(now)
        };
        let project_id = session.project_id();
        Ok(signal.map(|signal| Effect::Typing { project_id, signal }).into_iter().collect())
    }

    /// # Errors
    ///
    /// [`ChatError::NoActiveProject`] when no project is open.
    pub fn attach(&mut self, attachment: Attachment) -> Result<(), ChatError> {
        let session = self.session.as_mut().ok_or(ChatError::NoActiveProject)?;
        session.attach(attachment);
        Ok(())
    }

    /// Set or clear the message the draft replies to.
    ///
    /// # Errors
    ///
    /// Fails when no project is open or the parent cannot be quoted.
    pub fn reply_to(&mut self, parent: Option<MessageId>) -> Result<(), ChatError> {
        let session = self.session.as_mut().ok_or(ChatError::NoActiveProject)?;
        let snapshot = parent.map(|id| reply::capture(session.store(), id)).transpose()?;
        session.set_reply_target(snapshot);
        Ok(())
    }

    /// Send the composer contents optimistically.
    ///
    /// # Errors
    ///
    /// Fails when no project is open or the draft is empty. The draft is left
    /// in the composer in both cases.
    pub fn submit(&mut self, now_ms: i64) -> Result<Vec<Effect>, ChatError> {
        let session = self.session.as_mut().ok_or(ChatError::NoActiveProject)?;
        let project_id = session.project_id();
        let draft = session.take_draft();

        let request = match self.coordinator.begin_send(&mut session.store, project_id, draft.clone(), now_ms) {
            Ok(request) => request,
            Err(e) => {
                session.restore_draft(draft);
                return Err(e);
            }
        };

        let mut effects = Vec::with_capacity(2);
        if let Some(signal) = session.presence.on_local_submit() {
            effects.push(Effect::Typing { project_id, signal });
        }
        debug!(project_id, temp_id = %request.temp_id, "send issued");
        effects.push(Effect::Send(request));
        Ok(effects)
    }

    /// Edit one of our own messages optimistically.
    ///
    /// # Errors
    ///
    /// Fails when no project is open or the edit is not allowed.
    pub fn edit(&mut self, message_id: i64, content: &str) -> Result<Vec<Effect>, ChatError> {
        let session = self.session.as_mut().ok_or(ChatError::NoActiveProject)?;
        let request = self.coordinator.begin_edit(&mut session.store, message_id, content)?;
        Ok(vec![Effect::Edit(request)])
    }

    /// Delete one of our own messages optimistically.
    ///
    /// # Errors
    ///
    /// Fails when no project is open or the delete is not allowed.
    pub fn delete(&mut self, message_id: i64) -> Result<Vec<Effect>, ChatError> {
        let session = self.session.as_mut().ok_or(ChatError::NoActiveProject)?;
        let request = self.coordinator.begin_delete(&mut session.store, message_id)?;
        Ok(vec![Effect::Delete(request)])
    }

    /// # Errors
    ///
    /// [`ChatError::NoActiveProject`] when no project is open.
    pub fn set_roster(&mut self, roster: Vec<TeamMember>) -> Result<(), ChatError> {
        let session = self.session.as_mut().ok_or(ChatError::NoActiveProject)?;
        session.set_roster(roster);
        Ok(())
    }

    pub fn dismiss_notice(&mut self) {
        self.notice = None;
    }

    /// Advance presence timers.
    pub fn tick(&mut self, now: Instant) -> Vec<Effect> {
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        let project_id = session.project_id();
        session
            .presence
            .tick(now)
            .map(|signal| Effect::Typing { project_id, signal })
            .into_iter()
            .collect()
    }

    // =========================================================================
    // TRANSPORT EVENTS
    // =========================================================================

    pub fn on_transport(&mut self, event: TransportEvent, now: Instant) -> Vec<Effect> {
        match event {
            TransportEvent::Connected { reconnect } => {
                self.connected = true;
                let mut effects = vec![Effect::ListMentions];
                if let Some(project_id) = self.active_project() {
                    effects.push(Effect::Resubscribe);
                    if reconnect {
                        info!(project_id, "reconnected; resyncing conversation");
                        effects.push(self.issue_fetch(project_id));
                    }
                }
                effects
            }
            TransportEvent::Disconnected => {
                self.connected = false;
                vec![Effect::ConnectionLost]
            }
            TransportEvent::Broadcast(BroadcastEvent::MentionCreated { project_id }) => {
                if self.mentions.on_mention_created(project_id) {
                    vec![Effect::MarkMentionsViewed(project_id)]
                } else {
                    Vec::new()
                }
            }
            TransportEvent::Broadcast(event) => {
                match self.session.as_mut() {
                    Some(session) => {
                        session.on_event(&self.engine, event, now);
                    }
                    None => debug!(project_id = event.project_id(), "event without open project dropped"),
                }
                Vec::new()
            }
        }
    }

    // =========================================================================
    // CALL RESULTS
    // =========================================================================

    pub fn on_result(&mut self, result: CallResult) -> Vec<Effect> {
        match result {
            CallResult::Subscribed { project_id, result } => self.on_subscribed(project_id, result),
            CallResult::Fetched { project_id, seq, result } => self.on_fetched(project_id, seq, result),
            CallResult::Sent { ticket, result } => self.on_sent(ticket, result),
            CallResult::Edited { ticket, result } => {
                let settled = self.settle(ticket, |coordinator, store, _| coordinator.complete_edit(store, ticket, result));
                self.report_rollback(settled);
            }
            CallResult::Deleted { ticket, result } => {
                let settled =
                    self.settle(ticket, |coordinator, store, _| coordinator.complete_delete(store, ticket, result));
                self.report_rollback(settled);
            }
            CallResult::MentionsViewed { project_id, result } => match result {
                Ok(()) => self.mentions.mark_viewed_succeeded(project_id),
                Err(source) => {
                    self.mentions.mark_viewed_failed(project_id);
                    self.raise(ChatError::MentionClearFailed { project_id, source });
                }
            },
            CallResult::MentionsListed(Ok(projects)) => self.mentions.refresh(projects),
            CallResult::MentionsListed(Err(e)) => {
                warn!(error = %e, error_code = e.error_code(), "mention list failed");
            }
        }
        Vec::new()
    }

    fn on_subscribed(&mut self, project_id: ProjectId, result: Result<(), ChatError>) {
        match result {
            Ok(()) if self.active_project() == Some(project_id) => {
                self.join_failed = false;
                if self.notice.as_ref().is_some_and(|n| n.code == "E_SUBSCRIPTION_FAILED") {
                    self.notice = None;
                }
            }
            Ok(()) => {}
            Err(e) if self.active_project() == Some(project_id) => {
                self.join_failed = true;
                self.raise(e);
            }
            Err(e) => debug!(project_id, error = %e, "join failure for inactive project ignored"),
        }
    }

    fn on_fetched(&mut self, project_id: ProjectId, seq: u64, result: Result<Vec<Message>, ApiError>) {
        let current = self.awaited_fetch == Some(seq) && self.active_project() == Some(project_id);
        let Some(session) = self.session.as_mut().filter(|_| current) else {
            debug!(project_id, seq, "superseded fetch result dropped");
            return;
        };
        self.awaited_fetch = None;

        match result {
            Ok(messages) => {
                info!(project_id, count = messages.len(), "conversation loaded");
                session.apply_fetch(&self.engine, messages);
            }
            Err(source) => {
                session.fetch_failed(&self.engine);
                self.raise(ChatError::FetchFailed { project_id, source });
            }
        }
    }

    fn on_sent(&mut self, ticket: ActionTicket, result: Result<Message, ApiError>) {
        let settled = self.settle(ticket, |coordinator, store, engine| {
            coordinator.complete_send(store, engine, ticket, result)
        });
        let Some((project_id, Completion::SendRolledBack { failed, draft, error })) = settled else {
            return;
        };
        debug!(project_id, message_id = %failed.id, "send rolled back");
        match self.session.as_mut().filter(|s| s.project_id() == project_id) {
            Some(session) => session.restore_draft(draft),
            None => self.park_draft(project_id, draft),
        }
        self.raise(error);
    }

    fn report_rollback(&mut self, settled: Option<(ProjectId, Completion)>) {
        if let Some((project_id, Completion::RolledBack { restored, error })) = settled {
            debug!(project_id, restored, "optimistic change rolled back");
            self.raise(error);
        }
    }

    /// Run a completion against the active store, or a detached one when the
    /// ticket's project is no longer displayed.
    fn settle(
        &mut self,
        ticket: ActionTicket,
        complete: impl FnOnce(
            &mut OptimisticSendCoordinator,
            &mut ConversationStore,
            &ReconciliationEngine,
        ) -> Completion,
    ) -> Option<(ProjectId, Completion)> {
        let Some(project_id) = self.coordinator.project_of(ticket) else {
            debug!(%ticket, "result for unknown ticket ignored");
            return None;
        };

        let completion = match self.session.as_mut().filter(|s| s.project_id() == project_id) {
            Some(session) => complete(&mut self.coordinator, &mut session.store, &self.engine),
            None => {
                debug!(%ticket, project_id, "settling result of inactive project");
                complete(&mut self.coordinator, &mut ConversationStore::new(), &self.engine)
            }
        };
        Some((project_id, completion))
    }

    fn park_draft(&mut self, project_id: ProjectId, draft: Draft) {
        let parked = self.parked_drafts.entry(project_id).or_default();
        *parked = Draft::merge(draft, std::mem::take(parked));
        debug!(project_id, "draft parked");
    }

    fn raise(&mut self, error: ChatError) {
        warn!(error = %error, error_code = error.error_code(), retryable = error.retryable(), "chat operation failed");
        if error.is_user_visible() {
            self.notice = Some(Notice::from(&error));
        }
    }
}
