//! Async driver around [`ChatState`].
//!
//! DESIGN
//! ======
//! One task owns the state and serializes every input through a `select!`
//! loop: user commands, transport events, results of durable calls and a
//! presence tick. Effects are executed by the loop itself:
//!
//! - durable calls are spawned, and their results come back on a channel;
//! - room subscription changes are awaited inline, so at most one join or
//!   leave is ever in progress;
//! - typing signals are fire-and-forget.
//!
//! After every input the rendered [`ChatView`] is published on a `watch`
//! channel. Dropping every [`ChatHandle`] stops the loop, which leaves the
//! joined room on the way out.

#[cfg(test)]
#[path = "client_test.rs"]
mod client_test;

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace};

use crate::api::MessageApi;
use crate::chat::{CallResult, ChatState, ChatView, Effect};
use crate::config::ChatConfig;
use crate::error::{ChatError, ErrorCode};
use crate::prefs::PrefsStore;
use crate::subscription::RoomSubscriptionManager;
use crate::transport::{RoomTransport, TransportEvent};
use crate::types::{Attachment, MessageId, ProjectId, TeamMember};

/// Cadence of presence timers (typing idle and expiry).
pub const TICK_INTERVAL: Duration = Duration::from_millis(250);

const COMMAND_QUEUE: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Chat(#[from] ChatError),
    #[error("chat client has stopped")]
    Stopped,
}

impl ErrorCode for ClientError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Chat(e) => e.error_code(),
            Self::Stopped => "E_CLIENT_STOPPED",
        }
    }
}

#[derive(Debug)]
enum Command {
    SelectProject(ProjectId),
    SetDraft(String),
    Attach(Attachment),
    ReplyTo(Option<MessageId>),
    Submit,
    Edit { message_id: i64, content: String },
    Delete { message_id: i64 },
    RetryFetch,
    RefreshMentions,
    SetRoster(Vec<TeamMember>),
    DismissNotice,
}

struct Request {
    command: Command,
    reply: oneshot::Sender<Result<(), ChatError>>,
}

/// Cloneable front end of a running chat client.
#[derive(Clone)]
pub struct ChatHandle {
    commands: mpsc::Sender<Request>,
    view: watch::Receiver<ChatView>,
}

impl ChatHandle {
    /// Latest rendered snapshot.
    #[must_use]
    pub fn view(&self) -> ChatView {
        self.view.borrow().clone()
    }

    /// Receiver notified on every published snapshot.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<ChatView> {
        self.view.clone()
    }

    /// # Errors
    ///
    /// [`ClientError::Stopped`] when the client task is gone.
    pub async fn select_project(&self, project_id: ProjectId) -> Result<(), ClientError> {
        self.call(Command::SelectProject(project_id)).await
    }

    /// # Errors
    ///
    /// Fails when no project is open.
    pub async fn set_draft(&self, content: impl Into<String>) -> Result<(), ClientError> {
        self.call(Command::SetDraft(content.into())).await
    }

    /// # Errors
    ///
    /// Fails when no project is open.
    pub async fn attach(&self, attachment: Attachment) -> Result<(), ClientError> {
        self.call(Command::Attach(attachment)).await
    }

    /// # Errors
    ///
    /// Fails when the parent is unknown or not yet confirmed.
    pub async fn reply_to(&self, parent: Option<MessageId>) -> Result<(), ClientError> {
        self.call(Command::ReplyTo(parent)).await
    }

    /// Send the composer contents.
    ///
    /// # Errors
    ///
    /// Fails when no project is open or the draft is empty. Delivery failures
    /// are not errors here; they surface as a notice in the view.
    pub async fn submit(&self) -> Result<(), ClientError> {
        self.call(Command::Submit).await
    }

    /// # Errors
    ///
    /// Fails when the message is unknown, not ours, or busy.
    pub async fn edit(&self, message_id: i64, content: impl Into<String>) -> Result<(), ClientError> {
        self.call(Command::Edit { message_id, content: content.into() }).await
    }

    /// # Errors
    ///
    /// Fails when the message is unknown, not ours, or busy.
    pub async fn delete(&self, message_id: i64) -> Result<(), ClientError> {
        self.call(Command::Delete { message_id }).await
    }

    /// # Errors
    ///
    /// Fails when no project is open.
    pub async fn retry_fetch(&self) -> Result<(), ClientError> {
        self.call(Command::RetryFetch).await
    }

    /// # Errors
    ///
    /// [`ClientError::Stopped`] when the client task is gone.
    pub async fn refresh_mentions(&self) -> Result<(), ClientError> {
        self.call(Command::RefreshMentions).await
    }

    /// # Errors
    ///
    /// Fails when no project is open.
    pub async fn set_roster(&self, roster: Vec<TeamMember>) -> Result<(), ClientError> {
        self.call(Command::SetRoster(roster)).await
    }

    /// # Errors
    ///
    /// [`ClientError::Stopped`] when the client task is gone.
    pub async fn dismiss_notice(&self) -> Result<(), ClientError> {
        self.call(Command::DismissNotice).await
    }

    /// Wait until `predicate` holds for the published view, returning it.
    ///
    /// # Errors
    ///
    /// [`ClientError::Stopped`] when the client stops first.
    pub async fn wait_for(&self, predicate: impl Fn(&ChatView) -> bool) -> Result<ChatView, ClientError> {
        let mut view = self.view.clone();
        let current = view.wait_for(|v| predicate(v)).await.map_err(|_| ClientError::Stopped)?;
        Ok(current.clone())
    }

    async fn call(&self, command: Command) -> Result<(), ClientError> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Request { command, reply }).await.map_err(|_| ClientError::Stopped)?;
        rx.await.map_err(|_| ClientError::Stopped)?.map_err(ClientError::from)
    }
}

/// Spawner for the client task.
pub struct ChatClient;

impl ChatClient {
    /// Start the client. If a last project is remembered in `prefs`, it is
    /// reopened right away.
    pub fn spawn(
        config: &ChatConfig,
        api: Arc<dyn MessageApi>,
        transport: Arc<dyn RoomTransport>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        prefs: PrefsStore,
    ) -> (ChatHandle, JoinHandle<()>) {
        let state = ChatState::from_config(config);
        let (view_tx, view_rx) = watch::channel(state.view());
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE);
        let (results_tx, results_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            state,
            api,
            subscriptions: RoomSubscriptionManager::new(transport.clone()),
            transport,
            prefs,
            results: results_tx,
            view: view_tx,
        };
        let task = tokio::spawn(driver.run(commands_rx, events, results_rx));
        (ChatHandle { commands: commands_tx, view: view_rx }, task)
    }
}

// =============================================================================
// DRIVER
// =============================================================================

struct Driver {
    state: ChatState,
    api: Arc<dyn MessageApi>,
    transport: Arc<dyn RoomTransport>,
    subscriptions: RoomSubscriptionManager,
    prefs: PrefsStore,
    results: mpsc::UnboundedSender<CallResult>,
    view: watch::Sender<ChatView>,
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Request>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        mut results: mpsc::UnboundedReceiver<CallResult>,
    ) {
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut startup = self.state.refresh_mentions();
        if let Some(project_id) = self.prefs.last_project() {
            info!(project_id, "reopening last project");
            startup.extend(self.state.select_project(project_id));
        }
        self.execute(startup).await;
        self.publish();

        loop {
            tokio::select! {
                request = commands.recv() => {
                    let Some(Request { command, reply }) = request else {
                        break;
                    };
                    trace!(?command, "command");
                    let outcome = self.handle(command).await;
                    let _ = reply.send(outcome);
                }
                Some(event) = events.recv() => {
                    let effects = self.state.on_transport(event, Instant::now());
                    self.execute(effects).await;
                }
                Some(result) = results.recv() => {
                    let effects = self.state.on_result(result);
                    self.execute(effects).await;
                }
                _ = ticker.tick() => {
                    let effects = self.state.tick(Instant::now());
                    self.execute(effects).await;
                }
            }
            self.publish();
        }

        self.subscriptions.leave_all().await;
        debug!("chat client stopped");
    }

    async fn handle(&mut self, command: Command) -> Result<(), ChatError> {
        let effects = match command {
            Command::SelectProject(project_id) => self.state.select_project(project_id),
            Command::SetDraft(content) => self.state.set_draft(&content, Instant::now())?,
            Command::Attach(attachment) => {
                self.state.attach(attachment)?;
                Vec::new()
            }
            Command::ReplyTo(parent) => {
                self.state.reply_to(parent)?;
                Vec::new()
            }
            Command::Submit => self.state.submit(frames::now_ms())?,
            Command::Edit { message_id, content } => self.state.edit(message_id, &content)?,
            Command::Delete { message_id } => self.state.delete(message_id)?,
            Command::RetryFetch => self.state.retry_fetch()?,
            Command::RefreshMentions => self.state.refresh_mentions(),
            Command::SetRoster(roster) => {
                self.state.set_roster(roster)?;
                Vec::new()
            }
            Command::DismissNotice => {
                self.state.dismiss_notice();
                Vec::new()
            }
        };
        self.execute(effects).await;
        Ok(())
    }

    async fn execute(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Subscribe(project_id) => {
                    let result = self.subscriptions.select(project_id).await;
                    self.report(CallResult::Subscribed { project_id, result });
                }
                Effect::Resubscribe => {
                    if let Some(project_id) = self.subscriptions.target() {
                        let result = self.subscriptions.on_reconnect().await;
                        self.report(CallResult::Subscribed { project_id, result });
                    }
                }
                Effect::ConnectionLost => self.subscriptions.on_disconnect(),
                Effect::Fetch { project_id, seq } => {
                    let api = self.api.clone();
                    self.spawn_call(async move {
                        CallResult::Fetched { project_id, seq, result: api.list(project_id).await }
                    });
                }
                Effect::Send(request) => {
                    let api = self.api.clone();
                    self.spawn_call(async move {
                        let result = api.send(request.project_id, &request.body).await;
                        CallResult::Sent { ticket: request.ticket, result }
                    });
                }
                Effect::Edit(request) => {
                    let api = self.api.clone();
                    self.spawn_call(async move {
                        let result = api.update(request.message_id, &request.content).await;
                        CallResult::Edited { ticket: request.ticket, result }
                    });
                }
                Effect::Delete(request) => {
                    let api = self.api.clone();
                    self.spawn_call(async move {
                        CallResult::Deleted { ticket: request.ticket, result: api.delete(request.message_id).await }
                    });
                }
                Effect::Typing { project_id, signal } => {
                    let name = self.state.user().name.clone();
                    if let Err(e) = self.transport.signal_typing(project_id, &name, signal).await {
                        trace!(project_id, ?signal, error = %e, "typing signal dropped");
                    }
                }
                Effect::MarkMentionsViewed(project_id) => {
                    let api = self.api.clone();
                    self.spawn_call(async move {
                        CallResult::MentionsViewed { project_id, result: api.mark_mentions_viewed(project_id).await }
                    });
                }
                Effect::ListMentions => {
                    let api = self.api.clone();
                    self.spawn_call(async move { CallResult::MentionsListed(api.list_mentioned_projects().await) });
                }
                Effect::RememberProject(project_id) => self.prefs.remember_project(project_id),
            }
        }
    }

    fn spawn_call(&self, call: impl Future<Output = CallResult> + Send + 'static) {
        let results = self.results.clone();
        tokio::spawn(async move {
            let _ = results.send(call.await);
        });
    }

    fn report(&self, result: CallResult) {
        let _ = self.results.send(result);
    }

    fn publish(&self) {
        let next = self.state.view();
        self.view.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}
