use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use teamroom::api::ApiError;
use teamroom::config::ConfigError;
use teamroom::error::Notice;
use teamroom::reply;
use teamroom::session::LoadState;
use teamroom::transport::TransportError;
use teamroom::types::{Message, MessageId, ProjectId};
use teamroom::{ChatClient, ChatConfig, ChatHandle, ChatView, ClientError, HttpMessageApi, MessageApi, PrefsStore, WsTransport};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("timed out after {}s waiting for {what}", .waited.as_secs())]
    Timeout { waited: Duration, what: &'static str },
    #[error("{code}: {message}")]
    Failed { code: &'static str, message: String },
}

impl From<Notice> for CliError {
    fn from(notice: Notice) -> Self {
        Self::Failed { code: notice.code, message: notice.message }
    }
}

#[derive(Parser, Debug)]
#[command(name = "teamroom-cli", about = "Project team room chat client")]
struct Cli {
    /// Overrides `TEAMROOM_BASE_URL`.
    #[arg(long)]
    base_url: Option<String>,

    /// Overrides `TEAMROOM_SESSION_TOKEN`.
    #[arg(long)]
    session_token: Option<String>,

    #[arg(long, default_value_t = 15, help = "Seconds to wait for the server before giving up")]
    wait_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the full history of a project.
    History { project_id: ProjectId },
    /// Follow a project room live: messages, edits, deletes, typing, notices.
    Watch { project_id: ProjectId },
    /// Send a message to a project.
    Send {
        project_id: ProjectId,
        text: String,
        #[arg(long, help = "Id of the message being replied to")]
        reply_to: Option<i64>,
    },
    /// Edit one of your messages.
    Edit { project_id: ProjectId, message_id: i64, text: String },
    /// Delete one of your messages.
    Delete { project_id: ProjectId, message_id: i64 },
    /// List projects with unread mentions.
    Mentions,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("teamroom=warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ChatConfig::from_env()?;
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url.trim_end_matches('/').to_owned();
    }
    if cli.session_token.is_some() {
        config.session_token = cli.session_token;
    }
    let wait = Duration::from_secs(cli.wait_secs);

    match cli.command {
        Command::History { project_id } => run_history(&config, project_id).await,
        Command::Mentions => run_mentions(&config).await,
        Command::Watch { project_id } => run_watch(&config, wait, project_id).await,
        Command::Send { project_id, text, reply_to } => run_send(&config, wait, project_id, text, reply_to).await,
        Command::Edit { project_id, message_id, text } => run_edit(&config, wait, project_id, message_id, text).await,
        Command::Delete { project_id, message_id } => run_delete(&config, wait, project_id, message_id).await,
    }
}

// =============================================================================
// ONE-SHOT REST COMMANDS
// =============================================================================

async fn run_history(config: &ChatConfig, project_id: ProjectId) -> Result<(), CliError> {
    let api = HttpMessageApi::new(config)?;
    for message in api.list(project_id).await? {
        println!("{}", format_message(&message));
    }
    Ok(())
}

async fn run_mentions(config: &ChatConfig) -> Result<(), CliError> {
    let api = HttpMessageApi::new(config)?;
    for project_id in api.list_mentioned_projects().await? {
        println!("{project_id}");
    }
    Ok(())
}

// =============================================================================
// CLIENT-BACKED COMMANDS
// =============================================================================

async fn run_send(
    config: &ChatConfig,
    wait: Duration,
    project_id: ProjectId,
    text: String,
    reply_to: Option<i64>,
) -> Result<(), CliError> {
    let (handle, task) = open(config, wait, project_id, PrefsStore::default()).await?;
    if let Some(parent) = reply_to {
        handle.reply_to(Some(MessageId::Server(parent))).await?;
    }
    handle.set_draft(text).await?;
    handle.submit().await?;

    let view = settle(&handle, wait, "send confirmation", |v| v.in_flight == 0).await?;
    close(handle, task).await;
    if let Some(notice) = view.notice {
        return Err(notice.into());
    }
    if let Some(sent) = view.messages.iter().rev().find(|m| m.sender_id == config.user.id) {
        println!("{}", format_message(sent));
    }
    Ok(())
}

async fn run_edit(
    config: &ChatConfig,
    wait: Duration,
    project_id: ProjectId,
    message_id: i64,
    text: String,
) -> Result<(), CliError> {
    let (handle, task) = open(config, wait, project_id, PrefsStore::default()).await?;
    handle.edit(message_id, text).await?;

    let view = settle(&handle, wait, "edit confirmation", |v| v.in_flight == 0).await?;
    close(handle, task).await;
    if let Some(notice) = view.notice {
        return Err(notice.into());
    }
    if let Some(edited) = view.messages.iter().find(|m| m.id == MessageId::Server(message_id)) {
        println!("{}", format_message(edited));
    }
    Ok(())
}

async fn run_delete(config: &ChatConfig, wait: Duration, project_id: ProjectId, message_id: i64) -> Result<(), CliError> {
    let (handle, task) = open(config, wait, project_id, PrefsStore::default()).await?;
    handle.delete(message_id).await?;

    let view = settle(&handle, wait, "delete confirmation", |v| v.in_flight == 0).await?;
    close(handle, task).await;
    if let Some(notice) = view.notice {
        return Err(notice.into());
    }
    println!("[{message_id}] deleted");
    Ok(())
}

async fn run_watch(config: &ChatConfig, wait: Duration, project_id: ProjectId) -> Result<(), CliError> {
    let prefs = PrefsStore::new(config.prefs_path.clone());
    let (handle, task) = open(config, wait, project_id, prefs).await?;
    let mut updates = handle.watch();
    let mut printer = Printer::default();
    printer.render(&handle.view());

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = updates.borrow_and_update().clone();
                printer.render(&view);
            }
            _ = tokio::signal::ctrl_c() => {
                debug!("interrupted");
                break;
            }
        }
    }

    close(handle, task).await;
    Ok(())
}

/// Start a client, wait for the socket, open `project_id` and wait for its
/// history.
async fn open(
    config: &ChatConfig,
    wait: Duration,
    project_id: ProjectId,
    prefs: PrefsStore,
) -> Result<(ChatHandle, JoinHandle<()>), CliError> {
    let api = Arc::new(HttpMessageApi::new(config)?);
    let (transport, events) = WsTransport::spawn(config)?;
    let (handle, task) = ChatClient::spawn(config, api, Arc::new(transport), events, prefs);

    settle(&handle, wait, "websocket session", |v| v.connected).await?;
    info!(project_id, "connected; opening project");
    handle.select_project(project_id).await?;

    let view = settle(&handle, wait, "conversation history", |v| {
        v.project_id == Some(project_id) && v.load != Some(LoadState::Loading)
    })
    .await?;
    if view.load == Some(LoadState::Failed) {
        close(handle, task).await;
        let failed = CliError::Failed { code: "E_FETCH_FAILED", message: "history could not be loaded".to_owned() };
        return Err(view.notice.map_or(failed, CliError::from));
    }
    Ok((handle, task))
}

async fn settle(
    handle: &ChatHandle,
    wait: Duration,
    what: &'static str,
    predicate: impl Fn(&ChatView) -> bool,
) -> Result<ChatView, CliError> {
    tokio::time::timeout(wait, handle.wait_for(predicate))
        .await
        .map_err(|_| CliError::Timeout { waited: wait, what })?
        .map_err(CliError::from)
}

/// Stop the client and let it leave the room.
async fn close(handle: ChatHandle, task: JoinHandle<()>) {
    drop(handle);
    let _ = task.await;
}

// =============================================================================
// OUTPUT
// =============================================================================

fn format_message(message: &Message) -> String {
    let mut line = format!("[{}] {}:", message.id, message.sender_name);
    if let Some(quote) = reply::quoted_snippet(message) {
        let _ = write!(line, " > {quote} |");
    }
    if let Some(content) = message.content.as_deref() {
        let _ = write!(line, " {content}");
    }
    for attachment in &message.attachments {
        let _ = write!(line, " [file: {} ({} bytes)]", attachment.name, attachment.size);
    }
    if message.is_edited {
        line.push_str(" (edited)");
    }
    line
}

/// Prints what changed between successive views of a watched room.
#[derive(Default)]
struct Printer {
    seen: HashMap<i64, Option<String>>,
    typing: Option<String>,
    notice: Option<Notice>,
    unread: Vec<ProjectId>,
}

impl Printer {
    fn render(&mut self, view: &ChatView) {
        let mut present = HashSet::new();
        for message in &view.messages {
            let Some(id) = message.id.server() else {
                continue;
            };
            present.insert(id);
            match self.seen.insert(id, message.content.clone()) {
                None => println!("{}", format_message(message)),
                Some(previous) if previous != message.content => println!("{}", format_message(message)),
                Some(_) => {}
            }
        }
        self.seen.retain(|id, _| {
            let keep = present.contains(id);
            if !keep {
                println!("[{id}] deleted");
            }
            keep
        });

        if view.typing != self.typing {
            if let Some(typing) = &view.typing {
                eprintln!("{typing}");
            }
            self.typing.clone_from(&view.typing);
        }
        if view.notice != self.notice {
            if let Some(notice) = &view.notice {
                eprintln!("error {}: {}", notice.code, notice.message);
            }
            self.notice.clone_from(&view.notice);
        }
        if view.unread_mentions != self.unread {
            if !view.unread_mentions.is_empty() {
                eprintln!("unread mentions in projects {:?}", view.unread_mentions);
            }
            self.unread.clone_from(&view.unread_mentions);
        }
    }
}
