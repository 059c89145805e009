//! WebSocket implementation of the broadcast channel.
//!
//! ARCHITECTURE
//! ============
//! A background task owns the socket. It reconnects with exponential backoff
//! (jittered), forwards outbound frames, resolves request/response pairs by
//! `parent_id`, and turns everything else into [`TransportEvent`]s on an
//! unbounded channel. Unbounded because the consumer may be awaiting a join
//! whose response this same task has to read.
//!
//! A connection counts as up once the server's `session:connected` greeting
//! arrives. Requests made while down fail fast with `Closed`; nothing is
//! queued across a reconnect.

#[cfg(test)]
#[path = "ws_test.rs"]
mod ws_test;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use frames::{Frame, Status, syscall};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tracing::{debug, info, trace, warn};

use crate::config::ChatConfig;
use crate::transport::{RoomTransport, TransportError, TransportEvent, TypingSignal, parse_event, typing_frame};
use crate::types::ProjectId;

#[derive(Default)]
struct Shared {
    connected: AtomicBool,
    pending: Mutex<HashMap<String, oneshot::Sender<Frame>>>,
}

impl Shared {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn register(&self, id: String) -> oneshot::Receiver<Frame> {
        let (tx, rx) = oneshot::channel();
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(id, tx);
        }
        rx
    }

    fn forget(&self, id: &str) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(id);
        }
    }

    /// Hand a response frame to its waiter. Returns false if nobody waits.
    fn resolve(&self, frame: Frame) -> bool {
        let Some(parent_id) = frame.parent_id.as_deref() else {
            return false;
        };
        let waiter = self.pending.lock().ok().and_then(|mut pending| pending.remove(parent_id));
        waiter.is_some_and(|tx| tx.send(frame).is_ok())
    }

    /// Connection lost: mark down and fail every waiter with `Closed`.
    fn reset(&self) {
        self.connected.store(false, Ordering::Release);
        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
        }
    }
}

/// Exponential reconnect delay with up to 25% jitter.
#[derive(Clone, Debug)]
pub(crate) struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub(crate) fn new(min: Duration, max: Duration) -> Self {
        Self { min, max: max.max(min), current: min }
    }

    pub(crate) fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = (self.current * 2).min(self.max);
        let jitter_ms = u64::try_from(base.as_millis() / 4).unwrap_or(0);
        base + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }

    pub(crate) fn reset(&mut self) {
        self.current = self.min;
    }
}

struct ConnectOptions {
    url: String,
    session_token: Option<String>,
    reconnect_min: Duration,
    reconnect_max: Duration,
}

enum ConnectionEnd {
    /// The socket closed; reconnect.
    Closed,
    /// The transport or its event consumer was dropped; stop for good.
    Shutdown,
}

/// [`RoomTransport`] over the `/api/ws` protobuf frame socket.
pub struct WsTransport {
    outbound: mpsc::UnboundedSender<Frame>,
    shared: Arc<Shared>,
    request_timeout: Duration,
    task: JoinHandle<()>,
}

impl WsTransport {
    /// Start the connection task. The returned receiver yields connection
    /// lifecycle and broadcast events until the transport is dropped.
    ///
    /// # Errors
    ///
    /// [`TransportError::InvalidBaseUrl`] when no websocket URL can be derived.
    pub fn spawn(config: &ChatConfig) -> Result<(Self, mpsc::UnboundedReceiver<TransportEvent>), TransportError> {
        let url = config.ws_url().map_err(TransportError::InvalidBaseUrl)?;
        let options = ConnectOptions {
            url,
            session_token: config.session_token.clone(),
            reconnect_min: config.reconnect_min,
            reconnect_max: config.reconnect_max,
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());
        let task = tokio::spawn(connection_loop(options, shared.clone(), outbound_rx, events_tx));

        let transport = Self { outbound: outbound_tx, shared, request_timeout: config.request_timeout, task };
        Ok((transport, events_rx))
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    async fn request(&self, frame: Frame) -> Result<Frame, TransportError> {
        if !self.shared.is_connected() {
            return Err(TransportError::Closed);
        }

        let id = frame.id.clone();
        let syscall = frame.syscall.clone();
        let reply = self.shared.register(id.clone());
        if self.outbound.send(frame).is_err() {
            self.shared.forget(&id);
            return Err(TransportError::Closed);
        }

        let reply = match tokio::time::timeout(self.request_timeout, reply).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(TransportError::Closed),
            Err(_) => {
                self.shared.forget(&id);
                return Err(TransportError::Timeout(syscall));
            }
        };

        if reply.status == Status::Error {
            return Err(TransportError::Rejected { syscall, message: reply.error_message().to_owned() });
        }
        Ok(reply)
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[async_trait::async_trait]
impl RoomTransport for WsTransport {
    async fn join(&self, project_id: ProjectId) -> Result<(), TransportError> {
        let frame = Frame::request(syscall::ROOM_JOIN, Some(project_id), serde_json::json!({}));
        self.request(frame).await.map(|_| ())
    }

    async fn leave(&self, project_id: ProjectId) -> Result<(), TransportError> {
        let frame = Frame::request(syscall::ROOM_LEAVE, Some(project_id), serde_json::json!({}));
        self.request(frame).await.map(|_| ())
    }

    async fn signal_typing(
        &self,
        project_id: ProjectId,
        user_name: &str,
        signal: TypingSignal,
    ) -> Result<(), TransportError> {
        if !self.shared.is_connected() {
            return Err(TransportError::Closed);
        }
        self.outbound
            .send(typing_frame(project_id, user_name, signal))
            .map_err(|_| TransportError::Closed)
    }
}

// =============================================================================
// CONNECTION TASK
// =============================================================================

async fn connection_loop(
    options: ConnectOptions,
    shared: Arc<Shared>,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let mut backoff = Backoff::new(options.reconnect_min, options.reconnect_max);
    let mut greeted_before = false;

    loop {
        let end = connect_and_run(&options, &shared, &mut outbound, &events, &mut greeted_before, &mut backoff).await;
        let was_up = shared.is_connected();
        shared.reset();

        match end {
            Ok(ConnectionEnd::Shutdown) => {
                debug!("websocket transport shut down");
                return;
            }
            Ok(ConnectionEnd::Closed) => info!("websocket closed"),
            Err(e) => warn!(error = %e, "websocket connection failed"),
        }

        if was_up && events.send(TransportEvent::Disconnected).is_err() {
            return;
        }

        // Frames queued while down belong to the dead connection.
        while outbound.try_recv().is_ok() {}

        let delay = backoff.next_delay();
        debug!(delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), "reconnecting after backoff");
        tokio::time::sleep(delay).await;
    }
}

async fn connect_and_run(
    options: &ConnectOptions,
    shared: &Shared,
    outbound: &mut mpsc::UnboundedReceiver<Frame>,
    events: &mpsc::UnboundedSender<TransportEvent>,
    greeted_before: &mut bool,
    backoff: &mut Backoff,
) -> Result<ConnectionEnd, TransportError> {
    let mut request = options
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| TransportError::WsConnect(Box::new(e)))?;
    if let Some(token) = options.session_token.as_deref() {
        let cookie = HeaderValue::from_str(&format!("session_token={token}"))
            .map_err(|_| TransportError::InvalidBaseUrl(options.url.clone()))?;
        request.headers_mut().insert(COOKIE, cookie);
    }

    let (stream, _) = connect_async(request).await.map_err(|e| TransportError::WsConnect(Box::new(e)))?;
    let (mut write, mut read) = stream.split();
    debug!(url = %options.url, "websocket connected; awaiting greeting");

    loop {
        tokio::select! {
            outgoing = outbound.recv() => {
                let Some(frame) = outgoing else {
                    let _ = write.send(WsMessage::Close(None)).await;
                    return Ok(ConnectionEnd::Shutdown);
                };
                trace!(syscall = %frame.syscall, id = %frame.id, "frame out");
                write
                    .send(WsMessage::Binary(frames::encode_frame(&frame).into()))
                    .await
                    .map_err(|e| TransportError::WsConnect(Box::new(e)))?;
            }
            incoming = read.next() => {
                let bytes = match incoming {
                    None | Some(Ok(WsMessage::Close(_))) => return Ok(ConnectionEnd::Closed),
                    Some(Err(e)) => return Err(TransportError::WsConnect(Box::new(e))),
                    Some(Ok(WsMessage::Binary(bytes))) => bytes,
                    Some(Ok(_)) => continue,
                };
                let frame = match frames::decode_frame(&bytes) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(error = %e, "undecodable frame dropped");
                        continue;
                    }
                };

                let Some(event) = dispatch(shared, frame, greeted_before, backoff) else {
                    continue;
                };
                if events.send(event).is_err() {
                    return Ok(ConnectionEnd::Shutdown);
                }
            }
        }
    }
}

/// Route one inbound frame: responses to their waiter, the greeting and
/// broadcasts to the event stream.
fn dispatch(shared: &Shared, frame: Frame, greeted_before: &mut bool, backoff: &mut Backoff) -> Option<TransportEvent> {
    if frame.parent_id.is_some() {
        let syscall = frame.syscall.clone();
        if !shared.resolve(frame) {
            trace!(%syscall, "unmatched response dropped");
        }
        return None;
    }

    if frame.syscall == syscall::SESSION_CONNECTED {
        shared.connected.store(true, Ordering::Release);
        backoff.reset();
        let reconnect = std::mem::replace(greeted_before, true);
        info!(reconnect, "websocket session established");
        return Some(TransportEvent::Connected { reconnect });
    }

    let event = parse_event(&frame);
    if event.is_none() {
        trace!(syscall = %frame.syscall, "frame ignored");
    }
    event.map(TransportEvent::Broadcast)
}
