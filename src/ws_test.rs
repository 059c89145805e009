use std::net::SocketAddr;
use std::sync::atomic::AtomicUsize;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message as ServerMessage, WebSocket, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::get;
use serde_json::json;

use super::*;
use crate::transport::BroadcastEvent;
use crate::types::{LocalUser, MessageId};

#[derive(Clone, Default)]
struct FakeServer {
    received: Arc<Mutex<Vec<String>>>,
    cookies: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
}

impl FakeServer {
    fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }
}

async fn upgrade(State(server): State<FakeServer>, headers: HeaderMap, ws: WebSocketUpgrade) -> Response {
    let cookie = headers.get("cookie").and_then(|v| v.to_str().ok()).unwrap_or_default().to_owned();
    server.cookies.lock().unwrap().push(cookie);
    ws.on_upgrade(move |socket| serve_socket(server, socket))
}

async fn send(socket: &mut WebSocket, frame: &Frame) -> bool {
    socket.send(ServerMessage::Binary(frames::encode_frame(frame).into())).await.is_ok()
}

/// Greets, acknowledges joins and leaves, rejects project 13, drops the
/// connection after joining project 66, and pushes one message per join.
async fn serve_socket(server: FakeServer, mut socket: WebSocket) {
    server.connections.fetch_add(1, Ordering::SeqCst);
    let greeting = Frame::request(syscall::SESSION_CONNECTED, None, json!({}));
    if !send(&mut socket, &greeting).await {
        return;
    }

    while let Some(Ok(message)) = socket.recv().await {
        let ServerMessage::Binary(bytes) = message else {
            continue;
        };
        let Ok(frame) = frames::decode_frame(&bytes) else {
            continue;
        };
        let project_id = frame.project_id.unwrap_or_default();
        server.received.lock().unwrap().push(format!("{}:{project_id}", frame.syscall));

        match frame.syscall.as_str() {
            syscall::ROOM_JOIN if project_id == 13 => {
                send(&mut socket, &frame.error("forbidden")).await;
            }
            syscall::ROOM_JOIN if project_id == 66 => {
                send(&mut socket, &frame.done(json!({}))).await;
                return;
            }
            syscall::ROOM_JOIN => {
                send(&mut socket, &frame.done(json!({}))).await;
                let event = Frame::request(
                    syscall::MESSAGE_CREATED,
                    Some(project_id),
                    json!({
                        "id": 900, "project_id": project_id, "sender_id": 40, "sender_name": "Bo",
                        "content": "welcome", "created_at": 1000,
                    }),
                );
                send(&mut socket, &event).await;
            }
            syscall::ROOM_LEAVE => {
                send(&mut socket, &frame.done(json!({}))).await;
            }
            _ => {}
        }
    }
}

async fn spawn_fake_server() -> (SocketAddr, FakeServer) {
    let server = FakeServer::default();
    let app = Router::new().route("/api/ws", get(upgrade)).with_state(server.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    (addr, server)
}

fn config_for(addr: SocketAddr) -> ChatConfig {
    let mut config = ChatConfig::new(LocalUser { id: 12, name: "Ann".into() });
    config.base_url = format!("http://{addr}");
    config.session_token = Some("tok".into());
    config.reconnect_min = Duration::from_millis(10);
    config.reconnect_max = Duration::from_millis(50);
    config.request_timeout = Duration::from_secs(2);
    config
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("event in time")
        .expect("event channel open")
}

#[tokio::test]
async fn greets_joins_and_delivers_room_events() {
    let (addr, server) = spawn_fake_server().await;
    let (transport, mut events) = WsTransport::spawn(&config_for(addr)).expect("spawn");

    assert_eq!(next_event(&mut events).await, TransportEvent::Connected { reconnect: false });
    assert!(transport.is_connected());
    transport.join(7).await.expect("join");

    let TransportEvent::Broadcast(BroadcastEvent::MessageCreated { project_id, message }) = next_event(&mut events).await
    else {
        panic!("expected message event");
    };
    assert_eq!(project_id, 7);
    assert_eq!(message.id, MessageId::Server(900));
    assert_eq!(server.cookies.lock().unwrap().as_slice(), ["session_token=tok".to_owned()]);
}

#[tokio::test]
async fn rejected_join_carries_server_message() {
    let (addr, _) = spawn_fake_server().await;
    let (transport, mut events) = WsTransport::spawn(&config_for(addr)).expect("spawn");
    next_event(&mut events).await;

    let err = transport.join(13).await.expect_err("rejected");
    assert!(matches!(err, TransportError::Rejected { ref message, .. } if message == "forbidden"));
}

#[tokio::test]
async fn typing_and_leave_frames_reach_the_server_in_order() {
    let (addr, server) = spawn_fake_server().await;
    let (transport, mut events) = WsTransport::spawn(&config_for(addr)).expect("spawn");
    next_event(&mut events).await;

    transport.signal_typing(7, "Ann", TypingSignal::Start).await.expect("typing");
    transport.leave(7).await.expect("leave");
    assert_eq!(server.received(), vec!["typing:start:7", "room:leave:7"]);
}

#[tokio::test]
async fn reconnects_after_the_server_drops_the_socket() {
    let (addr, server) = spawn_fake_server().await;
    let (transport, mut events) = WsTransport::spawn(&config_for(addr)).expect("spawn");
    assert_eq!(next_event(&mut events).await, TransportEvent::Connected { reconnect: false });

    let _ = transport.join(66).await;
    assert_eq!(next_event(&mut events).await, TransportEvent::Disconnected);
    assert_eq!(next_event(&mut events).await, TransportEvent::Connected { reconnect: true });
    assert_eq!(server.connections.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn requests_fail_fast_while_disconnected() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let (transport, _events) = WsTransport::spawn(&config_for(addr)).expect("spawn");
    assert!(matches!(transport.join(7).await, Err(TransportError::Closed)));
    assert!(matches!(
        transport.signal_typing(7, "Ann", TypingSignal::Stop).await,
        Err(TransportError::Closed)
    ));
}

#[test]
fn invalid_base_url_is_rejected() {
    let mut config = ChatConfig::new(LocalUser { id: 1, name: "Ann".into() });
    config.base_url = "ftp://example.com".into();
    assert!(matches!(WsTransport::spawn(&config), Err(TransportError::InvalidBaseUrl(_))));
}

#[test]
fn backoff_doubles_caps_and_resets() {
    let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(400));
    let within = |d: Duration, base: u64| d >= Duration::from_millis(base) && d <= Duration::from_millis(base + base / 4);
    assert!(within(backoff.next_delay(), 100));
    assert!(within(backoff.next_delay(), 200));
    assert!(within(backoff.next_delay(), 400));
    assert!(within(backoff.next_delay(), 400));
    backoff.reset();
    assert!(within(backoff.next_delay(), 100));
}
