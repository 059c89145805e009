use std::sync::{Arc, Mutex};

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap as AxumHeaders, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use serde_json::json;

use super::*;
use crate::types::{LocalUser, MessageId};

#[derive(Clone, Default)]
struct Seen {
    cookies: Arc<Mutex<Vec<String>>>,
    bodies: Arc<Mutex<Vec<Value>>>,
}

impl Seen {
    fn record(&self, headers: &AxumHeaders, body: Option<Value>) {
        let cookie = headers
            .get("cookie")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        self.cookies.lock().unwrap().push(cookie);
        if let Some(body) = body {
            self.bodies.lock().unwrap().push(body);
        }
    }
}

fn record(id: i64, content: &str) -> Value {
    json!({
        "id": id,
        "project_id": 7.0,
        "sender_id": 12.0,
        "sender_name": "Ann",
        "content": content,
        "created_at": 1000.0,
        "is_edited": false,
    })
}

async fn list_messages(State(seen): State<Seen>, headers: AxumHeaders, Path(project_id): Path<i64>) -> Response {
    seen.record(&headers, None);
    if project_id == 99 {
        return "not json".into_response();
    }
    Json(json!([record(10, "Ship it"), record(11, "On it")])).into_response()
}

async fn send_message(
    State(seen): State<Seen>,
    headers: AxumHeaders,
    Path(_project_id): Path<i64>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let content = body["content"].as_str().unwrap_or_default().to_owned();
    seen.record(&headers, Some(body));
    Json(record(501, &content))
}

async fn update_message(
    State(seen): State<Seen>,
    headers: AxumHeaders,
    Path(message_id): Path<i64>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, (StatusCode, String)> {
    if message_id == 403 {
        return Err((StatusCode::FORBIDDEN, "not yours".to_owned()));
    }
    let content = body["content"].as_str().unwrap_or_default().to_owned();
    seen.record(&headers, Some(body));
    let mut updated = record(message_id, &content);
    updated["is_edited"] = json!(true);
    Ok(Json(updated))
}

async fn delete_message(Path(message_id): Path<i64>) -> StatusCode {
    if message_id == 404 { StatusCode::NOT_FOUND } else { StatusCode::NO_CONTENT }
}

async fn mentions() -> Json<Value> {
    Json(json!([3.0, {"project_id": 7}]))
}

async fn mark_viewed(Path(project_id): Path<i64>) -> StatusCode {
    if project_id == 9 { StatusCode::SERVICE_UNAVAILABLE } else { StatusCode::OK }
}

async fn spawn_fake_server() -> (String, Seen) {
    let seen = Seen::default();
    let app = Router::new()
        .route("/api/projects/{project_id}/messages", get(list_messages).post(send_message))
        .route("/api/messages/{message_id}", patch(update_message).delete(delete_message))
        .route("/api/mentions", get(mentions))
        .route("/api/projects/{project_id}/mentions/viewed", post(mark_viewed))
        .with_state(seen.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    (format!("http://{addr}"), seen)
}

fn api_for(base_url: &str) -> HttpMessageApi {
    let mut config = ChatConfig::new(LocalUser { id: 12, name: "Ann".into() });
    config.base_url = base_url.to_owned();
    config.session_token = Some("abc123".to_owned());
    HttpMessageApi::new(&config).expect("client")
}

#[tokio::test]
async fn list_decodes_records_and_sends_session_cookie() {
    let (base, seen) = spawn_fake_server().await;
    let messages = api_for(&base).list(7).await.expect("list");
    assert_eq!(messages.iter().map(|m| m.id).collect::<Vec<_>>(), vec![MessageId::Server(10), MessageId::Server(11)]);
    assert_eq!(*seen.cookies.lock().unwrap(), vec!["session_token=abc123".to_owned()]);
}

#[tokio::test]
async fn send_posts_body_and_returns_confirmed_message() {
    let (base, seen) = spawn_fake_server().await;
    let body = SendBody { content: Some("Hello".into()), attachments: Vec::new(), reply_to_message_id: Some(10), reply_to: None };
    let message = api_for(&base).send(7, &body).await.expect("send");
    assert_eq!(message.id, MessageId::Server(501));
    assert_eq!(message.content.as_deref(), Some("Hello"));

    let bodies = seen.bodies.lock().unwrap();
    assert_eq!(bodies[0]["reply_to_message_id"], 10);
    assert!(bodies[0].get("reply_to").is_none());
}

#[tokio::test]
async fn update_returns_edited_message() {
    let (base, _) = spawn_fake_server().await;
    let message = api_for(&base).update(11, "On it now").await.expect("update");
    assert_eq!(message.id, MessageId::Server(11));
    assert!(message.is_edited);
}

#[tokio::test]
async fn rejected_update_is_not_retryable() {
    let (base, _) = spawn_fake_server().await;
    let err = api_for(&base).update(403, "x").await.expect_err("forbidden");
    assert!(matches!(&err, ApiError::Status { status: 403, body } if body == "not yours"));
    assert!(!err.retryable());
}

#[tokio::test]
async fn delete_maps_status() {
    let (base, _) = spawn_fake_server().await;
    let api = api_for(&base);
    api.delete(11).await.expect("delete");
    assert!(matches!(api.delete(404).await, Err(ApiError::Status { status: 404, .. })));
}

#[tokio::test]
async fn mentions_accept_ids_and_objects() {
    let (base, _) = spawn_fake_server().await;
    assert_eq!(api_for(&base).list_mentioned_projects().await.expect("mentions"), vec![3, 7]);
}

#[tokio::test]
async fn mark_viewed_server_error_is_retryable() {
    let (base, _) = spawn_fake_server().await;
    let api = api_for(&base);
    api.mark_mentions_viewed(7).await.expect("viewed");
    let err = api.mark_mentions_viewed(9).await.expect_err("unavailable");
    assert_eq!(err.error_code(), "E_HTTP_STATUS");
    assert!(err.retryable());
}

#[tokio::test]
async fn malformed_body_is_a_parse_error() {
    let (base, _) = spawn_fake_server().await;
    assert!(matches!(api_for(&base).list(99).await, Err(ApiError::Parse(_))));
}

#[tokio::test]
async fn unreachable_server_is_a_retryable_request_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let err = api_for(&format!("http://{addr}")).list(7).await.expect_err("refused");
    assert!(matches!(err, ApiError::Request(_)));
    assert!(err.retryable());
}
