//! Durable message API: trait and `reqwest` implementation.
//!
//! ERROR HANDLING
//! ==============
//! Every call returns [`ApiError`]. Nothing here retries; `retryable` only
//! tells the UI whether offering a manual retry makes sense.

#[cfg(test)]
#[path = "api_test.rs"]
mod api_test;

use reqwest::header::{COOKIE, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace};

use crate::config::ChatConfig;
use crate::error::ErrorCode;
use crate::types::{Message, ProjectId};
use crate::wire::{MessageRecord, SendBody, UpdateBody, i64_from_value};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("http request failed: {0}")]
    Request(String),
    #[error("server returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid response body: {0}")]
    Parse(String),
    #[error("http client build failed: {0}")]
    HttpClientBuild(String),
}

impl ErrorCode for ApiError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Request(_) => "E_HTTP_REQUEST",
            Self::Status { .. } => "E_HTTP_STATUS",
            Self::Parse(_) => "E_HTTP_PARSE",
            Self::HttpClientBuild(_) => "E_HTTP_CLIENT_BUILD",
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Request(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Parse(_) | Self::HttpClientBuild(_) => false,
        }
    }
}

/// Request/response half of the message backend.
#[async_trait::async_trait]
pub trait MessageApi: Send + Sync {
    /// Full history of a project, oldest first.
    async fn list(&self, project_id: ProjectId) -> Result<Vec<Message>, ApiError>;

    /// Persist a new message.
    async fn send(&self, project_id: ProjectId, body: &SendBody) -> Result<Message, ApiError>;

    /// Replace the text of a message.
    async fn update(&self, message_id: i64, content: &str) -> Result<Message, ApiError>;

    async fn delete(&self, message_id: i64) -> Result<(), ApiError>;

    /// Projects with an unread mention of the current user.
    async fn list_mentioned_projects(&self) -> Result<Vec<ProjectId>, ApiError>;

    async fn mark_mentions_viewed(&self, project_id: ProjectId) -> Result<(), ApiError>;
}

/// [`MessageApi`] over the REST endpoints, authenticated by session cookie.
#[derive(Clone)]
pub struct HttpMessageApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMessageApi {
    /// Build the HTTP client with the session cookie and timeouts of `config`.
    ///
    /// # Errors
    ///
    /// Fails when the session token is not a valid header value or the
    /// client cannot be built.
    pub fn new(config: &ChatConfig) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = config.session_token.as_deref() {
            let cookie = HeaderValue::from_str(&format!("session_token={token}"))
                .map_err(|e| ApiError::HttpClientBuild(e.to_string()))?;
            headers.insert(COOKIE, cookie);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ApiError::HttpClientBuild(e.to_string()))?;

        Ok(Self { client, base_url: config.base_url.trim_end_matches('/').to_owned() })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, ApiError> {
        let response = request.send().await.map_err(|e| ApiError::Request(e.to_string()))?;
        let status = response.status();
        trace!(status = status.as_u16(), url = %response.url(), "api response");
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        debug!(status = status.as_u16(), %body, "api call rejected");
        Err(ApiError::Status { status: status.as_u16(), body })
    }

    async fn json<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T, ApiError> {
        let response = self.execute(request).await?;
        response.json::<T>().await.map_err(|e| ApiError::Parse(e.to_string()))
    }
}

#[async_trait::async_trait]
impl MessageApi for HttpMessageApi {
    async fn list(&self, project_id: ProjectId) -> Result<Vec<Message>, ApiError> {
        let url = self.url(&format!("/api/projects/{project_id}/messages"));
        let records: Vec<MessageRecord> = self.json(self.client.get(url)).await?;
        Ok(records.into_iter().map(Message::from).collect())
    }

    async fn send(&self, project_id: ProjectId, body: &SendBody) -> Result<Message, ApiError> {
        let url = self.url(&format!("/api/projects/{project_id}/messages"));
        let record: MessageRecord = self.json(self.client.post(url).json(body)).await?;
        Ok(record.into())
    }

    async fn update(&self, message_id: i64, content: &str) -> Result<Message, ApiError> {
        let url = self.url(&format!("/api/messages/{message_id}"));
        let body = UpdateBody { content: content.to_owned() };
        let record: MessageRecord = self.json(self.client.patch(url).json(&body)).await?;
        Ok(record.into())
    }

    async fn delete(&self, message_id: i64) -> Result<(), ApiError> {
        let url = self.url(&format!("/api/messages/{message_id}"));
        self.execute(self.client.delete(url)).await.map(|_| ())
    }

    async fn list_mentioned_projects(&self) -> Result<Vec<ProjectId>, ApiError> {
        let items: Vec<Value> = self.json(self.client.get(self.url("/api/mentions"))).await?;
        items
            .iter()
            .map(|item| {
                item.get("project_id")
                    .map_or_else(|| i64_from_value(item), i64_from_value)
                    .ok_or_else(|| ApiError::Parse(format!("unexpected mention entry: {item}")))
            })
            .collect()
    }

    async fn mark_mentions_viewed(&self, project_id: ProjectId) -> Result<(), ApiError> {
        let url = self.url(&format!("/api/projects/{project_id}/mentions/viewed"));
        self.execute(self.client.post(url)).await.map(|_| ())
    }
}
