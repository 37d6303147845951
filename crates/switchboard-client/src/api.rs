//! REST collaborator.
//!
//! [`ConversationApi`] is the request/response contract the store consumes.
//! [`HttpApi`] implements it over HTTP with a bearer token taken from the
//! [`CredentialGate`] on every request.
//!
//! # Endpoints
//!
//! ```text
//! GET  {base}/conversations?channel=&status=   -> [ConversationSummary]
//! GET  {base}/conversations/{id}               -> Conversation
//! POST {base}/conversations/{id}/messages      -> Message
//! POST {base}/conversations/{id}/read          -> any 2xx
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use switchboard_core::CredentialGate;
use switchboard_proto::{
    Conversation, ConversationFilter, ConversationId, ConversationSummary, Message,
};
use thiserror::Error;

/// Bounded timeout for every REST call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest server error body kept in [`ApiError::Status`].
const MAX_ERROR_BODY: usize = 200;

/// REST failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// No credential, or the server rejected it (401/403).
    #[error("not authenticated")]
    Unauthorized,

    /// The request did not complete within the timeout.
    #[error("request timed out after {after:?}")]
    Timeout {
        /// Configured timeout
        after: Duration,
    },

    /// Non-success status other than 401/403.
    #[error("server returned {status}: {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Error message from the body, truncated
        message: String,
    },

    /// Connection or I/O failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Response body did not match the expected shape.
    #[error("invalid response body: {0}")]
    Decode(String),

    /// Base URL cannot carry path segments.
    #[error("invalid base url: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    /// Whether this is an authentication failure, which ends the session.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }

    /// Returns true if this error may succeed on retry.
    ///
    /// Timeouts, connection failures, throttling, and server-side errors are
    /// transient. Authentication failures are never transient: retrying with
    /// the same credential cannot succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Transport(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Unauthorized | Self::Decode(_) | Self::InvalidUrl(_) => false,
        }
    }
}

/// Request/response contract for conversation data.
#[async_trait]
pub trait ConversationApi: Send + Sync {
    /// List conversation summaries matching `filter`.
    async fn list_conversations(
        &self,
        filter: &ConversationFilter,
    ) -> Result<Vec<ConversationSummary>, ApiError>;

    /// Fetch one conversation with its messages.
    async fn fetch_conversation(&self, id: &ConversationId) -> Result<Conversation, ApiError>;

    /// Send a message; returns the created message.
    async fn send_message(&self, id: &ConversationId, content: &str) -> Result<Message, ApiError>;

    /// Mark a conversation as read.
    async fn mark_read(&self, id: &ConversationId) -> Result<(), ApiError>;
}

#[derive(Serialize)]
struct SendBody<'a> {
    content: &'a str,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(alias = "error")]
    message: String,
}

/// [`ConversationApi`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpApi {
    client: reqwest::Client,
    base: Url,
    gate: CredentialGate,
    timeout: Duration,
}

impl HttpApi {
    /// Create a client rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// - `ApiError::InvalidUrl` if `base_url` does not parse or cannot carry
    ///   path segments
    /// - `ApiError::Transport` if the HTTP client cannot be built
    pub fn new(base_url: &str, gate: CredentialGate, timeout: Duration) -> Result<Self, ApiError> {
        let base = Url::parse(base_url).map_err(|e| ApiError::InvalidUrl(e.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl(format!("{base_url} cannot be a base")));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        Ok(Self { client, base, gate, timeout })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder, ApiError> {
        let credential = self.gate.current().ok_or(ApiError::Unauthorized)?;
        Ok(request.bearer_auth(credential.expose()))
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, ApiError> {
        let response = self.authorized(request)?.send().await.map_err(|e| self.classify(&e))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            tracing::warn!(%status, url = %response.url(), "request rejected as unauthenticated");
            return Err(ApiError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status { status: status.as_u16(), message: error_message(&body) });
        }

        Ok(response)
    }

    async fn json<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T, ApiError> {
        let response = self.execute(request).await?;
        let bytes = response.bytes().await.map_err(|e| self.classify(&e))?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
    }

    fn classify(&self, err: &reqwest::Error) -> ApiError {
        if err.is_timeout() {
            ApiError::Timeout { after: self.timeout }
        } else if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

fn error_message(body: &str) -> String {
    let message = serde_json::from_str::<ErrorBody>(body).map_or_else(|_| body.trim().to_owned(), |b| b.message);
    message.chars().take(MAX_ERROR_BODY).collect()
}

#[async_trait]
impl ConversationApi for HttpApi {
    async fn list_conversations(
        &self,
        filter: &ConversationFilter,
    ) -> Result<Vec<ConversationSummary>, ApiError> {
        let url = self.url(&["conversations"])?;
        tracing::debug!(?filter, "listing conversations");
        self.json(self.client.get(url).query(&filter.query_pairs())).await
    }

    async fn fetch_conversation(&self, id: &ConversationId) -> Result<Conversation, ApiError> {
        let url = self.url(&["conversations", id.as_str()])?;
        self.json(self.client.get(url)).await
    }

    async fn send_message(&self, id: &ConversationId, content: &str) -> Result<Message, ApiError> {
        let url = self.url(&["conversations", id.as_str(), "messages"])?;
        self.json(self.client.post(url).json(&SendBody { content })).await
    }

    async fn mark_read(&self, id: &ConversationId) -> Result<(), ApiError> {
        let url = self.url(&["conversations", id.as_str(), "read"])?;
        self.execute(self.client.post(url)).await.map(|_| ())
    }
}
