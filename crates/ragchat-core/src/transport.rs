//! HTTP transport for chat requests
//!
//! The session controller only needs a status, a content type, and a body
//! stream, so the transport is a trait with a reqwest implementation.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Serialize;
use tracing::debug;

use crate::error::ChatError;

/// Media type of a streaming response
pub const EVENT_STREAM: &str = "text/event-stream";

/// Response body as a stream of raw chunks
pub type ByteStream = BoxStream<'static, Result<Bytes, ChatError>>;

/// JSON body of a chat request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatRequest {
    pub question: String,
}

impl ChatRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
        }
    }
}

/// What the controller sees of an HTTP response
pub struct ChatResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Option<ByteStream>,
}

impl ChatResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Whether the declared content type is an event stream
    pub fn is_event_stream(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.contains(EVENT_STREAM))
    }
}

impl std::fmt::Debug for ChatResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatResponse")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

/// Sends a chat request and returns the response once headers arrive
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse, ChatError>;
}

/// Transport over a reqwest client
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl ReqwestTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint)
    }

    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl ChatTransport for ReqwestTransport {
    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse, ChatError> {
        debug!("POST {}", self.endpoint);

        // `.json()` sets Content-Type: application/json
        let response = self
            .client
            .post(&self.endpoint)
            .header(ACCEPT, EVENT_STREAM)
            .json(request)
            .send()
            .await?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        debug!("Response: status={}, content-type={:?}", status, content_type);

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| ChatError::Read(e.to_string())))
            .boxed();

        Ok(ChatResponse {
            status,
            content_type,
            body: Some(body),
        })
    }
}
