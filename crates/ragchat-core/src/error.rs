//! Error types for chat sessions

use thiserror::Error;

/// Failure while turning decoded text into payloads
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Percent escapes did not decode to valid UTF-8
    #[error("invalid percent-encoded payload: {payload:?}")]
    InvalidPercentEncoding { payload: String },
}

/// Errors that end a chat session
///
/// Every variant is delivered to the observer as a `closed` update.
/// Cancellation is never an error.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The request could not be sent or the response headers never arrived
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with a non-success status
    #[error("server returned HTTP {status}")]
    Status { status: u16 },

    /// The response is not an event stream
    #[error("unexpected Content-Type: {}", content_type.as_deref().unwrap_or("<none>"))]
    UnexpectedContentType { content_type: Option<String> },

    /// The response carried no body to stream from
    #[error("empty response from server")]
    EmptyBody,

    /// Reading the body failed after the stream was established
    #[error("error reading stream: {0}")]
    Read(String),

    /// A payload could not be decoded
    #[error(transparent)]
    Decode(#[from] FrameError),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ChatError {
    /// Whether the failure happened before the stream was established
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            ChatError::Status { .. } | ChatError::UnexpectedContentType { .. } | ChatError::EmptyBody
        )
    }
}
