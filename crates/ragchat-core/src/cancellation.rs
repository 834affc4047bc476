//! Cancellation support for chat sessions
//!
//! The controller owns the token; the framer read loop only observes it.

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Wrapper around CancellationToken for one chat session
#[derive(Debug, Clone, Default)]
pub struct ChatCancellation {
    token: CancellationToken,
}

impl ChatCancellation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the session. Calling this again has no effect.
    pub fn cancel(&self) {
        if !self.token.is_cancelled() {
            debug!("Chat session cancelled");
        }
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token handed to the read loop
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}
