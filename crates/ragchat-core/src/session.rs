//! Chat session controller
//!
//! Issues the request, validates the response, drives the framer, and reports
//! every state transition to the caller's callback. Each session ends with
//! exactly one `closed` update.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cancellation::ChatCancellation;
use crate::config::ChatConfig;
use crate::error::ChatError;
use crate::framer::{self, StreamEnd};
use crate::state::TaskState;
use crate::transport::{ChatRequest, ChatTransport, ReqwestTransport};

/// One state transition delivered to the caller
#[derive(Debug)]
pub struct ChatUpdate {
    /// Decoded payload for `running`, the raw sentinel for a `closed` caused by it
    pub data: Option<String>,
    pub status: TaskState,
    /// Set only on a `closed` caused by a failure
    pub error: Option<ChatError>,
}

impl ChatUpdate {
    pub fn open() -> Self {
        Self {
            data: None,
            status: TaskState::Open,
            error: None,
        }
    }

    pub fn running(data: String) -> Self {
        Self {
            data: Some(data),
            status: TaskState::Running,
            error: None,
        }
    }

    pub fn closed(data: Option<String>, error: Option<ChatError>) -> Self {
        Self {
            data,
            status: TaskState::Closed,
            error,
        }
    }

    /// A `closed` update carrying an error means the exchange failed
    pub fn is_failure(&self) -> bool {
        self.status.is_terminal() && self.error.is_some()
    }
}

/// Per-session state. Drops every update after the first `closed`.
struct Session<F>
where
    F: FnMut(ChatUpdate),
{
    state: TaskState,
    callback: F,
}

impl<F> Session<F>
where
    F: FnMut(ChatUpdate),
{
    fn new(callback: F) -> Self {
        Self {
            state: TaskState::Idle,
            callback,
        }
    }

    fn emit(&mut self, update: ChatUpdate) {
        if self.state.is_terminal() {
            debug!("Dropping {} update after close", update.status);
            return;
        }
        self.state = update.status;
        (self.callback)(update);
    }
}

impl<F> Drop for Session<F>
where
    F: FnMut(ChatUpdate),
{
    fn drop(&mut self) {
        // Task aborted mid-flight (e.g. runtime shutdown)
        if !self.state.is_terminal() {
            self.emit(ChatUpdate::closed(None, None));
        }
    }
}

/// Handle to an in-flight chat session
#[derive(Debug)]
pub struct ChatHandle {
    cancellation: ChatCancellation,
    task: JoinHandle<()>,
}

impl ChatHandle {
    /// Cancel the session. Calling this more than once has no further effect.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Wait for the session to finish
    pub async fn wait(self) {
        if let Err(e) = self.task.await {
            warn!("Chat session task failed: {}", e);
        }
    }
}

/// Starts chat sessions against one transport
#[derive(Clone)]
pub struct ChatClient {
    transport: Arc<dyn ChatTransport>,
    config: ChatConfig,
}

impl ChatClient {
    /// Client sending to `config.endpoint` over reqwest
    pub fn new(config: ChatConfig) -> Self {
        let transport = Arc::new(ReqwestTransport::new(config.endpoint.clone()));
        Self::with_transport(transport, config)
    }

    pub fn with_transport(transport: Arc<dyn ChatTransport>, config: ChatConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Start streaming an answer to `question`.
    ///
    /// Returns `None` without calling `callback` when the question is blank.
    /// Otherwise the session runs on the current tokio runtime and the
    /// returned handle can cancel it.
    pub fn start_chat<F>(&self, question: &str, callback: F) -> Option<ChatHandle>
    where
        F: FnMut(ChatUpdate) + Send + 'static,
    {
        if question.trim().is_empty() {
            debug!("Ignoring blank question");
            return None;
        }

        let cancellation = ChatCancellation::new();
        let token = cancellation.token();
        let transport = Arc::clone(&self.transport);
        let request = ChatRequest::new(question);
        let deadline = self.config.deadline();

        let task = tokio::spawn(async move {
            let mut session = Session::new(callback);
            let run = run_session(transport.as_ref(), &request, &token, &mut session);
            tokio::pin!(run);

            match deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = &mut run => {}
                        _ = tokio::time::sleep(deadline) => {
                            warn!("Chat deadline of {:?} reached, cancelling", deadline);
                            token.cancel();
                            run.await;
                        }
                    }
                }
                None => run.await,
            }
        });

        Some(ChatHandle { cancellation, task })
    }

    /// Like [`ChatClient::start_chat`], delivering updates over a channel
    pub fn start_chat_stream(
        &self,
        question: &str,
    ) -> Option<(ChatHandle, mpsc::UnboundedReceiver<ChatUpdate>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.start_chat(question, move |update| {
            let _ = tx.send(update);
        })?;
        Some((handle, rx))
    }
}

/// Run one exchange and emit the final `closed` update
async fn run_session<F>(
    transport: &dyn ChatTransport,
    request: &ChatRequest,
    token: &CancellationToken,
    session: &mut Session<F>,
) where
    F: FnMut(ChatUpdate),
{
    info!("Chat session started ({} chars)", request.question.len());

    let closed = match exchange(transport, request, token, session).await {
        Ok(data) => ChatUpdate::closed(data, None),
        Err(e) if token.is_cancelled() => {
            debug!("Suppressing error after cancellation: {}", e);
            ChatUpdate::closed(None, None)
        }
        Err(e) => {
            if e.is_protocol_error() {
                warn!("Chat request rejected: {}", e);
            } else {
                error!("Chat session failed: {}", e);
            }
            ChatUpdate::closed(None, Some(e))
        }
    };

    info!(
        "Chat session closed (cancelled: {}, failed: {})",
        token.is_cancelled(),
        closed.is_failure()
    );
    session.emit(closed);
}

/// Returns the raw terminal payload if the stream ended with one
async fn exchange<F>(
    transport: &dyn ChatTransport,
    request: &ChatRequest,
    token: &CancellationToken,
    session: &mut Session<F>,
) -> Result<Option<String>, ChatError>
where
    F: FnMut(ChatUpdate),
{
    let response = tokio::select! {
        biased;
        _ = token.cancelled() => return Ok(None),
        response = transport.send(request) => response?,
    };

    if !response.is_success() {
        return Err(ChatError::Status {
            status: response.status,
        });
    }
    if !response.is_event_stream() {
        return Err(ChatError::UnexpectedContentType {
            content_type: response.content_type,
        });
    }

    session.emit(ChatUpdate::open());

    let body = response.body.ok_or(ChatError::EmptyBody)?;
    let end = framer::read_stream(body, token, |payload| {
        session.emit(ChatUpdate::running(payload))
    })
    .await?;

    Ok(match end {
        StreamEnd::Done(raw) => Some(raw),
        StreamEnd::Finished | StreamEnd::Cancelled => None,
    })
}
