//! Answer accumulation
//!
//! Folds session updates into the text shown to the user.

use ragchat_core::{ChatUpdate, TaskState};

/// Shown in place of the answer when the exchange fails
pub const FAILURE_TEXT: &str = "Error occurred while fetching response.";

/// What the terminal should do after an update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerEvent {
    /// Stream established
    Opened,
    /// Append this text
    Delta(String),
    /// Answer complete
    Finished,
    /// Exchange failed with this error message
    Failed(String),
}

/// The answer being streamed for one question
#[derive(Debug, Default)]
pub struct Answer {
    text: String,
    state: TaskState,
    loading: bool,
}

impl Answer {
    /// Fresh answer in the loading state
    pub fn loading() -> Self {
        Self {
            loading: true,
            ..Self::default()
        }
    }

    pub fn apply(&mut self, update: ChatUpdate) -> Option<AnswerEvent> {
        if self.state.is_terminal() {
            return None;
        }
        self.state = update.status;

        match update.status {
            TaskState::Idle => None,
            TaskState::Open => Some(AnswerEvent::Opened),
            TaskState::Running => {
                let delta = update.data.unwrap_or_default();
                self.text.push_str(&delta);
                Some(AnswerEvent::Delta(delta))
            }
            TaskState::Closed => {
                self.loading = false;
                match update.error {
                    Some(error) => {
                        self.text = FAILURE_TEXT.to_string();
                        Some(AnswerEvent::Failed(error.to_string()))
                    }
                    None => Some(AnswerEvent::Finished),
                }
            }
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Whether anything has been shown yet
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}
