//! Chat task state
//!
//! `Idle → Running → Open → Closed`, where `Running` repeats once per payload
//! and `Closed` is terminal.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state reported to chat observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// No request issued yet
    #[default]
    Idle,
    /// A payload arrived
    Running,
    /// Response headers validated, stream established
    Open,
    /// Exchange finished; nothing follows
    Closed,
}

impl TaskState {
    /// Whether no further updates may follow this state
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Closed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Idle => "idle",
            TaskState::Running => "running",
            TaskState::Open => "open",
            TaskState::Closed => "closed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_lowercase() {
        let json = serde_json::to_string(&TaskState::Running).unwrap();
        assert_eq!(json, "\"running\"");

        let state: TaskState = serde_json::from_str("\"closed\"").unwrap();
        assert_eq!(state, TaskState::Closed);
    }

    #[test]
    fn test_only_closed_is_terminal() {
        assert!(TaskState::Closed.is_terminal());
        assert!(!TaskState::Idle.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(!TaskState::Open.is_terminal());
        assert_eq!(TaskState::default(), TaskState::Idle);
    }
}
