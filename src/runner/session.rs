//! Conversation session as seen by the runner.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One logical conversation with the AI CLI.
///
/// Owned by the caller; the runner borrows it for the duration of one
/// command and consumes `initial_prompt` the first time it is sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub working_directory: PathBuf,
    pub conversation_started: bool,
    pub initial_prompt: Option<String>,
    pub is_restored_session: bool,
}

/// Which argument-building path applies to an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    /// First command of a brand-new conversation.
    New,
    /// Follow-up command in a conversation this process already started.
    Continued,
    /// Conversation restored from an earlier server run.
    Restored,
}

impl Session {
    /// Create a brand-new session with a random id.
    #[must_use]
    pub fn new(working_directory: impl Into<PathBuf>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), working_directory)
    }

    /// Create a brand-new session with a known id.
    #[must_use]
    pub fn with_id(session_id: impl Into<String>, working_directory: impl Into<PathBuf>) -> Self {
        Self {
            session_id: session_id.into(),
            working_directory: working_directory.into(),
            conversation_started: false,
            initial_prompt: None,
            is_restored_session: false,
        }
    }

    /// Set a prompt sent ahead of the first user prompt.
    #[must_use]
    pub fn initial_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.initial_prompt = Some(prompt.into());
        self
    }

    /// Mark the session as restored from persistence.
    #[must_use]
    pub fn restored(mut self) -> Self {
        self.is_restored_session = true;
        self
    }

    /// Which argument-building path applies. Restored wins over continued.
    #[must_use]
    pub fn continuation(&self) -> Continuation {
        if self.is_restored_session {
            Continuation::Restored
        } else if self.conversation_started {
            Continuation::Continued
        } else {
            Continuation::New
        }
    }

    /// Build the text written to stdin, consuming the initial prompt for a
    /// new session.
    pub fn take_effective_prompt(&mut self, prompt: &str) -> String {
        if self.continuation() != Continuation::New {
            return prompt.to_string();
        }
        match self.initial_prompt.take() {
            Some(initial) if !initial.trim().is_empty() => format!("{initial}\n\n{prompt}"),
            _ => prompt.to_string(),
        }
    }
}
