//! Session event types

use serde::{Deserialize, Serialize};

use crate::chat_log::ChatMessage;
use crate::coordinator::SessionState;
use crate::protocol::Signal;

/// Events emitted by a session as its state and chat log change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The session moved to a new state
    StateChanged { state: SessionState },

    /// A message was added to the chat log (user turn or the first token of a reply)
    MessageAppended { index: usize, message: ChatMessage },

    /// A token was appended to the assistant message at `index`
    TokenMerged { index: usize, token: String },

    /// The "waiting for a reply" flag changed
    WaitingChanged { waiting: bool },

    /// The server sent an acknowledgement or diagnostic frame
    Notice { signal: Signal },

    /// The connection failed; `message` is the user-facing advisory
    Failure { message: String },
}

impl SessionEvent {
    /// Check if this event ends the session
    pub fn is_terminal(&self) -> bool {
        match self {
            SessionEvent::StateChanged { state } => state.is_terminal(),
            SessionEvent::Failure { .. } => true,
            _ => false,
        }
    }
}
