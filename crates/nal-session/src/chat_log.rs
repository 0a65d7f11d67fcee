//! Chat log: ordered turns with in-place growth of the trailing assistant reply.

use serde::{Deserialize, Serialize};

/// Who wrote a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

/// One chat turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub text: String,
    pub sender: Sender,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sender: Sender::User,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sender: Sender::Assistant,
        }
    }

    pub fn is_assistant(&self) -> bool {
        self.sender == Sender::Assistant
    }
}

/// Where an assistant token ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Merge {
    /// A new assistant message was started at this index
    Started(usize),
    /// The assistant message at this index was extended
    Extended(usize),
}

impl Merge {
    pub fn index(self) -> usize {
        match self {
            Merge::Started(i) | Merge::Extended(i) => i,
        }
    }
}

/// Ordered chat turns.
///
/// Only the last entry is ever mutated, and only while it is an assistant message, so
/// two assistant messages are never adjacent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatLog {
    messages: Vec<ChatMessage>,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message and return its index.
    ///
    /// Assistant messages go through [`ChatLog::merge_assistant_token`].
    pub fn append(&mut self, message: ChatMessage) -> usize {
        if message.is_assistant() {
            return self.merge_assistant_token(&message.text).index();
        }
        self.messages.push(message);
        self.messages.len() - 1
    }

    /// Extend the trailing assistant message, or start one after a user turn.
    pub fn merge_assistant_token(&mut self, token: &str) -> Merge {
        match self.messages.last_mut() {
            Some(last) if last.is_assistant() => {
                last.text.push_str(token);
                Merge::Extended(self.messages.len() - 1)
            }
            _ => {
                self.messages.push(ChatMessage::assistant(token));
                Merge::Started(self.messages.len() - 1)
            }
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
