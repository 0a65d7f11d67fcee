//! Error types for nal-session

use thiserror::Error;

/// Result type alias using nal-session Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during session operations
#[derive(Error, Debug)]
pub enum Error {
    /// A send was attempted without an open connection
    #[error("Not connected to the server")]
    NotConnected,

    /// A send was attempted while the previous message is still unanswered
    #[error("Still waiting for a reply to the previous message")]
    AwaitingReply,

    /// The message was blank after trimming
    #[error("Message is empty")]
    EmptyMessage,

    /// `start` was called on a session that already left the idle state
    #[error("Session already started")]
    AlreadyStarted,

    /// The session task is gone
    #[error("Session is closed")]
    SessionClosed,

    /// The page origin could not be turned into a streaming endpoint
    #[error("Invalid origin: {0}")]
    InvalidOrigin(String),

    /// The connection could not be established
    #[error("Connection failed: {0}")]
    Connect(String),

    /// An error from the WebSocket layer
    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl Error {
    /// Check if this error means the connection itself is unusable
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            Error::Connect(_) | Error::WebSocket(_) | Error::SessionClosed
        )
    }

    /// Check if the caller may retry the same message later in this session
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::AwaitingReply)
    }
}
