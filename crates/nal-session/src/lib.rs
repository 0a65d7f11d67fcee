//! nal-session: client side of a streaming document-analysis chat
//!
//! This crate owns the chat log and the single duplex connection of a session. The
//! [`Coordinator`] is a synchronous state machine fed by connection events; the
//! [`SessionHandle`] runs it on one tokio task and gives the presentation layer a way to
//! send messages, subscribe to [`SessionEvent`]s and read snapshots.

pub mod chat_log;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod handle;
pub mod protocol;
pub mod transport;

pub use chat_log::{ChatLog, ChatMessage, Merge, Sender};
pub use coordinator::{Coordinator, SessionSnapshot, SessionState};
pub use error::{Error, Result};
pub use events::SessionEvent;
pub use handle::{SessionHandle, spawn_session};
pub use protocol::{CONNECTION_FAILURE_MESSAGE, Endpoint, Signal};
pub use transport::{Connector, FrameSink, Link, LinkEvent, LinkEventStream, WsConnector};
