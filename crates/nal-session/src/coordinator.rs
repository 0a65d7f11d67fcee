//! Session state machine
//!
//! The coordinator is fed connection events one at a time and never awaits anything, so
//! its state and the chat log only change in response to an event or a user action.
//! The frame sink is stored inside the live phase: there is no way to write a frame
//! unless the connection has opened and not yet closed.

use std::sync::Arc;

use nal_extract::Corpus;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{
    chat_log::{ChatLog, ChatMessage, Merge},
    error::{Error, Result},
    events::SessionEvent,
    protocol::{self, CONNECTION_FAILURE_MESSAGE, Inbound, Signal},
    transport::{FrameSink, LinkEvent},
};

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    AwaitingReply,
    ClosedClean,
    ClosedError,
}

impl SessionState {
    /// Closed states are final for a coordinator instance
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::ClosedClean | SessionState::ClosedError)
    }
}

/// Read-only view of a session for the presentation layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub state: SessionState,
    pub messages: Vec<ChatMessage>,
    pub waiting: bool,
    pub failure: Option<String>,
}

enum Phase {
    Idle,
    Connecting {
        first_message: String,
    },
    Live {
        sink: Box<dyn FrameSink>,
        awaiting: bool,
        closing: bool,
    },
    Closed {
        clean: bool,
    },
}

impl Phase {
    fn state(&self) -> SessionState {
        match self {
            Phase::Idle => SessionState::Idle,
            Phase::Connecting { .. } => SessionState::Connecting,
            Phase::Live { awaiting: true, .. } => SessionState::AwaitingReply,
            Phase::Live { .. } => SessionState::Open,
            Phase::Closed { clean: true } => SessionState::ClosedClean,
            Phase::Closed { clean: false } => SessionState::ClosedError,
        }
    }
}

/// Owns one session's chat log and connection state.
pub struct Coordinator {
    id: Uuid,
    corpus: Arc<Corpus>,
    log: ChatLog,
    phase: Phase,
    waiting: bool,
    failure: Option<String>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl Coordinator {
    /// Create an idle coordinator for a locked corpus
    pub fn new(corpus: Corpus) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            id: Uuid::new_v4(),
            corpus: Arc::new(corpus),
            log: ChatLog::new(),
            phase: Phase::Idle,
            waiting: false,
            failure: None,
            event_tx,
        }
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<SessionEvent> {
        self.event_tx.clone()
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn corpus(&self) -> &Arc<Corpus> {
        &self.corpus
    }

    pub fn state(&self) -> SessionState {
        self.phase.state()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        self.log.messages()
    }

    /// Whether the user is waiting for the assistant to start replying
    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    /// The user-facing connection advisory, if the session failed
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            state: self.state(),
            messages: self.log.messages().to_vec(),
            waiting: self.waiting,
            failure: self.failure.clone(),
        }
    }

    /// Begin the session: record the first user message and move to `Connecting`.
    ///
    /// The caller is expected to open the connection and report it with
    /// [`Coordinator::on_open`] or [`Coordinator::on_link_event`].
    pub fn start(&mut self, first_message: &str) -> Result<()> {
        if !matches!(self.phase, Phase::Idle) {
            return Err(Error::AlreadyStarted);
        }
        if first_message.trim().is_empty() {
            return Err(Error::EmptyMessage);
        }

        tracing::info!(
            session = %self.id,
            documents = self.corpus.documents.len(),
            corpus_chars = self.corpus.text.len(),
            "starting session"
        );

        self.failure = None;
        self.append_user(first_message);
        self.set_waiting(true);
        self.phase = Phase::Connecting {
            first_message: first_message.to_string(),
        };
        self.emit_state();
        Ok(())
    }

    /// The connection opened: send the corpus, then the first message.
    pub fn on_open(&mut self, mut sink: Box<dyn FrameSink>) {
        let first_message = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Connecting { first_message } => first_message,
            other => {
                // Late open after close, or a second open: discard the new connection.
                tracing::debug!(
                    session = %self.id,
                    state = ?other.state(),
                    "discarding unexpected connection"
                );
                self.phase = other;
                sink.close();
                return;
            }
        };

        self.phase = Phase::Live {
            sink,
            awaiting: false,
            closing: false,
        };
        self.emit_state();

        let Phase::Live { sink, awaiting, .. } = &mut self.phase else {
            return;
        };
        let sent = sink
            .send(&self.corpus.text)
            .and_then(|()| sink.send(&first_message));
        match sent {
            Ok(()) => {
                *awaiting = true;
                tracing::debug!(session = %self.id, "corpus and first message sent");
                self.emit_state();
            }
            Err(e) => {
                tracing::warn!(session = %self.id, error = %e, "failed to send opening frames");
                self.finish(false);
            }
        }
    }

    /// Feed one event from the connection.
    pub fn on_link_event(&mut self, event: LinkEvent) {
        if self.state().is_terminal() {
            tracing::debug!(session = %self.id, ?event, "ignoring event after close");
            return;
        }

        match event {
            LinkEvent::Frame(raw) => self.on_frame(&raw),
            LinkEvent::Closed { clean } => {
                let clean = clean || self.is_closing();
                if !clean {
                    tracing::warn!(session = %self.id, "connection closed unexpectedly");
                }
                self.finish(clean);
            }
            LinkEvent::Failed(reason) => {
                let clean = self.is_closing();
                if !clean {
                    tracing::warn!(session = %self.id, %reason, "connection failed");
                }
                self.finish(clean);
            }
        }
    }

    /// Send a follow-up user message.
    ///
    /// Rejected with [`Error::AwaitingReply`] while a reply is pending; nothing is
    /// appended in that case. Otherwise the message is appended first, and if no open
    /// connection exists the call fails with [`Error::NotConnected`] and the message stays
    /// in the log.
    pub fn send(&mut self, message: &str) -> Result<()> {
        if message.trim().is_empty() {
            return Err(Error::EmptyMessage);
        }
        if matches!(self.phase, Phase::Live { awaiting: true, .. }) {
            return Err(Error::AwaitingReply);
        }

        self.append_user(message);

        let Phase::Live {
            sink,
            awaiting,
            closing: false,
        } = &mut self.phase
        else {
            tracing::debug!(
                session = %self.id,
                state = ?self.state(),
                "send without open connection"
            );
            return Err(Error::NotConnected);
        };

        sink.send(message)?;
        *awaiting = true;
        self.set_waiting(true);
        self.emit_state();
        Ok(())
    }

    /// Close the session from this side.
    ///
    /// A live connection is asked to close and the session ends when the close completes.
    /// A session that never connected ends immediately.
    pub fn close(&mut self) {
        match &mut self.phase {
            Phase::Idle | Phase::Connecting { .. } => self.finish(true),
            Phase::Live { sink, closing, .. } => {
                if !*closing {
                    tracing::debug!(session = %self.id, "closing connection");
                    *closing = true;
                    sink.close();
                }
            }
            Phase::Closed { .. } => {}
        }
    }

    fn on_frame(&mut self, raw: &str) {
        match protocol::classify(raw) {
            Inbound::Blank => {}
            Inbound::Signal(signal) => self.on_signal(signal),
            Inbound::Token(token) => {
                match self.log.merge_assistant_token(token) {
                    Merge::Started(index) => {
                        let message = self.log.messages()[index].clone();
                        self.emit(SessionEvent::MessageAppended { index, message });
                    }
                    Merge::Extended(index) => {
                        self.emit(SessionEvent::TokenMerged {
                            index,
                            token: token.to_string(),
                        });
                    }
                }

                if let Phase::Live { awaiting, .. } = &mut self.phase {
                    if *awaiting {
                        *awaiting = false;
                        self.emit_state();
                    }
                }
                self.set_waiting(false);
            }
        }
    }

    fn on_signal(&mut self, signal: Signal) {
        match &signal {
            Signal::ContractReceived { detail } => {
                tracing::debug!(session = %self.id, %detail, "server acknowledged corpus");
            }
            Signal::InvalidRequest { reason } => {
                tracing::warn!(session = %self.id, %reason, "server rejected request");
            }
            Signal::UpstreamFailure => {
                tracing::warn!(session = %self.id, "server could not reach its model backend");
            }
        }
        self.emit(SessionEvent::Notice { signal });
    }

    fn finish(&mut self, clean: bool) {
        self.phase = Phase::Closed { clean };
        self.set_waiting(false);
        self.emit_state();

        if !clean {
            self.failure = Some(CONNECTION_FAILURE_MESSAGE.to_string());
            self.emit(SessionEvent::Failure {
                message: CONNECTION_FAILURE_MESSAGE.to_string(),
            });
        }
        tracing::info!(session = %self.id, clean, messages = self.log.len(), "session closed");
    }

    fn is_closing(&self) -> bool {
        matches!(self.phase, Phase::Live { closing: true, .. })
    }

    fn append_user(&mut self, text: &str) {
        let message = ChatMessage::user(text);
        let index = self.log.append(message.clone());
        self.emit(SessionEvent::MessageAppended { index, message });
    }

    fn set_waiting(&mut self, waiting: bool) {
        if self.waiting != waiting {
            self.waiting = waiting;
            self.emit(SessionEvent::WaitingChanged { waiting });
        }
    }

    fn emit_state(&self) {
        self.emit(SessionEvent::StateChanged {
            state: self.state(),
        });
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat_log::Sender;
    use nal_extract::{DocumentKind, ExtractedDocument};
    use parking_lot::Mutex;

    /// Records frames written to it; shared with the test through an `Arc`.
    #[derive(Default, Clone)]
    struct RecordingSink {
        frames: Arc<Mutex<Vec<String>>>,
        closed: Arc<Mutex<bool>>,
        fail: bool,
    }

    impl FrameSink for RecordingSink {
        fn send(&mut self, frame: &str) -> Result<()> {
            if self.fail || *self.closed.lock() {
                return Err(Error::NotConnected);
            }
            self.frames.lock().push(frame.to_string());
            Ok(())
        }

        fn close(&mut self) {
            *self.closed.lock() = true;
        }
    }

    impl RecordingSink {
        fn frames(&self) -> Vec<String> {
            self.frames.lock().clone()
        }
    }

    fn corpus() -> Corpus {
        Corpus::assemble(vec![ExtractedDocument {
            filename: "lease.txt".into(),
            kind: DocumentKind::Text("plain".into()),
            body: "The tenant shall pay rent monthly.".into(),
        }])
    }

    fn open_session() -> (Coordinator, RecordingSink) {
        let mut coordinator = Coordinator::new(corpus());
        let sink = RecordingSink::default();
        coordinator.start("Summarize the lease").unwrap();
        coordinator.on_open(Box::new(sink.clone()));
        (coordinator, sink)
    }

    fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_new_session_is_idle() {
        let coordinator = Coordinator::new(corpus());
        assert_eq!(coordinator.state(), SessionState::Idle);
        assert!(coordinator.messages().is_empty());
        assert!(!coordinator.is_waiting());
    }

    #[test]
    fn test_start_appends_first_message_and_connects() {
        let mut coordinator = Coordinator::new(corpus());
        coordinator.start("Summarize the lease").unwrap();
        assert_eq!(coordinator.state(), SessionState::Connecting);
        assert_eq!(coordinator.messages(), &[ChatMessage::user("Summarize the lease")]);
        assert!(coordinator.is_waiting());
    }

    #[test]
    fn test_start_twice_rejected() {
        let mut coordinator = Coordinator::new(corpus());
        coordinator.start("one").unwrap();
        assert!(matches!(coordinator.start("two"), Err(Error::AlreadyStarted)));
        assert_eq!(coordinator.messages().len(), 1);
    }

    #[test]
    fn test_start_with_blank_message_rejected() {
        let mut coordinator = Coordinator::new(corpus());
        assert!(matches!(coordinator.start("   "), Err(Error::EmptyMessage)));
        assert_eq!(coordinator.state(), SessionState::Idle);
        assert!(coordinator.messages().is_empty());
    }

    #[test]
    fn test_open_sends_corpus_then_first_message() {
        let (coordinator, sink) = open_session();
        assert_eq!(
            sink.frames(),
            vec![
                "--- lease.txt (PLAIN) ---\nThe tenant shall pay rent monthly.".to_string(),
                "Summarize the lease".to_string(),
            ]
        );
        assert_eq!(coordinator.state(), SessionState::AwaitingReply);
    }

    #[test]
    fn test_open_emits_open_then_awaiting() {
        let mut coordinator = Coordinator::new(corpus());
        let mut rx = coordinator.subscribe();
        coordinator.start("hi").unwrap();
        coordinator.on_open(Box::new(RecordingSink::default()));

        let states: Vec<SessionState> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::StateChanged { state } => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                SessionState::Connecting,
                SessionState::Open,
                SessionState::AwaitingReply
            ]
        );
    }

    #[test]
    fn test_ack_then_tokens_make_one_reply() {
        let (mut coordinator, _sink) = open_session();
        coordinator.on_link_event(LinkEvent::Frame("Contract received:ok".into()));
        coordinator.on_link_event(LinkEvent::Frame("Hello".into()));
        coordinator.on_link_event(LinkEvent::Frame("there".into()));

        let replies: Vec<&ChatMessage> = coordinator
            .messages()
            .iter()
            .filter(|m| m.sender == Sender::Assistant)
            .collect();
        assert_eq!(replies, vec![&ChatMessage::assistant("Hellothere")]);
        assert_eq!(coordinator.messages().len(), 2);
    }

    #[test]
    fn test_ack_alone_keeps_awaiting() {
        let (mut coordinator, _sink) = open_session();
        coordinator.on_link_event(LinkEvent::Frame("Contract received: 34 chars".into()));
        assert_eq!(coordinator.state(), SessionState::AwaitingReply);
        assert!(coordinator.is_waiting());
    }

    #[test]
    fn test_first_token_moves_to_open_once() {
        let (mut coordinator, _sink) = open_session();
        let mut rx = coordinator.subscribe();
        coordinator.on_link_event(LinkEvent::Frame("a".into()));
        coordinator.on_link_event(LinkEvent::Frame("b".into()));
        assert_eq!(coordinator.state(), SessionState::Open);
        assert!(!coordinator.is_waiting());

        let events = drain(&mut rx);
        let opens = events
            .iter()
            .filter(|e| matches!(e, SessionEvent::StateChanged { state: SessionState::Open }))
            .count();
        assert_eq!(opens, 1);
        assert!(events.contains(&SessionEvent::TokenMerged {
            index: 1,
            token: "b".into()
        }));
    }

    #[test]
    fn test_signals_never_reach_chat_log() {
        let (mut coordinator, _sink) = open_session();
        let mut rx = coordinator.subscribe();
        coordinator.on_link_event(LinkEvent::Frame("Invalid request: too short".into()));
        coordinator.on_link_event(LinkEvent::Frame("Error contacting LLM API.".into()));
        coordinator.on_link_event(LinkEvent::Frame("   ".into()));

        assert_eq!(coordinator.messages().len(), 1);
        assert!(coordinator.failure().is_none());
        assert_eq!(coordinator.state(), SessionState::AwaitingReply);

        let notices = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, SessionEvent::Notice { .. }))
            .count();
        assert_eq!(notices, 2);
    }

    #[test]
    fn test_send_while_awaiting_reply_rejected() {
        let (mut coordinator, sink) = open_session();
        let before = coordinator.messages().to_vec();
        assert!(matches!(coordinator.send("another"), Err(Error::AwaitingReply)));
        assert_eq!(coordinator.messages(), before.as_slice());
        assert_eq!(sink.frames().len(), 2);
    }

    #[test]
    fn test_send_after_reply_started() {
        let (mut coordinator, sink) = open_session();
        coordinator.on_link_event(LinkEvent::Frame("Partial".into()));
        coordinator.send("Follow up").unwrap();

        assert_eq!(coordinator.state(), SessionState::AwaitingReply);
        assert!(coordinator.is_waiting());
        assert_eq!(sink.frames().last().map(String::as_str), Some("Follow up"));

        coordinator.on_link_event(LinkEvent::Frame("Second".into()));
        assert_eq!(
            coordinator.messages(),
            &[
                ChatMessage::user("Summarize the lease"),
                ChatMessage::assistant("Partial"),
                ChatMessage::user("Follow up"),
                ChatMessage::assistant("Second"),
            ]
        );
    }

    #[test]
    fn test_send_while_connecting_is_not_connected() {
        let mut coordinator = Coordinator::new(corpus());
        coordinator.start("first").unwrap();
        assert!(matches!(coordinator.send("second"), Err(Error::NotConnected)));
        assert_eq!(coordinator.state(), SessionState::Connecting);
        assert_eq!(coordinator.messages().len(), 2);
    }

    #[test]
    fn test_send_before_start_is_not_connected() {
        let mut coordinator = Coordinator::new(corpus());
        assert!(matches!(coordinator.send("hello"), Err(Error::NotConnected)));
        assert_eq!(coordinator.state(), SessionState::Idle);
        assert_eq!(coordinator.messages(), &[ChatMessage::user("hello")]);
    }

    #[test]
    fn test_send_after_close_keeps_message() {
        let (mut coordinator, sink) = open_session();
        coordinator.on_link_event(LinkEvent::Frame("done".into()));
        coordinator.on_link_event(LinkEvent::Closed { clean: true });

        assert!(matches!(coordinator.send("anyone?"), Err(Error::NotConnected)));
        assert_eq!(coordinator.state(), SessionState::ClosedClean);
        assert_eq!(coordinator.messages().last(), Some(&ChatMessage::user("anyone?")));
        assert_eq!(sink.frames().len(), 2);
    }

    #[test]
    fn test_blank_send_rejected_without_append() {
        let (mut coordinator, _sink) = open_session();
        coordinator.on_link_event(LinkEvent::Frame("ok".into()));
        assert!(matches!(coordinator.send(" \n "), Err(Error::EmptyMessage)));
        assert_eq!(coordinator.messages().len(), 2);
    }

    #[test]
    fn test_connect_failure_is_closed_error() {
        let mut coordinator = Coordinator::new(corpus());
        let mut rx = coordinator.subscribe();
        coordinator.start("hi").unwrap();
        coordinator.on_link_event(LinkEvent::Failed("connection refused".into()));

        assert_eq!(coordinator.state(), SessionState::ClosedError);
        assert_eq!(coordinator.failure(), Some(CONNECTION_FAILURE_MESSAGE));
        assert!(!coordinator.is_waiting());
        assert!(drain(&mut rx).contains(&SessionEvent::Failure {
            message: CONNECTION_FAILURE_MESSAGE.into()
        }));
    }

    #[test]
    fn test_unexpected_close_is_closed_error() {
        let (mut coordinator, _sink) = open_session();
        coordinator.on_link_event(LinkEvent::Closed { clean: false });
        assert_eq!(coordinator.state(), SessionState::ClosedError);
        assert_eq!(coordinator.failure(), Some(CONNECTION_FAILURE_MESSAGE));
    }

    #[test]
    fn test_clean_close_has_no_advisory() {
        let (mut coordinator, _sink) = open_session();
        coordinator.on_link_event(LinkEvent::Closed { clean: true });
        assert_eq!(coordinator.state(), SessionState::ClosedClean);
        assert!(coordinator.failure().is_none());
    }

    #[test]
    fn test_local_close_ends_clean_even_without_handshake() {
        let (mut coordinator, sink) = open_session();
        coordinator.close();
        assert!(*sink.closed.lock());
        assert_eq!(coordinator.state(), SessionState::AwaitingReply);

        coordinator.on_link_event(LinkEvent::Closed { clean: false });
        assert_eq!(coordinator.state(), SessionState::ClosedClean);
        assert!(coordinator.failure().is_none());
    }

    #[test]
    fn test_close_while_connecting_ends_immediately() {
        let mut coordinator = Coordinator::new(corpus());
        coordinator.start("hi").unwrap();
        coordinator.close();
        assert_eq!(coordinator.state(), SessionState::ClosedClean);
    }

    #[test]
    fn test_terminal_state_ignores_late_events() {
        let (mut coordinator, _sink) = open_session();
        coordinator.on_link_event(LinkEvent::Frame("reply".into()));
        coordinator.on_link_event(LinkEvent::Closed { clean: false });
        coordinator.on_link_event(LinkEvent::Frame("late token".into()));
        coordinator.on_link_event(LinkEvent::Closed { clean: true });

        assert_eq!(coordinator.state(), SessionState::ClosedError);
        assert_eq!(coordinator.messages().last(), Some(&ChatMessage::assistant("reply")));
    }

    #[test]
    fn test_late_open_is_discarded() {
        let mut coordinator = Coordinator::new(corpus());
        coordinator.start("hi").unwrap();
        coordinator.close();

        let late = RecordingSink::default();
        coordinator.on_open(Box::new(late.clone()));
        assert!(late.frames().is_empty());
        assert!(*late.closed.lock());
        assert_eq!(coordinator.state(), SessionState::ClosedClean);
    }

    #[test]
    fn test_failed_opening_write_is_closed_error() {
        let mut coordinator = Coordinator::new(corpus());
        coordinator.start("hi").unwrap();
        let sink = RecordingSink {
            fail: true,
            ..Default::default()
        };
        coordinator.on_open(Box::new(sink));
        assert_eq!(coordinator.state(), SessionState::ClosedError);
    }

    #[test]
    fn test_snapshot_reflects_state() {
        let (mut coordinator, _sink) = open_session();
        coordinator.on_link_event(LinkEvent::Frame("Hi".into()));
        let snapshot = coordinator.snapshot();
        assert_eq!(snapshot.id, coordinator.id());
        assert_eq!(snapshot.state, SessionState::Open);
        assert_eq!(snapshot.messages.len(), 2);
        assert!(!snapshot.waiting);
        assert!(snapshot.failure.is_none());
    }
}
