//! Runs a coordinator on its own task and hands out a cloneable handle to it.

use futures::StreamExt;
use nal_extract::Corpus;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    coordinator::{Coordinator, SessionSnapshot, SessionState},
    error::{Error, Result},
    events::SessionEvent,
    protocol::Endpoint,
    transport::{Connector, LinkEvent, LinkEventStream},
};

enum Command {
    Send {
        text: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Close,
}

/// A cloneable handle to a running session.
///
/// The session task lives until every handle is dropped, so sends after a close still
/// reach the chat log and report [`Error::NotConnected`]. Dropping the last handle
/// discards the connection without a close handshake.
#[derive(Clone)]
pub struct SessionHandle {
    id: Uuid,
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<SessionEvent>,
    snapshot: Arc<RwLock<SessionSnapshot>>,
    corpus: Arc<Corpus>,
    finished: CancellationToken,
}

/// Start a session over `connector` and return its handle.
///
/// The first message is recorded before the connection is attempted. The returned
/// receiver is subscribed before anything happens, so it sees every event.
pub fn spawn_session(
    connector: Arc<dyn Connector>,
    endpoint: Endpoint,
    corpus: Corpus,
    first_message: &str,
) -> Result<(SessionHandle, broadcast::Receiver<SessionEvent>)> {
    let mut coordinator = Coordinator::new(corpus);
    let events = coordinator.subscribe();
    coordinator.start(first_message)?;
    Ok((SessionHandle::spawn(coordinator, connector, endpoint), events))
}

impl SessionHandle {
    /// Drive an already started coordinator on a new task.
    pub fn spawn(
        coordinator: Coordinator,
        connector: Arc<dyn Connector>,
        endpoint: Endpoint,
    ) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let handle = Self {
            id: coordinator.id(),
            commands,
            events: coordinator.event_sender(),
            snapshot: Arc::new(RwLock::new(coordinator.snapshot())),
            corpus: Arc::clone(coordinator.corpus()),
            finished: CancellationToken::new(),
        };

        let span = tracing::info_span!("session", id = %handle.id);
        let driver = Driver {
            coordinator,
            snapshot: Arc::clone(&handle.snapshot),
            finished: handle.finished.clone(),
        };
        tokio::spawn(driver.run(connector, endpoint, rx).instrument(span));
        handle
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Send a follow-up message and wait for the coordinator to accept or reject it.
    pub async fn send(&self, text: impl Into<String>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Send {
                text: text.into(),
                reply,
            })
            .map_err(|_| Error::SessionClosed)?;
        rx.await.map_err(|_| Error::SessionClosed)?
    }

    /// Ask the session to close.
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Latest snapshot of the session
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.read().clone()
    }

    pub fn state(&self) -> SessionState {
        self.snapshot.read().state
    }

    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    /// Whether the session has reached a closed state
    pub fn is_finished(&self) -> bool {
        self.finished.is_cancelled()
    }

    /// Wait until the session reaches a closed state.
    pub async fn finished(&self) {
        self.finished.cancelled().await;
    }

    /// Wait until the session is finished, or quiet: no reply pending and no event for
    /// `idle`. The server never marks the end of a reply, so quiet is the best signal.
    pub async fn settle(&self, idle: Duration) {
        let mut events = self.subscribe();
        loop {
            if self.is_finished() {
                return;
            }
            tokio::select! {
                _ = self.finished() => return,
                received = tokio::time::timeout(idle, events.recv()) => match received {
                    Ok(Ok(_)) | Ok(Err(broadcast::error::RecvError::Lagged(_))) => {}
                    Ok(Err(broadcast::error::RecvError::Closed)) => return,
                    Err(_) => {
                        if !self.snapshot.read().waiting {
                            return;
                        }
                    }
                },
            }
        }
    }
}

struct Driver {
    coordinator: Coordinator,
    snapshot: Arc<RwLock<SessionSnapshot>>,
    finished: CancellationToken,
}

impl Driver {
    async fn run(
        mut self,
        connector: Arc<dyn Connector>,
        endpoint: Endpoint,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) {
        tracing::debug!(%endpoint, "connecting");
        let mut connect = connector.connect(&endpoint);
        let mut connecting = self.coordinator.state() == SessionState::Connecting;
        let mut link_events: Option<LinkEventStream> = None;

        loop {
            tokio::select! {
                result = &mut connect, if connecting => {
                    connecting = false;
                    match result {
                        Ok(link) => {
                            self.coordinator.on_open(link.sink);
                            link_events = Some(link.events);
                        }
                        Err(e) => self.coordinator.on_link_event(LinkEvent::Failed(e.to_string())),
                    }
                }
                event = next_link_event(&mut link_events), if link_events.is_some() => {
                    let event = event.unwrap_or(LinkEvent::Closed { clean: false });
                    if matches!(event, LinkEvent::Closed { .. } | LinkEvent::Failed(_)) {
                        link_events = None;
                    }
                    self.coordinator.on_link_event(event);
                }
                command = commands.recv() => match command {
                    Some(Command::Send { text, reply }) => {
                        let result = self.coordinator.send(&text);
                        self.publish();
                        let _ = reply.send(result);
                    }
                    Some(Command::Close) => self.coordinator.close(),
                    None => {
                        tracing::debug!(
                            state = ?self.coordinator.state(),
                            "all handles dropped, discarding session"
                        );
                        break;
                    }
                },
            }

            self.publish();

            if self.coordinator.state().is_terminal() {
                connecting = false;
                link_events = None;
                self.finished.cancel();
            }
        }

        tracing::debug!(state = ?self.coordinator.state(), "session task finished");
        self.finished.cancel();
    }

    fn publish(&self) {
        *self.snapshot.write() = self.coordinator.snapshot();
    }
}

async fn next_link_event(events: &mut Option<LinkEventStream>) -> Option<LinkEvent> {
    match events {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{FrameSink, Link};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    /// Connector whose connection attempt never completes.
    struct Stalled;

    #[async_trait]
    impl Connector for Stalled {
        async fn connect(&self, _endpoint: &Endpoint) -> Result<Link> {
            std::future::pending().await
        }
    }

    /// Connector that always refuses.
    struct Refusing;

    #[async_trait]
    impl Connector for Refusing {
        async fn connect(&self, _endpoint: &Endpoint) -> Result<Link> {
            Err(Error::Connect("connection refused".into()))
        }
    }

    /// Connector whose link stays open and records written frames.
    #[derive(Default)]
    struct Silent {
        frames: Arc<Mutex<Vec<String>>>,
    }

    struct SharedSink(Arc<Mutex<Vec<String>>>);

    impl FrameSink for SharedSink {
        fn send(&mut self, frame: &str) -> Result<()> {
            self.0.lock().push(frame.to_string());
            Ok(())
        }

        fn close(&mut self) {}
    }

    #[async_trait]
    impl Connector for Silent {
        async fn connect(&self, _endpoint: &Endpoint) -> Result<Link> {
            Ok(Link {
                sink: Box::new(SharedSink(Arc::clone(&self.frames))),
                events: Box::pin(futures::stream::pending()),
            })
        }
    }

    /// Connector whose link delivers whatever the test pushes into it.
    struct Scripted {
        events: Mutex<Option<mpsc::UnboundedReceiver<LinkEvent>>>,
    }

    impl Scripted {
        fn new() -> (Self, mpsc::UnboundedSender<LinkEvent>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                Self {
                    events: Mutex::new(Some(rx)),
                },
                tx,
            )
        }
    }

    #[async_trait]
    impl Connector for Scripted {
        async fn connect(&self, _endpoint: &Endpoint) -> Result<Link> {
            let rx = self.events.lock().take().ok_or(Error::SessionClosed)?;
            Ok(Link {
                sink: Box::new(SharedSink(Arc::default())),
                events: Box::pin(UnboundedReceiverStream::new(rx)),
            })
        }
    }

    fn endpoint() -> Endpoint {
        Endpoint::from_origin("http://localhost:8080").unwrap()
    }

    #[tokio::test]
    async fn test_refused_connection_finishes_with_error() {
        let (handle, _events) =
            spawn_session(Arc::new(Refusing), endpoint(), Corpus::default(), "hello").unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle.finished())
            .await
            .unwrap();
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.state, SessionState::ClosedError);
        assert_eq!(snapshot.failure.as_deref(), Some(crate::CONNECTION_FAILURE_MESSAGE));
        assert!(!snapshot.waiting);
    }

    #[tokio::test]
    async fn test_close_while_connecting() {
        let (handle, _events) =
            spawn_session(Arc::new(Stalled), endpoint(), Corpus::default(), "hello").unwrap();
        assert_eq!(handle.state(), SessionState::Connecting);

        handle.close();
        tokio::time::timeout(Duration::from_secs(1), handle.finished())
            .await
            .unwrap();
        assert_eq!(handle.state(), SessionState::ClosedClean);
    }

    #[tokio::test]
    async fn test_send_while_connecting_is_not_connected() {
        let (handle, _events) =
            spawn_session(Arc::new(Stalled), endpoint(), Corpus::default(), "hello").unwrap();

        let result = handle.send("second").await;
        assert!(matches!(result, Err(Error::NotConnected)));
        assert_eq!(handle.snapshot().messages.len(), 2);
    }

    #[tokio::test]
    async fn test_send_after_close_still_recorded() {
        let (handle, _events) =
            spawn_session(Arc::new(Refusing), endpoint(), Corpus::default(), "hello").unwrap();
        handle.finished().await;

        let result = handle.send("are you there?").await;
        assert!(matches!(result, Err(Error::NotConnected)));
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.messages.len(), 2);
        assert_eq!(snapshot.state, SessionState::ClosedError);
    }

    #[tokio::test]
    async fn test_send_while_awaiting_reply_rejected() {
        let connector = Arc::new(Silent::default());
        let frames = Arc::clone(&connector.frames);
        let (handle, mut events) =
            spawn_session(connector, endpoint(), Corpus::default(), "hello").unwrap();

        loop {
            let event = events.recv().await.unwrap();
            if event
                == (SessionEvent::StateChanged {
                    state: SessionState::AwaitingReply,
                })
            {
                break;
            }
        }

        let result = handle.send("again").await;
        assert!(matches!(result, Err(Error::AwaitingReply)));
        assert_eq!(frames.lock().as_slice(), &["".to_string(), "hello".to_string()]);
    }

    #[tokio::test]
    async fn test_blank_first_message_rejected() {
        let result = spawn_session(Arc::new(Stalled), endpoint(), Corpus::default(), "  ");
        assert!(matches!(result, Err(Error::EmptyMessage)));
    }

    #[tokio::test]
    async fn test_settle_returns_once_reply_goes_quiet() {
        let (connector, link) = Scripted::new();
        let (handle, _events) =
            spawn_session(Arc::new(connector), endpoint(), Corpus::default(), "hello").unwrap();
        link.send(LinkEvent::Frame("Hel".into())).unwrap();
        link.send(LinkEvent::Frame("lo".into())).unwrap();

        tokio::time::timeout(
            Duration::from_secs(5),
            handle.settle(Duration::from_millis(100)),
        )
        .await
        .unwrap();

        let snapshot = handle.snapshot();
        assert!(!snapshot.waiting);
        assert_eq!(snapshot.state, SessionState::Open);
        assert_eq!(snapshot.messages[1].text, "Hello");
        assert!(!handle.is_finished());
    }

    #[tokio::test]
    async fn test_settle_keeps_waiting_for_a_pending_reply() {
        let (handle, _events) = spawn_session(
            Arc::new(Silent::default()),
            endpoint(),
            Corpus::default(),
            "hello",
        )
        .unwrap();

        let idle = Duration::from_millis(50);
        let settled = tokio::time::timeout(Duration::from_millis(300), handle.settle(idle)).await;
        assert!(settled.is_err());
        assert!(handle.snapshot().waiting);

        handle.close();
        tokio::time::timeout(Duration::from_secs(1), handle.settle(idle))
            .await
            .unwrap();
        assert!(handle.is_finished());
    }

    #[tokio::test]
    async fn test_settle_returns_when_session_fails() {
        let (handle, _events) =
            spawn_session(Arc::new(Refusing), endpoint(), Corpus::default(), "hello").unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle.settle(Duration::from_secs(60)))
            .await
            .unwrap();
        assert_eq!(handle.state(), SessionState::ClosedError);
    }
}
