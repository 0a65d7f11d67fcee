//! Connection capabilities
//!
//! The coordinator never touches a socket directly. A [`Connector`] opens a [`Link`],
//! which pairs a [`FrameSink`] for outbound frames with a stream of [`LinkEvent`]s for
//! everything that comes back. [`WsConnector`] is the WebSocket implementation.

use std::pin::Pin;

use async_stream::stream;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_tungstenite::tungstenite::Message;

use crate::error::{Error, Result};
use crate::protocol::Endpoint;

/// Something that happened on an open connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A text frame arrived
    Frame(String),
    /// The connection ended; `clean` is true when the close handshake completed
    Closed { clean: bool },
    /// The connection broke
    Failed(String),
}

/// A stream of link events
pub type LinkEventStream = Pin<Box<dyn Stream<Item = LinkEvent> + Send>>;

/// Outbound half of a connection.
///
/// `send` queues a frame without waiting for it to be written, like a browser socket.
pub trait FrameSink: Send {
    /// Queue one text frame
    fn send(&mut self, frame: &str) -> Result<()>;

    /// Start a clean close
    fn close(&mut self);
}

/// An open connection
pub struct Link {
    pub sink: Box<dyn FrameSink>,
    pub events: LinkEventStream,
}

/// Opens connections to the streaming endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Link>;
}

/// [`Connector`] over `tokio-tungstenite`
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

enum Outgoing {
    Text(String),
    Close,
}

struct WsSink {
    tx: mpsc::UnboundedSender<Outgoing>,
    closed: bool,
}

impl FrameSink for WsSink {
    fn send(&mut self, frame: &str) -> Result<()> {
        if self.closed {
            return Err(Error::NotConnected);
        }
        self.tx
            .send(Outgoing::Text(frame.to_string()))
            .map_err(|_| Error::NotConnected)
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.tx.send(Outgoing::Close);
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Link> {
        let (socket, response) = tokio_tungstenite::connect_async(endpoint.as_str()).await?;
        tracing::debug!(
            endpoint = %endpoint,
            secure = endpoint.is_secure(),
            status = %response.status(),
            "websocket connected"
        );

        let (mut write, mut read) = socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Outgoing>();

        // Writer task: ends after a close frame, a write error, or when the sink is dropped.
        tokio::spawn(async move {
            while let Some(outgoing) = rx.recv().await {
                let (message, last) = match outgoing {
                    Outgoing::Text(text) => (Message::text(text), false),
                    Outgoing::Close => (Message::Close(None), true),
                };
                if let Err(e) = write.send(message).await {
                    tracing::debug!(error = %e, "websocket write failed");
                    break;
                }
                if last {
                    break;
                }
            }
        });

        let events: LinkEventStream = Box::pin(stream! {
            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(text)) => yield LinkEvent::Frame(text.as_str().to_string()),
                    Ok(Message::Close(frame)) => {
                        tracing::debug!(?frame, "websocket closed by handshake");
                        yield LinkEvent::Closed { clean: true };
                        return;
                    }
                    Ok(Message::Binary(bytes)) => {
                        tracing::warn!(len = bytes.len(), "ignoring binary frame");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        yield LinkEvent::Failed(e.to_string());
                        return;
                    }
                }
            }
            // Stream ended without a close frame.
            yield LinkEvent::Closed { clean: false };
        });

        Ok(Link {
            sink: Box::new(WsSink { tx, closed: false }),
            events,
        })
    }
}
