//! Printing session events to the terminal

use nal_session::{ChatMessage, SessionEvent, SessionState, Signal};
use std::io::{self, Write};
use tokio::sync::broadcast;

/// How events are printed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Reply text on stdout, status lines on stderr
    Text,
    /// One JSON object per event on stdout
    Json,
}

/// Prints session events, streaming assistant replies token by token.
pub struct Renderer<O, E> {
    mode: OutputMode,
    out: O,
    err: E,
    in_reply: bool,
}

impl Renderer<io::Stdout, io::Stderr> {
    pub fn stdio(mode: OutputMode) -> Self {
        Self::new(mode, io::stdout(), io::stderr())
    }
}

impl<O: Write, E: Write> Renderer<O, E> {
    pub fn new(mode: OutputMode, out: O, err: E) -> Self {
        Self {
            mode,
            out,
            err,
            in_reply: false,
        }
    }

    /// Print one event
    pub fn render(&mut self, event: &SessionEvent) -> io::Result<()> {
        match self.mode {
            OutputMode::Json => {
                let line = serde_json::to_string(event).map_err(io::Error::other)?;
                writeln!(self.out, "{}", line)?;
            }
            OutputMode::Text => self.render_text(event)?,
        }
        self.out.flush()
    }

    fn render_text(&mut self, event: &SessionEvent) -> io::Result<()> {
        match event {
            SessionEvent::MessageAppended { message, .. } => self.start_message(message)?,
            SessionEvent::TokenMerged { token, .. } => write!(self.out, "{}", token)?,
            SessionEvent::Notice {
                signal: Signal::ContractReceived { .. },
            } => {
                writeln!(self.err, "[documents received]")?;
            }
            // Diagnostics are only visible with --verbose, through the session logs.
            SessionEvent::Notice { .. } => {}
            SessionEvent::Failure { message } => {
                self.end_reply()?;
                writeln!(self.err, "{}", message)?;
            }
            SessionEvent::StateChanged {
                state: SessionState::ClosedClean,
            } => {
                self.end_reply()?;
                writeln!(self.err, "[session closed]")?;
            }
            SessionEvent::StateChanged {
                state: SessionState::Connecting,
            } => {
                writeln!(self.err, "[connecting]")?;
            }
            SessionEvent::StateChanged { .. } | SessionEvent::WaitingChanged { .. } => {}
        }
        Ok(())
    }

    fn start_message(&mut self, message: &ChatMessage) -> io::Result<()> {
        self.end_reply()?;
        if message.is_assistant() {
            write!(self.out, "{}", message.text)?;
            self.in_reply = true;
        }
        Ok(())
    }

    fn end_reply(&mut self) -> io::Result<()> {
        if self.in_reply {
            writeln!(self.out)?;
            self.in_reply = false;
        }
        Ok(())
    }

    /// Print events until the session's event channel closes.
    pub async fn run(mut self, mut events: broadcast::Receiver<SessionEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Err(e) = self.render(&event) {
                        tracing::debug!(error = %e, "failed to print event");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "output fell behind, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        let _ = self.end_reply();
        let _ = self.out.flush();
    }
}
