//! nal - ask questions about your legal documents

mod commands;
mod config;
mod files;
mod render;

use anyhow::bail;
use clap::Parser;
use nal_extract::{Corpus, Extractor, SourceFile};
use nal_session::{
    Connector, Endpoint, Error as SessionError, SessionHandle, WsConnector, spawn_session,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;

use crate::commands::{CommandResult, SuggestedPrompts};
use crate::render::{OutputMode, Renderer};

/// Shown when there is nothing to analyze.
const NO_DOCUMENTS: &str =
    "Please upload at least one document before sending your first message.";

/// How long to wait for a closing session before giving up on it.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// At end of input, a reply counts as complete after this long without a new token.
const REPLY_IDLE: Duration = Duration::from_secs(3);

/// nal - chat with an analysis server about your documents
#[derive(Parser, Debug)]
#[command(name = "nal")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Documents to analyze (PDF or text files)
    files: Vec<PathBuf>,

    /// Origin of the analysis server (default: http://localhost:8080)
    #[arg(long)]
    origin: Option<String>,

    /// First message to send; otherwise the first line you type is sent
    #[arg(short, long)]
    message: Option<String>,

    /// Print the extracted text before connecting
    #[arg(long)]
    show_corpus: bool,

    /// Print session events as JSON lines
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Setup tracing
    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("nal=debug,nal_extract=debug,nal_session=debug")
            .with_writer(std::io::stderr)
            .init();
    }

    // Initialize config and exit
    if args.init_config {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let cfg = config::Config::load();

    // Merge config with CLI args (CLI takes precedence)
    let origin = args
        .origin
        .clone()
        .unwrap_or_else(|| cfg.origin_or_default().to_string());
    let show_corpus = args.show_corpus || cfg.show_corpus.unwrap_or(false);
    let mode = if args.json || cfg.json.unwrap_or(false) {
        OutputMode::Json
    } else {
        OutputMode::Text
    };

    let endpoint = Endpoint::from_origin(&origin)?;

    if args.files.is_empty() {
        bail!(NO_DOCUMENTS);
    }

    let sources = files::load_all(&args.files)?;
    let corpus = Extractor::new().extract(&sources).await;
    if mode == OutputMode::Text {
        print_summary(&sources, &corpus);
    }
    if show_corpus {
        println!("{}", corpus.as_str());
    }

    let app = App {
        connector: Arc::new(WsConnector::new()),
        endpoint,
        corpus,
        mode,
        prompts: SuggestedPrompts::new(),
        session: None,
    };
    app.run(args.message).await
}

fn print_summary(sources: &[SourceFile], corpus: &Corpus) {
    for source in sources.iter().filter(|s| s.kind().is_none()) {
        eprintln!(
            "Skipping {}: unsupported file type ({})",
            source.name, source.media_type
        );
    }
    eprintln!(
        "Loaded {} document(s), {} characters:",
        corpus.documents.len(),
        corpus.as_str().chars().count()
    );
    for document in &corpus.documents {
        eprintln!("  {} ({})", document.filename, document.kind);
    }
    eprintln!("Type /help for commands, /prompts for ideas.");
}

/// A running session and the task printing its events
struct ActiveSession {
    handle: SessionHandle,
    printer: JoinHandle<()>,
}

struct App {
    connector: Arc<dyn Connector>,
    endpoint: Endpoint,
    corpus: Corpus,
    mode: OutputMode,
    prompts: SuggestedPrompts,
    session: Option<ActiveSession>,
}

impl App {
    async fn run(mut self, first_message: Option<String>) -> anyhow::Result<()> {
        if let Some(message) = first_message {
            self.submit(&message).await?;
        }

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = tokio::signal::ctrl_c() => {
                    tracing::debug!("interrupted");
                    self.close_session(CLOSE_GRACE).await;
                    return Ok(());
                }
            };

            // EOF: let the current reply finish, then leave.
            let Some(line) = line else {
                self.drain().await;
                return Ok(());
            };

            let input = line.trim();
            if input.is_empty() {
                continue;
            }

            let reply_pending = self.reply_pending();
            match commands::execute_command(input, &mut self.prompts, reply_pending) {
                Some(CommandResult::Message(msg)) => println!("{}", msg),
                Some(CommandResult::ShowCorpus) => println!("{}", self.corpus.as_str()),
                Some(CommandResult::Send(text)) => self.submit(&text).await?,
                Some(CommandResult::NewSession) => {
                    self.close_session(CLOSE_GRACE).await;
                    eprintln!("Session closed. Your next message starts a new one.");
                }
                Some(CommandResult::Exit) => {
                    self.close_session(CLOSE_GRACE).await;
                    return Ok(());
                }
                Some(CommandResult::Unknown(cmd)) => {
                    println!("Unknown command: /{}", cmd);
                    println!("Type /help for available commands.");
                }
                None => self.submit(input).await?,
            }
        }
    }

    /// Send `text` on the current session, or start one with it.
    async fn submit(&mut self, text: &str) -> anyhow::Result<()> {
        if let Some(session) = &self.session {
            if let Err(e) = session.handle.send(text).await {
                match send_error_notice(&e) {
                    Some(notice) => eprintln!("{}", notice),
                    None => return Err(e.into()),
                }
            }
            return Ok(());
        }

        let (handle, events) = spawn_session(
            Arc::clone(&self.connector),
            self.endpoint.clone(),
            self.corpus.clone(),
            text,
        )?;
        tracing::debug!(session = %handle.id(), "session started");
        let printer = tokio::spawn(Renderer::stdio(self.mode).run(events));
        self.session = Some(ActiveSession { handle, printer });
        Ok(())
    }

    fn reply_pending(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.handle.snapshot().waiting)
    }

    /// Let the current reply finish, then close the session.
    async fn drain(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        tokio::select! {
            _ = session.handle.settle(REPLY_IDLE) => {}
            _ = tokio::signal::ctrl_c() => tracing::debug!("interrupted"),
        }
        session.handle.close();
        Self::wait_closed(session, CLOSE_GRACE).await;
    }

    async fn close_session(&mut self, grace: Duration) {
        if let Some(session) = self.session.take() {
            session.handle.close();
            Self::wait_closed(session, grace).await;
        }
    }

    async fn wait_closed(session: ActiveSession, grace: Duration) {
        let ActiveSession { handle, mut printer } = session;
        if tokio::time::timeout(grace, handle.finished()).await.is_err() {
            tracing::debug!(session = %handle.id(), "session did not close in time");
        }
        // The printer ends once the session task and every handle are gone.
        drop(handle);
        if tokio::time::timeout(grace, &mut printer).await.is_err() {
            printer.abort();
        }
    }
}

/// What to tell the user when a follow-up message is refused, or `None` if the error
/// should end the program.
fn send_error_notice(error: &SessionError) -> Option<&'static str> {
    if error.is_retryable() {
        Some("Still waiting for a reply to your previous message.")
    } else if error.is_connection_failure() || matches!(error, SessionError::NotConnected) {
        Some("Not connected. Use /new to start a new session.")
    } else {
        None
    }
}
