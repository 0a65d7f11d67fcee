//! Wire contract with the analysis backend
//!
//! Frames are plain text. The client sends the corpus, then the first user message, then
//! further user messages one frame each. The server answers with reply tokens, plus a few
//! fixed acknowledgement and diagnostic frames that are not chat content.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Path of the streaming endpoint on the page origin.
pub const ENDPOINT_PATH: &str = "/api/v1/doc-analysis";

/// Prefix of the frame confirming the corpus was received.
pub const CONTRACT_RECEIVED_PREFIX: &str = "Contract received:";

/// Prefix of the frame the server sends before rejecting a request.
pub const INVALID_REQUEST_PREFIX: &str = "Invalid request:";

/// Exact frame the server sends when it cannot reach its model backend.
pub const UPSTREAM_FAILURE: &str = "Error contacting LLM API.";

/// Advisory shown when the connection fails or drops.
pub const CONNECTION_FAILURE_MESSAGE: &str =
    "Unable to connect to the server. Please try again later.";

/// A protocol-level frame from the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Signal {
    /// Receipt confirmation; `detail` is whatever followed the prefix
    ContractReceived { detail: String },
    /// The server rejected the request
    InvalidRequest { reason: String },
    /// The server could not reach its model backend
    UpstreamFailure,
}

/// Classification of one inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound<'a> {
    /// Nothing but whitespace
    Blank,
    /// Acknowledgement or diagnostic, never shown as chat content
    Signal(Signal),
    /// A fragment of the assistant reply, trimmed
    Token(&'a str),
}

/// Classify a raw inbound frame.
pub fn classify(raw: &str) -> Inbound<'_> {
    let frame = raw.trim();
    if frame.is_empty() {
        return Inbound::Blank;
    }
    if let Some(detail) = frame.strip_prefix(CONTRACT_RECEIVED_PREFIX) {
        return Inbound::Signal(Signal::ContractReceived {
            detail: detail.trim().to_string(),
        });
    }
    if let Some(reason) = frame.strip_prefix(INVALID_REQUEST_PREFIX) {
        return Inbound::Signal(Signal::InvalidRequest {
            reason: reason.trim().to_string(),
        });
    }
    if frame == UPSTREAM_FAILURE {
        return Inbound::Signal(Signal::UpstreamFailure);
    }
    Inbound::Token(frame)
}

/// The streaming endpoint for a given page origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: String,
}

impl Endpoint {
    /// Derive the endpoint from a page origin such as `https://example.com`.
    ///
    /// `http` maps to `ws` and `https` to `wss`; `ws`/`wss` origins are taken as they
    /// are. Any path, query or fragment on the origin is ignored.
    pub fn from_origin(origin: &str) -> Result<Self> {
        let origin = origin.trim();
        let (scheme, rest) = origin
            .split_once("://")
            .ok_or_else(|| Error::InvalidOrigin(origin.to_string()))?;

        let scheme = match scheme.to_ascii_lowercase().as_str() {
            "https" | "wss" => "wss",
            "http" | "ws" => "ws",
            _ => return Err(Error::InvalidOrigin(origin.to_string())),
        };

        let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
        if host.is_empty() {
            return Err(Error::InvalidOrigin(origin.to_string()));
        }

        Ok(Self {
            url: format!("{}://{}{}", scheme, host, ENDPOINT_PATH),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.url
    }

    /// Whether the endpoint uses a secure transport
    pub fn is_secure(&self) -> bool {
        self.url.starts_with("wss://")
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}
