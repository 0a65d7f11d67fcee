//! Error types for nal-extract

use thiserror::Error;

/// Result type alias using nal-extract Error
pub type Result<T> = std::result::Result<T, ExtractError>;

/// Errors raised while pulling text out of a single file.
///
/// These never escape the pipeline: [`crate::Extractor`] folds them into a sentinel body
/// so one broken file cannot cancel the rest of the batch.
#[derive(Error, Debug)]
pub enum ExtractError {
    /// The PDF could not be loaded or interpreted
    #[error("{0}")]
    Pdf(String),

    /// The blocking parse task panicked or was cancelled
    #[error("extraction task failed: {0}")]
    Join(String),
}

impl ExtractError {
    /// Create a PDF error from anything printable
    pub fn pdf(message: impl Into<String>) -> Self {
        Self::Pdf(message.into())
    }
}

impl From<tokio::task::JoinError> for ExtractError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Join(err.to_string())
    }
}
