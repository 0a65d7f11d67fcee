//! The extraction pipeline: ordered files in, one corpus out

use std::sync::Arc;

use crate::document::{Corpus, DocumentKind, ExtractedDocument, SourceFile};
use crate::error::ExtractError;
use crate::pdf::{self, HayroPdfText, NO_TEXT_SENTINEL, PdfText};
use crate::sanitize::sanitize;

/// Extracts and sanitizes files into a [`Corpus`].
///
/// Files are handled one after another in the order given, so the corpus layout only
/// depends on the input. A file that fails to parse contributes a sentinel body instead of
/// aborting the batch.
#[derive(Clone)]
pub struct Extractor {
    pdf: Arc<dyn PdfText>,
}

impl Extractor {
    /// Create an extractor using the built-in PDF parser
    pub fn new() -> Self {
        Self {
            pdf: Arc::new(HayroPdfText::new()),
        }
    }

    /// Create an extractor with a custom PDF text source
    pub fn with_pdf_text(pdf: Arc<dyn PdfText>) -> Self {
        Self { pdf }
    }

    /// Extract every recognized file and assemble the corpus.
    pub async fn extract(&self, files: &[SourceFile]) -> Corpus {
        let mut documents = Vec::with_capacity(files.len());
        for file in files {
            if let Some(document) = self.extract_file(file).await {
                documents.push(document);
            }
        }

        let corpus = Corpus::assemble(documents);
        tracing::debug!(
            files = files.len(),
            documents = corpus.documents.len(),
            chars = corpus.text.len(),
            "corpus assembled"
        );
        corpus
    }

    /// Extract a single file. Returns `None` for unsupported media types.
    pub async fn extract_file(&self, file: &SourceFile) -> Option<ExtractedDocument> {
        let Some(kind) = file.kind() else {
            tracing::debug!(
                file = %file.name,
                media_type = %file.media_type,
                "skipping unsupported file"
            );
            return None;
        };

        let raw = match kind {
            DocumentKind::Pdf => self.pdf_body(file).await,
            DocumentKind::Text(_) => String::from_utf8_lossy(&file.bytes).into_owned(),
        };

        let body = sanitize(&raw);
        tracing::debug!(file = %file.name, kind = %kind, chars = body.len(), "extracted document");

        Some(ExtractedDocument {
            filename: file.name.clone(),
            kind,
            body,
        })
    }

    async fn pdf_body(&self, file: &SourceFile) -> String {
        let parser = Arc::clone(&self.pdf);
        let bytes = file.bytes.clone();

        let result = tokio::task::spawn_blocking(move || parser.pages(&bytes))
            .await
            .map_err(ExtractError::from)
            .and_then(|pages| pages);

        match result {
            Ok(pages) => {
                let text = pdf::join_pages(&pages);
                if text == NO_TEXT_SENTINEL {
                    tracing::warn!(
                        file = %file.name,
                        pages = pages.len(),
                        "no extractable text in PDF"
                    );
                }
                text
            }
            Err(e) => {
                tracing::warn!(file = %file.name, error = %e, "PDF extraction failed");
                pdf::error_sentinel(&e)
            }
        }
    }
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new()
    }
}
