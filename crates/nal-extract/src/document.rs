//! Input files, extracted documents and the assembled corpus

use serde::{Deserialize, Serialize};
use std::fmt;

/// A file handed over by the presentation layer.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Display name, used verbatim in the corpus header
    pub name: String,
    /// Declared media type, e.g. `application/pdf` or `text/plain; charset=utf-8`
    pub media_type: String,
    /// Raw file content
    pub bytes: Vec<u8>,
}

impl SourceFile {
    pub fn new(
        name: impl Into<String>,
        media_type: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            bytes: bytes.into(),
        }
    }

    /// The kind this file will be extracted as, or `None` if it is skipped.
    pub fn kind(&self) -> Option<DocumentKind> {
        DocumentKind::from_media_type(&self.media_type)
    }
}

/// Recognized document kinds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "subtype", rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    /// Any `text/*` type; holds the subtype as declared (`plain`, `markdown`, ...)
    Text(String),
}

impl DocumentKind {
    /// Classify a declared media type. Parameters after `;` are ignored.
    pub fn from_media_type(media_type: &str) -> Option<Self> {
        let essence = media_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        if essence == "application/pdf" {
            return Some(DocumentKind::Pdf);
        }
        essence
            .strip_prefix("text/")
            .map(|subtype| DocumentKind::Text(subtype.to_string()))
    }

    /// Header label: `PDF`, or the text subtype in upper case.
    pub fn label(&self) -> String {
        match self {
            DocumentKind::Pdf => "PDF".to_string(),
            DocumentKind::Text(subtype) => subtype.to_uppercase(),
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// The sanitized text of one recognized file. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedDocument {
    pub filename: String,
    pub kind: DocumentKind,
    pub body: String,
}

impl ExtractedDocument {
    /// The block this document contributes to the corpus.
    pub fn block(&self) -> String {
        format!("--- {} ({}) ---\n{}\n", self.filename, self.kind, self.body)
    }
}

/// Ordered documents plus their concatenated text, as sent to the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Corpus {
    pub documents: Vec<ExtractedDocument>,
    pub text: String,
}

impl Corpus {
    /// Concatenate documents in order and trim the result.
    pub fn assemble(documents: Vec<ExtractedDocument>) -> Self {
        let joined: String = documents.iter().map(ExtractedDocument::block).collect();
        Self {
            text: joined.trim().to_string(),
            documents,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}
