//! nal-extract: turns uploaded files into one sanitized text corpus
//!
//! Files are processed in selection order. PDFs are parsed page by page, text files are
//! taken as-is, anything else is skipped. Every body goes through [`sanitize`] before it
//! is concatenated under a `--- <filename> (<KIND>) ---` header.

pub mod document;
pub mod error;
pub mod pdf;
pub mod pipeline;
pub mod sanitize;

pub use document::{Corpus, DocumentKind, ExtractedDocument, SourceFile};
pub use error::{ExtractError, Result};
pub use pdf::{HayroPdfText, NO_TEXT_SENTINEL, PdfText};
pub use pipeline::Extractor;
pub use sanitize::sanitize;
