//! Turn paths on disk into source files for extraction.

use anyhow::Context;
use nal_extract::SourceFile;
use std::path::{Path, PathBuf};

/// Media type declared for unknown extensions; the extractor skips it.
pub const UNKNOWN_MEDIA_TYPE: &str = "application/octet-stream";

/// Declared media type for a file, from its extension
pub fn media_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        Some("md") => "text/markdown",
        Some("csv") => "text/csv",
        Some("html" | "htm") => "text/html",
        Some("xml") => "text/xml",
        _ => UNKNOWN_MEDIA_TYPE,
    }
}

/// Read one file into a [`SourceFile`] named after its file name.
pub fn load(path: &Path) -> anyhow::Result<SourceFile> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(SourceFile::new(name, media_type_for(path), bytes))
}

/// Read files in the order given.
pub fn load_all(paths: &[PathBuf]) -> anyhow::Result<Vec<SourceFile>> {
    paths.iter().map(|p| load(p)).collect()
}
