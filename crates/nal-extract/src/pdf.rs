//! PDF text extraction
//!
//! [`HayroPdfText`] runs each page through `hayro-interpret` with a device that only
//! records glyphs. Glyphs are grouped into tokens using their page-space bounding boxes:
//! a token ends at an explicit whitespace glyph, at a line change, or at a horizontal gap
//! wider than a fraction of the glyph height. Tokens on a page are joined with single
//! spaces.

use std::sync::Arc;

use hayro_interpret::font::Glyph;
use hayro_interpret::hayro_syntax::Pdf;
use hayro_interpret::util::PageExt;
use hayro_interpret::{
    BlendMode, ClipPath, Context, Device, GlyphDrawMode, Image, InterpreterSettings, Paint,
    PathDrawMode, SoftMask, interpret_page,
};
use kurbo::{Affine, Rect, Shape};

use crate::error::{ExtractError, Result};

/// Body used when a PDF parses but yields no text on any page.
pub const NO_TEXT_SENTINEL: &str = "[No extractable text found in this PDF.]";

/// Body used when a PDF cannot be parsed.
pub fn error_sentinel(error: &ExtractError) -> String {
    format!("[Error extracting PDF text: {}]", error)
}

/// Page-by-page text source for PDF bytes.
///
/// Implementations are called from a blocking thread and must not assume an async
/// context.
pub trait PdfText: Send + Sync {
    /// Extract the text of every page, in page order.
    fn pages(&self, bytes: &[u8]) -> Result<Vec<String>>;
}

/// Join page texts with a blank line after each page.
///
/// Returns [`NO_TEXT_SENTINEL`] when nothing but whitespace was extracted.
pub fn join_pages(pages: &[String]) -> String {
    let mut text = String::new();
    for page in pages {
        text.push_str(page);
        text.push_str("\n\n");
    }
    if text.trim().is_empty() {
        return NO_TEXT_SENTINEL.to_string();
    }
    text
}

/// [`PdfText`] backed by `hayro-interpret`.
#[derive(Debug, Clone)]
pub struct HayroPdfText {
    tokens: TokenOptions,
}

impl HayroPdfText {
    pub fn new() -> Self {
        Self {
            tokens: TokenOptions::default(),
        }
    }
}

impl Default for HayroPdfText {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfText for HayroPdfText {
    fn pages(&self, bytes: &[u8]) -> Result<Vec<String>> {
        let pdf = Pdf::new(Arc::new(bytes.to_vec()))
            .map_err(|e| ExtractError::pdf(format!("failed to load PDF: {e:?}")))?;

        let settings = InterpreterSettings::default();
        let mut pages = Vec::new();

        for (index, page) in pdf.pages().iter().enumerate() {
            let (w, h) = page.render_dimensions();
            let bbox = Rect::new(0.0, 0.0, w as f64, h as f64);

            let mut ctx = Context::new(
                page.initial_transform(true),
                bbox,
                page.xref(),
                settings.clone(),
            );
            let mut device = GlyphCollector::default();
            interpret_page(page, &mut ctx, &mut device);

            let tokens = device.tokens(&self.tokens);
            tracing::trace!(page = index + 1, tokens = tokens.len(), "extracted page");
            pages.push(tokens.join(" "));
        }

        Ok(pages)
    }
}

/// Thresholds for splitting glyph runs into tokens.
#[derive(Debug, Clone)]
struct TokenOptions {
    /// Minimum vertical overlap ratio (relative to the smaller bbox height) for two glyphs
    /// to count as the same line.
    same_line_overlap_ratio: f64,
    /// A horizontal gap wider than this ratio times the average bbox height starts a new
    /// token.
    gap_to_height_ratio: f64,
}

impl Default for TokenOptions {
    fn default() -> Self {
        Self {
            same_line_overlap_ratio: 0.5,
            gap_to_height_ratio: 0.25,
        }
    }
}

/// One glyph as drawn by the interpreter.
#[derive(Debug, Clone)]
struct CapturedGlyph {
    ch: Option<char>,
    bbox: Option<Rect>,
}

/// A `hayro-interpret` [`Device`] that records glyphs and ignores everything else.
#[derive(Debug, Default)]
struct GlyphCollector {
    glyphs: Vec<CapturedGlyph>,
}

impl GlyphCollector {
    fn tokens(&self, opts: &TokenOptions) -> Vec<String> {
        let mut tokens = Vec::new();
        let mut current = String::new();
        let mut last_bbox: Option<Rect> = None;

        for glyph in &self.glyphs {
            if let (Some(prev), Some(cur)) = (last_bbox, glyph.bbox) {
                if starts_new_token(prev, cur, opts) {
                    flush(&mut current, &mut tokens);
                }
            }

            match glyph.ch {
                Some(ch) if ch.is_whitespace() => flush(&mut current, &mut tokens),
                Some(ch) => current.push(ch),
                None => {}
            }

            if glyph.bbox.is_some() {
                last_bbox = glyph.bbox;
            }
        }

        flush(&mut current, &mut tokens);
        tokens
    }
}

fn flush(current: &mut String, tokens: &mut Vec<String>) {
    if !current.is_empty() {
        tokens.push(std::mem::take(current));
    }
}

fn starts_new_token(prev: Rect, cur: Rect, opts: &TokenOptions) -> bool {
    if !is_same_line(prev, cur, opts.same_line_overlap_ratio) {
        return true;
    }
    let gap = cur.x0 - prev.x1;
    // Kerning produces zero or negative gaps.
    if gap <= 0.0 {
        return false;
    }
    let avg_h = 0.5 * (prev.height() + cur.height());
    gap > opts.gap_to_height_ratio * avg_h
}

fn is_same_line(a: Rect, b: Rect, min_overlap_ratio: f64) -> bool {
    let overlap = a.y1.min(b.y1) - a.y0.max(b.y0);
    if overlap <= 0.0 {
        return false;
    }
    let denom = a.height().min(b.height());
    if denom <= 0.0 {
        return false;
    }
    (overlap / denom) >= min_overlap_ratio
}

impl<'a> Device<'a> for GlyphCollector {
    fn set_soft_mask(&mut self, _mask: Option<SoftMask<'a>>) {}

    fn set_blend_mode(&mut self, _blend_mode: BlendMode) {}

    fn draw_path(
        &mut self,
        _path: &kurbo::BezPath,
        _transform: Affine,
        _paint: &Paint<'a>,
        _draw_mode: &PathDrawMode,
    ) {
    }

    fn push_clip_path(&mut self, _clip_path: &ClipPath) {}

    fn push_transparency_group(
        &mut self,
        _opacity: f32,
        _mask: Option<SoftMask<'a>>,
        _blend_mode: BlendMode,
    ) {
    }

    fn draw_glyph(
        &mut self,
        glyph: &Glyph<'a>,
        transform: Affine,
        glyph_transform: Affine,
        _paint: &Paint<'a>,
        _draw_mode: &GlyphDrawMode,
    ) {
        // Type3 glyphs have no outline to measure without running their content stream.
        let bbox = match glyph {
            Glyph::Outline(outline) => {
                let path = transform * (glyph_transform * outline.outline());
                Some(path.bounding_box())
            }
            Glyph::Type3(_) => None,
        };

        self.glyphs.push(CapturedGlyph {
            ch: glyph.as_unicode(),
            bbox,
        });
    }

    fn draw_image(&mut self, _image: Image<'a, '_>, _transform: Affine) {}

    fn pop_clip_path(&mut self) {}

    fn pop_transparency_group(&mut self) {}
}
