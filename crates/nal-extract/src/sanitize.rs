//! Text sanitization applied to every extracted body

use regex::Regex;
use std::sync::LazyLock;

/// Decorative and typographic code points: bullets, geometric shapes, stars, suits,
/// dingbats, the replacement character, line/paragraph separators, zero-width and
/// formatting marks, odd-width spaces, general punctuation and the specials block.
static DECORATIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"[",
        r"\x{2022}\x{2023}\x{25E6}\x{2043}\x{2219}",
        r"\x{25AA}\x{25AB}\x{25A0}\x{25A1}\x{25B2}\x{25BC}\x{25C6}\x{25C7}\x{25CB}\x{25CF}",
        r"\x{25D8}\x{25D9}\x{25E2}\x{25E3}\x{25E4}\x{25E5}",
        r"\x{2605}\x{2606}",
        r"\x{2660}\x{2661}\x{2662}\x{2663}\x{2665}\x{2666}\x{2667}\x{2668}\x{2670}\x{2671}",
        r"\x{2709}\x{2764}\x{2794}\x{2B50}\x{2B55}",
        r"\x{FFFD}\x{2028}\x{2029}\x{200B}\x{200C}\x{200D}\x{FEFF}",
        r"\x{00A0}\x{202F}\x{205F}\x{3000}",
        r"\x{2000}-\x{206F}",
        r"\x{FFF0}-\x{FFFF}",
        r"]",
    ))
    .expect("decorative character class is valid")
});

/// ASCII control characters other than `\t` and `\n`.
static CONTROL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\x00-\x08\x0B\x0C\x0E-\x1F\x7F]").expect("valid regex"));

/// Anything that is not printable ASCII, newline or tab.
static NON_PRINTABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\x20-\x7E\n\t]").expect("valid regex"));

static SPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r" {2,}").expect("valid regex"));

static NEWLINE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

static SPACED_NEWLINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" *\n *").expect("valid regex"));

/// Normalize extracted text to printable ASCII with tidy whitespace.
///
/// Steps, in order: strip decorative symbols, strip control characters (keeping `\n` and
/// `\t`), drop everything outside printable ASCII, collapse space runs, collapse 3+
/// newlines to a blank line, remove spaces around newlines, trim.
///
/// Removing spaces around newlines can join newline runs that spaces used to separate
/// (`"\n \n \n"`), so the newline collapse runs once more before trimming. That keeps
/// `sanitize(sanitize(x)) == sanitize(x)`.
///
/// Non-ASCII letters are dropped along with the symbols. This is a known limitation for
/// documents written in other scripts.
pub fn sanitize(text: &str) -> String {
    let cleaned = DECORATIVE.replace_all(text, "");
    let cleaned = CONTROL.replace_all(&cleaned, "");
    let cleaned = NON_PRINTABLE.replace_all(&cleaned, "");
    let cleaned = SPACE_RUN.replace_all(&cleaned, " ");
    let cleaned = NEWLINE_RUN.replace_all(&cleaned, "\n\n");
    let cleaned = SPACED_NEWLINE.replace_all(&cleaned, "\n");
    let cleaned = NEWLINE_RUN.replace_all(&cleaned, "\n\n");
    cleaned.trim().to_string()
}
