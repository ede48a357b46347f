//! # Presentation Text Normalizer
//!
//! Turns the HTML fragment a presentation server renders for its "now
//! displaying" slide into an ordered list of clean display lines.
//!
//! ## Pipeline:
//! 1.  **Force-update markers**: hidden `<span id="text-force-update_N">` elements
//!     are dropped together with their content.
//! 2.  **Tags**: every remaining `<...>` tag is removed, inner text is kept.
//! 3.  **Entities**: a fixed set of character references is decoded in one pass.
//! 4.  **Artifacts**: `(SYN - CODE)` annotations are removed.
//! 5.  **Segmentation**: scripture is split into sentences on `". "`, everything
//!     else on line breaks. Empty segments are dropped, the rest trimmed.

use regex::{Captures, Regex};
use static_init::dynamic;

/// Matches a whole force-update span, attributes in any order, any quoting.
#[dynamic]
static FORCE_UPDATE_SPAN: Regex = Regex::new(
    r#"(?is)<span\b[^>]*?\bid\s*=\s*["']?text-force-update_\d+["']?[^>]*>.*?</span\s*>"#,
)
.expect("force-update span pattern is valid");

/// Any angle-bracket delimited tag.
#[dynamic]
static HTML_TAG: Regex = Regex::new(r"<[^>]+>").expect("tag pattern is valid");

/// Named, decimal and hexadecimal character references.
#[dynamic]
static CHAR_REFERENCE: Regex =
    Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z]+);").expect("entity pattern is valid");

/// Annotation artifacts such as `(SYN - AZJ08)`.
#[dynamic]
static SYN_ARTIFACT: Regex = Regex::new(r"\(SYN - [A-Za-z0-9]+\)").expect("artifact pattern is valid");

/// The type tag a presentation server uses for scripture slides.
pub const SCRIPTURE_TAG: &str = "BIBLE";

/// How a slide's text is split into display lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentKind {
    /// Songs, announcements and anything else: one line per line break.
    #[default]
    Generic,
    /// A single flowing passage: one line per sentence.
    Scripture,
}

impl ContentKind {
    /// Classifies a source type tag, ignoring case.
    pub fn from_tag(tag: &str) -> Self {
        if tag.trim().eq_ignore_ascii_case(SCRIPTURE_TAG) {
            ContentKind::Scripture
        } else {
            ContentKind::Generic
        }
    }
}

/// Normalizes raw slide text into display lines.
///
/// `content_type` is the source's type tag (`"BIBLE"`, `"MUSIC"`, ...); only
/// scripture is treated specially. Never fails: text with nothing visible in
/// it yields an empty vector.
pub fn normalize(raw_text: &str, content_type: &str) -> Vec<String> {
    let text = clean_markup(raw_text);
    match ContentKind::from_tag(content_type) {
        ContentKind::Scripture => split_scripture(&text),
        ContentKind::Generic => split_generic(&text),
    }
}

/// Steps 1-5: markup-free, entity-decoded, trimmed text.
pub fn clean_markup(raw_text: &str) -> String {
    let text = FORCE_UPDATE_SPAN.replace_all(raw_text, "");
    let text = HTML_TAG.replace_all(&text, "");
    let text = decode_entities(&text);
    let text = SYN_ARTIFACT.replace_all(&text, "");
    text.trim().to_string()
}

/// Decodes the supported character references; anything else is left verbatim.
pub fn decode_entities(text: &str) -> String {
    let decoded = CHAR_REFERENCE.replace_all(text, |caps: &Captures<'_>| {
        match lookup_reference(&caps[1]) {
            Some(ch) => ch.to_string(),
            None => caps[0].to_string(),
        }
    });
    decoded.replace('\u{a0}', " ")
}

fn lookup_reference(name: &str) -> Option<char> {
    let code = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
        u32::from_str_radix(hex, 16).ok()
    } else if let Some(dec) = name.strip_prefix('#') {
        dec.parse::<u32>().ok()
    } else {
        None
    };

    match code {
        Some(160) => Some(' '),
        Some(c @ (38 | 60 | 62 | 34 | 39)) => char::from_u32(c),
        Some(_) => None,
        None => match name {
            "nbsp" => Some(' '),
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => None,
        },
    }
}

/// A passage becomes one line per sentence.
///
/// The closing `)` of a trailing verse reference goes first, then the final
/// sentence's period so that it matches the ones consumed by the split.
fn split_scripture(text: &str) -> Vec<String> {
    let passage = text.trim_end();
    let passage = passage.strip_suffix(')').unwrap_or(passage).trim_end();
    let passage = passage.strip_suffix('.').unwrap_or(passage);
    collect_lines(passage.split(". "))
}

fn split_generic(text: &str) -> Vec<String> {
    collect_lines(text.split(['\n', '\r']))
}

fn collect_lines<'a>(segments: impl Iterator<Item = &'a str>) -> Vec<String> {
    segments
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}
