//! Structured (legal) segmentation.
//!
//! Outline markers are ranked outermost to innermost:
//!
//! | marker | depth |
//! |--------|-------|
//! | `I.`   | 1     |
//! | `A.`   | 2     |
//! | `1.`   | 3     |
//! | `(a)`  | 4     |
//! | `(1)`  | 5     |
//!
//! A heading closes every open heading at the same or a deeper level; the
//! remaining stack is the heading path of the body that follows.

use regex::Regex;
use std::sync::OnceLock;

use super::{base_chunk_metadata, chunks_from_sections, general, Section};
use crate::config::SegmentConfig;
use crate::models::{Chunk, Document};

/// Depth given to tokens that match no known marker class.
pub const LEAF_DEPTH: u8 = 9;

fn legal_heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?m)^[ \t]*(?P<h>[IVXLCDM]+\.|[A-Z]\.|\d+\.|\([a-z]\)|\(\d+\))[ \t]+(?P<title>.+)$",
        )
        .expect("valid legal heading regex")
    })
}

/// Rank a heading token. Roman numerals are tried first, so single letters
/// such as `C.` or `D.` rank as Roman.
pub fn token_depth(token: &str) -> u8 {
    let token = token.trim();

    if let Some(body) = token.strip_suffix('.') {
        if !body.is_empty() && body.chars().all(|c| "IVXLCDM".contains(c)) {
            return 1;
        }
        if body.len() == 1 && body.chars().all(|c| c.is_ascii_uppercase()) {
            return 2;
        }
        if !body.is_empty() && body.chars().all(|c| c.is_ascii_digit()) {
            return 3;
        }
        return LEAF_DEPTH;
    }

    if let Some(inner) = token.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
        if inner.len() == 1 && inner.chars().all(|c| c.is_ascii_lowercase()) {
            return 4;
        }
        if !inner.is_empty() && inner.chars().all(|c| c.is_ascii_digit()) {
            return 5;
        }
    }

    LEAF_DEPTH
}

/// Open headings, bottom (outermost) to top (innermost).
#[derive(Debug, Default, Clone)]
pub struct HeadingStack {
    entries: Vec<(u8, String)>,
}

impl HeadingStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close every heading at `depth` or deeper, then open `label`.
    pub fn push(&mut self, depth: u8, label: String) {
        while self.entries.last().is_some_and(|(d, _)| *d >= depth) {
            self.entries.pop();
        }
        self.entries.push((depth, label));
    }

    pub fn path(&self) -> Vec<String> {
        self.entries.iter().map(|(_, label)| label.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Segment a legal document. Documents without outline markers are handed to
/// the general segmenter unchanged.
pub fn chunk_structured(doc: &Document, config: &SegmentConfig) -> Vec<Chunk> {
    let text = doc.raw_text.as_str();
    let matches: Vec<_> = legal_heading_re().captures_iter(text).collect();
    if matches.is_empty() {
        tracing::debug!(doc_id = %doc.id, "No legal outline markers, using general segmentation");
        return general::chunk_general(doc, config);
    }

    let mut sections = Vec::with_capacity(matches.len() + 1);
    let mut stack = HeadingStack::new();

    let first_start = matches[0].get(0).map_or(0, |m| m.start());
    if first_start > 0 {
        sections.push(Section {
            heading_path: Vec::new(),
            body_start: 0,
            body_end: first_start,
        });
    }

    for (i, caps) in matches.iter().enumerate() {
        let (Some(whole), Some(token), Some(title)) = (caps.get(0), caps.name("h"), caps.name("title"))
        else {
            continue;
        };
        let token = token.as_str().trim();
        let label = format!("{token} {}", title.as_str().trim());
        stack.push(token_depth(token), label);

        let body_end = matches
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(text.len(), |m| m.start());

        sections.push(Section {
            heading_path: stack.path(),
            body_start: whole.end(),
            body_end,
        });
    }

    let mut meta = base_chunk_metadata(doc);
    meta.insert("legal_mode".to_string(), serde_json::Value::Bool(true));

    chunks_from_sections(
        doc,
        &sections,
        config.structured_window,
        config.structured_overlap,
        &meta,
    )
}
