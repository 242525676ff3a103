//! Document segmentation: heading-aware sliding windows in two flavours.
//!
//! - [`general`] detects markdown and ALL-CAPS headings, one level deep.
//! - [`structured`] detects legal outline markers (`I.`, `A.`, `1.`, `(a)`, `(1)`)
//!   and tracks the full heading hierarchy; it falls back to [`general`] when a
//!   document carries no such markers.

pub mod general;
pub mod structured;

use serde::{Deserialize, Serialize};

use crate::config::SegmentConfig;
use crate::models::{Chunk, Document, Metadata};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentMode {
    General,
    Structured,
}

/// Phrases that mark a document as legal text in the deployments this engine
/// was built for (Vietnamese statutes and contracts).
const LEGAL_MARKERS: &[&str] = &[
    "điều ",
    "khoản ",
    "mục ",
    "chương ",
    "luật ",
    "nghị định",
    "thông tư",
    "quyết định",
    "căn cứ",
    "ban hành",
    "hiệu lực",
    "hợp đồng",
    "phụ lục",
    "tòa án",
    "bộ luật",
];

impl SegmentMode {
    /// Parse a caller-supplied mode name. `None` means "auto".
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "general" => Some(SegmentMode::General),
            "structured" | "legal" => Some(SegmentMode::Structured),
            _ => None,
        }
    }

    /// Pick a mode from the text itself: two or more distinct legal marker
    /// phrases select structured segmentation.
    pub fn detect(text: &str) -> Self {
        let lower = text.to_lowercase();
        let hits = LEGAL_MARKERS.iter().filter(|m| lower.contains(*m)).count();
        if hits >= 2 {
            SegmentMode::Structured
        } else {
            SegmentMode::General
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentMode::General => "general",
            SegmentMode::Structured => "structured",
        }
    }
}

/// Split a document into ordered chunks.
pub fn segment(doc: &Document, mode: SegmentMode, config: &SegmentConfig) -> Vec<Chunk> {
    if doc.raw_text.trim().is_empty() {
        return Vec::new();
    }

    match mode {
        SegmentMode::General => general::chunk_general(doc, config),
        SegmentMode::Structured => structured::chunk_structured(doc, config),
    }
}

/// A heading-delimited region of a document. `body_start..body_end` excludes
/// the heading line itself.
#[derive(Debug, Clone)]
pub(crate) struct Section {
    pub heading_path: Vec<String>,
    pub body_start: usize,
    pub body_end: usize,
}

/// Window every section body and build chunks with absolute offsets.
pub(crate) fn chunks_from_sections(
    doc: &Document,
    sections: &[Section],
    window: usize,
    overlap: usize,
    chunk_meta: &Metadata,
) -> Vec<Chunk> {
    let text = doc.raw_text.as_str();
    let mut chunks = Vec::new();

    for section in sections {
        for (start, end) in window_spans(text, section.body_start, section.body_end, window, overlap)
        {
            chunks.push(Chunk {
                id: uuid::Uuid::new_v4().to_string(),
                doc_id: doc.id.clone(),
                text: text[start..end].to_string(),
                start_char: start,
                end_char: end,
                heading_path: section.heading_path.clone(),
                metadata: chunk_meta.clone(),
            });
        }
    }

    chunks
}

/// Base chunk metadata: the document's source kind plus a copy of its metadata.
pub(crate) fn base_chunk_metadata(doc: &Document) -> Metadata {
    let mut meta = Metadata::new();
    meta.insert(
        "source".to_string(),
        serde_json::Value::String(doc.source_kind.as_str().to_string()),
    );
    for (k, v) in &doc.metadata {
        meta.insert(k.clone(), v.clone());
    }
    meta
}

/// Slide a `window`-byte window with `overlap` bytes of overlap over
/// `text[start..end]`, returning the whitespace-trimmed, non-empty spans.
///
/// Window edges are snapped to character boundaries and every iteration
/// advances by at least one character, so the loop always terminates and the
/// final partial window is always included.
pub(crate) fn window_spans(
    text: &str,
    start: usize,
    end: usize,
    window: usize,
    overlap: usize,
) -> Vec<(usize, usize)> {
    let end = floor_char_boundary(text, end);
    let mut spans = Vec::new();
    let mut i = ceil_char_boundary(text, start);

    while i < end {
        let mut j = floor_char_boundary(text, i.saturating_add(window).min(end));
        if j <= i {
            j = ceil_char_boundary(text, i + 1);
        }

        if let Some(span) = trim_span(text, i, j) {
            spans.push(span);
        }

        if j >= end {
            break;
        }

        let mut next = floor_char_boundary(text, j.saturating_sub(overlap));
        if next <= i {
            next = ceil_char_boundary(text, i + 1);
        }
        i = next;
    }

    spans
}

fn trim_span(text: &str, start: usize, end: usize) -> Option<(usize, usize)> {
    let slice = &text[start..end];
    let trimmed = slice.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lead = slice.len() - slice.trim_start().len();
    Some((start + lead, start + lead + trimmed.len()))
}

pub(crate) fn floor_char_boundary(text: &str, idx: usize) -> usize {
    let mut idx = idx.min(text.len());
    while !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

pub(crate) fn ceil_char_boundary(text: &str, idx: usize) -> usize {
    let mut idx = idx.min(text.len());
    while !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}
