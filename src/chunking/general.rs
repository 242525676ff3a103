//! General-purpose segmentation for prose documents.
//!
//! Headings are found by two independent detectors whose results are merged
//! by offset:
//! 1. Markdown markers: `#` to `######` followed by heading text
//! 2. Short standalone ALL-CAPS lines (4-80 characters)
//!
//! Each heading opens a single-level section; text before the first heading
//! forms an unheaded section. Section bodies are windowed independently.

use regex::Regex;
use std::sync::OnceLock;

use super::{base_chunk_metadata, chunks_from_sections, Section};
use crate::config::SegmentConfig;
use crate::models::{Chunk, Document};

fn markdown_heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^(#{1,6})[ \t]+(.+)$").expect("valid markdown heading regex"))
}

fn caps_heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^[A-Z0-9][A-Z0-9 \t\r\-,:()]{3,79}$").expect("valid caps heading regex")
    })
}

/// A detected heading line: `start..end` spans the whole line.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Heading {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// Find all headings, sorted by offset, one per line.
pub(crate) fn detect_headings(text: &str) -> Vec<Heading> {
    let mut headings: Vec<Heading> = Vec::new();

    for caps in markdown_heading_re().captures_iter(text) {
        let (Some(whole), Some(title)) = (caps.get(0), caps.get(2)) else {
            continue;
        };
        let title = title.as_str().trim();
        if title.is_empty() {
            continue;
        }
        headings.push(Heading {
            start: whole.start(),
            end: whole.end(),
            text: title.to_string(),
        });
    }

    for m in caps_heading_re().find_iter(text) {
        let title = m.as_str().trim();
        if title.is_empty() {
            continue;
        }
        headings.push(Heading {
            start: m.start(),
            end: m.end(),
            text: title.to_string(),
        });
    }

    headings.sort_by_key(|h| h.start);
    headings.dedup_by_key(|h| h.start);
    headings
}

/// Segment a document with single-level headings.
pub fn chunk_general(doc: &Document, config: &SegmentConfig) -> Vec<Chunk> {
    let sections = general_sections(&doc.raw_text);
    let meta = base_chunk_metadata(doc);
    chunks_from_sections(
        doc,
        &sections,
        config.general_window,
        config.general_overlap,
        &meta,
    )
}

fn general_sections(text: &str) -> Vec<Section> {
    let headings = detect_headings(text);
    let mut sections = Vec::with_capacity(headings.len() + 1);

    let first_start = headings.first().map_or(text.len(), |h| h.start);
    if first_start > 0 {
        sections.push(Section {
            heading_path: Vec::new(),
            body_start: 0,
            body_end: first_start,
        });
    }

    for (i, heading) in headings.iter().enumerate() {
        let body_end = headings.get(i + 1).map_or(text.len(), |next| next.start);
        sections.push(Section {
            heading_path: vec![heading.text.clone()],
            body_start: heading.end,
            body_end,
        });
    }

    sections
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceKind;

    fn small_config(window: usize, overlap: usize) -> SegmentConfig {
        SegmentConfig {
            general_window: window,
            general_overlap: overlap,
            ..SegmentConfig::default()
        }
    }

    #[test]
    fn test_detect_markdown_and_caps_headings() {
        let text = "# Overview\nintro text\nRESULTS AND DISCUSSION\nmore text\n## Details\nend";
        let headings = detect_headings(text);
        let titles: Vec<&str> = headings.iter().map(|h| h.text.as_str()).collect();
        assert_eq!(titles, vec!["Overview", "RESULTS AND DISCUSSION", "Details"]);
        assert!(headings.windows(2).all(|w| w[0].start < w[1].start));
    }

    #[test]
    fn test_caps_heading_length_bounds() {
        // too short
        assert!(detect_headings("ABC\nbody").is_empty());
        // too long
        let long = "A".repeat(81);
        assert!(detect_headings(&format!("{long}\nbody")).is_empty());
        // mixed case is not a heading
        assert!(detect_headings("Introduction\nbody").is_empty());
    }

    #[test]
    fn test_intro_methods_scenario() {
        let text = "INTRODUCTION\nHello world.\nMETHODS\nWe did X.";
        let doc = Document::new(SourceKind::Text, None, text);
        let chunks = chunk_general(&doc, &small_config(20, 5));

        assert!(chunks.len() >= 2);
        assert_eq!(chunks[0].heading_path, vec!["INTRODUCTION"]);
        assert_eq!(chunks[0].text, "Hello world.");
        let last = chunks.last().unwrap();
        assert_eq!(last.heading_path, vec!["METHODS"]);
        assert_eq!(last.text, "We did X.");
        assert_eq!(last.end_char, text.len());
    }

    #[test]
    fn test_offsets_are_absolute() {
        let text = "PREAMBLE TEXT HERE\nalpha beta\n# Second\ngamma delta";
        let doc = Document::new(SourceKind::Text, None, text);
        let chunks = chunk_general(&doc, &SegmentConfig::default());
        for chunk in &chunks {
            assert_eq!(&text[chunk.start_char..chunk.end_char], chunk.text);
        }
        assert_eq!(chunks[1].text, "gamma delta");
        assert_eq!(chunks[1].heading_path, vec!["Second"]);
    }

    #[test]
    fn test_leading_text_has_empty_heading_path() {
        let text = "some unheaded lead-in\n# Heading\nbody";
        let doc = Document::new(SourceKind::Text, None, text);
        let chunks = chunk_general(&doc, &SegmentConfig::default());
        assert_eq!(chunks[0].text, "some unheaded lead-in");
        assert!(chunks[0].heading_path.is_empty());
    }

    #[test]
    fn test_heading_without_body_produces_no_chunk() {
        let text = "# Empty\n   \n# Full\ncontent";
        let doc = Document::new(SourceKind::Text, None, text);
        let chunks = chunk_general(&doc, &SegmentConfig::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].heading_path, vec!["Full"]);
    }

    #[test]
    fn test_no_headings_single_section() {
        let text = "just a paragraph of lowercase prose.";
        let doc = Document::new(SourceKind::Html, None, text);
        let chunks = chunk_general(&doc, &SegmentConfig::default());
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].heading_path.is_empty());
        assert_eq!(chunks[0].metadata["source"], "html");
    }

    #[test]
    fn test_long_section_windows_overlap_and_cover_body() {
        let body: String = (0..200).map(|i| format!("word{i} ")).collect();
        let text = format!("# Long\n{body}");
        let doc = Document::new(SourceKind::Text, None, text.clone());
        let chunks = chunk_general(&doc, &small_config(100, 20));

        assert!(chunks.len() > 5);
        for pair in chunks.windows(2) {
            // consecutive windows overlap but never leave a gap
            assert!(pair[1].start_char <= pair[0].end_char);
            assert!(pair[1].start_char > pair[0].start_char);
        }
        assert_eq!(chunks.last().unwrap().end_char, text.trim_end().len());
    }
}
