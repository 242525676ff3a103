use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use crate::models::{Document, Metadata};

const MAX_TITLE_CHARS: usize = 120;
const SCAN_LINES: usize = 40;

/// Temp-file names from uploads: `upload_<uuid>[.ext]`.
fn generic_title_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^upload_[0-9a-fA-F\-]{8,}(?:\.[A-Za-z0-9]{1,8})?$")
            .expect("valid generic title regex")
    })
}

fn leading_marks_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[#>*\-\s]+").expect("valid leading marks regex"))
}

fn trailing_separators_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\-|:_]+$").expect("valid trailing separator regex"))
}

pub fn is_generic_title(title: Option<&str>) -> bool {
    match title.map(str::trim) {
        None | Some("") => true,
        Some(t) => generic_title_re().is_match(t),
    }
}

/// Strip bullets, heading marks, repeated whitespace and trailing separators.
fn clean_line(line: &str) -> String {
    let s = leading_marks_re().replace(line.trim(), "");
    let s = s.split_whitespace().collect::<Vec<_>>().join(" ");
    trailing_separators_re().replace(&s, "").trim().to_string()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Guess a title from the first non-empty lines of `text`.
pub fn extract_title_from_text(text: &str) -> Option<String> {
    let lines: Vec<&str> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(SCAN_LINES)
        .collect();
    let first = lines.first()?;

    // First markdown heading wins
    if let Some(heading) = lines
        .iter()
        .filter(|l| l.trim_start().starts_with('#'))
        .map(|l| clean_line(l))
        .find(|c| (4..=MAX_TITLE_CHARS).contains(&char_len(c)))
    {
        return Some(heading);
    }

    if let Some(line) = lines
        .iter()
        .map(|l| clean_line(l))
        .find(|c| (6..=MAX_TITLE_CHARS).contains(&char_len(c)))
    {
        return Some(line);
    }

    let cleaned = clean_line(first);
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.chars().take(MAX_TITLE_CHARS).collect())
    }
}

fn meta_str<'a>(meta: &'a Metadata, key: &str) -> Option<&'a str> {
    meta.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Choose the display title for a document.
///
/// Priority: uploaded file name, caller-supplied `metadata.title`, a
/// non-generic `doc.title`, a title extracted from the text, then the source
/// URL, the video id and finally the document id.
pub fn best_title(doc: &Document) -> String {
    let meta = &doc.metadata;

    if let Some(original) =
        meta_str(meta, "original_name").or_else(|| meta_str(meta, "original_filename"))
    {
        return original.to_string();
    }

    if let Some(title) = meta_str(meta, "title") {
        return title.to_string();
    }

    if !is_generic_title(doc.title.as_deref()) {
        if let Some(title) = doc.title.as_deref().map(str::trim) {
            return title.to_string();
        }
    }

    if let Some(extracted) = extract_title_from_text(&doc.raw_text) {
        return extracted;
    }

    if let Some(url) = meta_str(meta, "url") {
        return url.to_string();
    }

    if let Some(video_id) = meta_str(meta, "video_id") {
        return format!("YouTube:{video_id}");
    }

    doc.id.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceKind;
    use serde_json::json;

    fn doc(title: Option<&str>, text: &str) -> Document {
        Document::new(SourceKind::Text, title.map(String::from), text)
    }

    #[test]
    fn test_generic_titles() {
        assert!(is_generic_title(None));
        assert!(is_generic_title(Some("  ")));
        assert!(is_generic_title(Some("upload_3f2a9c1e-aa11-4b5c.pdf")));
        assert!(is_generic_title(Some("upload_deadbeef")));
        assert!(!is_generic_title(Some("upload_report.pdf")));
        assert!(!is_generic_title(Some("Annual Report")));
    }

    #[test]
    fn test_metadata_original_name_wins() {
        let mut d = doc(Some("Given"), "# Heading Here");
        d.metadata.insert("title".into(), json!("Meta title"));
        d.metadata.insert("original_name".into(), json!("contract.pdf"));
        assert_eq!(best_title(&d), "contract.pdf");

        d.metadata.remove("original_name");
        assert_eq!(best_title(&d), "Meta title");
    }

    #[test]
    fn test_non_generic_doc_title_used() {
        let d = doc(Some("  Lease Agreement "), "# Something else");
        assert_eq!(best_title(&d), "Lease Agreement");
    }

    #[test]
    fn test_generic_title_falls_back_to_heading() {
        let d = doc(
            Some("upload_0123456789abcdef.docx"),
            "intro line that is long enough\n## Real Title ##\nbody",
        );
        assert_eq!(best_title(&d), "Real Title ##");
    }

    #[test]
    fn test_extract_first_decent_line() {
        assert_eq!(
            extract_title_from_text("\n\n  - Quarterly results:  \nmore").as_deref(),
            Some("Quarterly results")
        );
        // too short for the "decent line" rule, so the first line is used as is
        assert_eq!(extract_title_from_text("Hi\nYo").as_deref(), Some("Hi"));
        assert_eq!(extract_title_from_text("   \n\t"), None);
    }

    #[test]
    fn test_url_and_video_fallbacks() {
        let mut d = doc(None, "");
        d.metadata.insert("video_id".into(), json!("abc123"));
        assert_eq!(best_title(&d), "YouTube:abc123");

        d.metadata.insert("url".into(), json!("https://example.com/a"));
        assert_eq!(best_title(&d), "https://example.com/a");

        let bare = doc(None, "");
        assert_eq!(best_title(&bare), bare.id);
    }
}
