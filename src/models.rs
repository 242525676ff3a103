use serde::{Deserialize, Serialize};
use std::fmt;

/// Open, string-keyed metadata attached to documents and chunks.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Pdf,
    Docx,
    Html,
    Video,
    Text,
    Other,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Pdf => "pdf",
            SourceKind::Docx => "docx",
            SourceKind::Html => "html",
            SourceKind::Video => "video",
            SourceKind::Text => "text",
            SourceKind::Other => "other",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ingested document. Title and metadata may be backfilled after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub source_kind: SourceKind,
    pub title: Option<String>,
    pub raw_text: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    /// Create a document with a fresh random id.
    pub fn new(source_kind: SourceKind, title: Option<String>, raw_text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_kind,
            title,
            raw_text: raw_text.into(),
            metadata: Metadata::new(),
        }
    }
}

/// A contiguous span of a document used as the unit of retrieval.
///
/// `start_char`/`end_char` are byte offsets into the owning document's
/// `raw_text`, always on character boundaries, and
/// `&raw_text[start_char..end_char] == text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub doc_id: String,
    pub text: String,
    pub start_char: usize,
    pub end_char: usize,
    #[serde(default)]
    pub heading_path: Vec<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// A retrieved chunk with the scores of every stage it went through.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalHit {
    pub chunk: Chunk,
    pub lexical_score: Option<f32>,
    pub vector_score: Option<f32>,
    pub fused_score: f32,
    pub rerank_score: Option<f32>,
}

impl RetrievalHit {
    pub fn chunk_id(&self) -> &str {
        &self.chunk.id
    }
}

/// Source reference sent ahead of the generated answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    #[serde(rename = "ref")]
    pub ref_num: usize,
    pub chunk_id: String,
    pub doc_id: String,
    pub title: Option<String>,
    pub source_kind: Option<SourceKind>,
    pub heading_path: Vec<String>,
    pub score: Option<f32>,
    pub snippet: String,
}

/// Search request
#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    /// Equality filter applied to vector payloads
    #[serde(default)]
    pub filter: Option<Metadata>,
    /// "legal" restricts results to structured-mode chunks
    #[serde(default)]
    pub mode: Option<String>,
    /// Only used with `mode = "legal"`
    #[serde(default)]
    pub jurisdiction: Option<String>,
    /// Only used with `mode = "legal"`
    #[serde(default)]
    pub status: Option<String>,
}

impl SearchRequest {
    /// The explicit filter merged with the legal-mode shortcuts. `None` when
    /// nothing constrains the search.
    pub fn metadata_filter(&self) -> Option<Metadata> {
        let mut filter = self.filter.clone().unwrap_or_default();
        if self.mode.as_deref().map(str::trim) == Some("legal") {
            filter.insert("legal_mode".to_string(), serde_json::Value::Bool(true));
            for (key, value) in [("jurisdiction", &self.jurisdiction), ("status", &self.status)] {
                if let Some(v) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
                    filter.insert(key.to_string(), serde_json::Value::String(v.to_string()));
                }
            }
        }
        (!filter.is_empty()).then_some(filter)
    }
}

/// Search response
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<RetrievalHit>,
}

/// Ingest request: plain text already extracted by the caller.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestRequest {
    pub text: String,
    pub title: Option<String>,
    #[serde(default = "default_source_kind")]
    pub source_kind: SourceKind,
    #[serde(default)]
    pub metadata: Metadata,
    /// "auto" (default), "general" or "structured"
    pub mode: Option<String>,
}

fn default_source_kind() -> SourceKind {
    SourceKind::Text
}

/// Ingest response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub doc_id: String,
    pub chunks: usize,
}

/// Chat request
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub question: String,
}

/// Non-streaming chat answer
#[derive(Debug, Clone, Serialize)]
pub struct ChatAnswer {
    pub answer: String,
    pub citations: Vec<Citation>,
}

/// Document listing entry
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub id: String,
    pub title: Option<String>,
    pub source_kind: SourceKind,
    pub chunk_count: usize,
    pub metadata: Metadata,
}
