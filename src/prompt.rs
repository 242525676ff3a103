//! Context blocks, citations and the answer prompt.

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::models::{Citation, Document, RetrievalHit};

/// Maximum characters of chunk text carried in a citation.
pub const SNIPPET_CHARS: usize = 600;

const SYSTEM_PROMPT: &str = "You are a knowledge assistant. Prefer and cite the provided CONTEXT \
(knowledge base) when it is relevant. If CONTEXT is empty or insufficient, still answer using \
your general knowledge (do NOT refuse). Only ask a clarifying question if the user request is \
truly ambiguous. Keep answers clear and practical. Cite sources like [1], [2] when using CONTEXT.";

/// Chat-template control tokens such as `<|im_start|>` or `<|endoftext|>`.
fn control_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<\|[A-Za-z0-9_]+\|>").expect("valid control token regex"))
}

/// Remove chat-template control tokens so user or document text cannot
/// open a new turn in the model's template.
pub fn sanitize(text: &str) -> String {
    control_token_re().replace_all(text, "").into_owned()
}

/// Numbered context blocks, `[i] (h1 > h2)` followed by the chunk text.
pub fn build_context(hits: &[RetrievalHit]) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| {
            let text = sanitize(&hit.chunk.text);
            let head = hit.chunk.heading_path.join(" > ");
            if head.is_empty() {
                format!("[{}]\n{}", i + 1, text)
            } else {
                format!("[{}] ({})\n{}", i + 1, sanitize(&head), text)
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn build_prompt(question: &str, context: &str) -> String {
    format!(
        "{SYSTEM_PROMPT}\n\nQUESTION:\n{}\n\nCONTEXT:\n{context}\n\nANSWER:",
        sanitize(question.trim())
    )
}

/// Citation per hit, numbered like the context blocks. `lookup` resolves
/// owning documents and is called at most once per document id.
pub fn format_citations<F>(hits: &[RetrievalHit], mut lookup: F) -> Vec<Citation>
where
    F: FnMut(&str) -> Option<Document>,
{
    let mut docs: HashMap<String, Option<Document>> = HashMap::new();

    hits.iter()
        .enumerate()
        .map(|(i, hit)| {
            let doc_id = hit.chunk.doc_id.clone();
            let doc = docs
                .entry(doc_id.clone())
                .or_insert_with(|| lookup(&doc_id));

            Citation {
                ref_num: i + 1,
                chunk_id: hit.chunk.id.clone(),
                doc_id,
                title: doc.as_ref().and_then(|d| d.title.clone()),
                source_kind: doc.as_ref().map(|d| d.source_kind),
                heading_path: hit.chunk.heading_path.clone(),
                score: hit.rerank_score.or(Some(hit.fused_score)),
                snippet: hit.chunk.text.chars().take(SNIPPET_CHARS).collect(),
            }
        })
        .collect()
}
