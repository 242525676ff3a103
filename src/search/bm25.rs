use parking_lot::{Mutex, RwLock};
use std::cmp::Ordering;
use std::sync::Arc;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, Occur, Query, TermQuery};
use tantivy::schema::*;
use tantivy::tokenizer::{LowerCaser, TextAnalyzer, WhitespaceTokenizer};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, Term};

use crate::error::Result;
use crate::models::Chunk;

const TOKENIZER: &str = "whitespace_lower";
const WRITER_MEMORY_BYTES: usize = 50_000_000;

/// Term-frequency ranking over chunk texts.
pub trait LexicalIndex: Send + Sync {
    /// Replace the whole index with `chunks`.
    fn build(&self, chunks: &[Chunk]) -> Result<()>;

    /// Rank chunks for `query`, best first. Never fails on an empty index.
    fn search(&self, query: &str, top_k: usize) -> Result<Vec<LexicalHit>>;

    /// Number of chunks in the current snapshot.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LexicalHit {
    pub chunk_id: String,
    pub score: f32,
}

/// One fully built, read-only index generation.
struct Snapshot {
    reader: IndexReader,
    f_chunk_id: Field,
    f_ordinal: Field,
    f_text: Field,
    len: usize,
}

/// BM25 index built on tantivy, held entirely in RAM.
///
/// Every `build` creates a fresh index and swaps it in under a short write
/// lock, so readers see either the previous or the new generation, never a
/// half-built one. Rebuilds are serialized by `rebuild_lock`.
pub struct Bm25Index {
    snapshot: RwLock<Option<Arc<Snapshot>>>,
    rebuild_lock: Mutex<()>,
}

impl Default for Bm25Index {
    fn default() -> Self {
        Self::new()
    }
}

impl Bm25Index {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(None),
            rebuild_lock: Mutex::new(()),
        }
    }

    fn build_snapshot(chunks: &[Chunk]) -> Result<Snapshot> {
        let mut schema_builder = Schema::builder();
        let f_chunk_id = schema_builder.add_text_field("chunk_id", STRING | STORED);
        let f_ordinal =
            schema_builder.add_u64_field("ordinal", NumericOptions::default() | STORED);
        let text_indexing = TextFieldIndexing::default()
            .set_tokenizer(TOKENIZER)
            .set_index_option(IndexRecordOption::WithFreqsAndPositions);
        let f_text = schema_builder.add_text_field(
            "text",
            TextOptions::default().set_indexing_options(text_indexing),
        );
        let schema = schema_builder.build();

        let index = Index::create_in_ram(schema);
        index.tokenizers().register(
            TOKENIZER,
            TextAnalyzer::builder(WhitespaceTokenizer::default())
                .filter(LowerCaser)
                .build(),
        );

        // A single writer thread keeps one segment in insertion order.
        let mut writer: IndexWriter = index.writer_with_num_threads(1, WRITER_MEMORY_BYTES)?;
        for (ordinal, chunk) in chunks.iter().enumerate() {
            writer.add_document(doc!(
                f_chunk_id => chunk.id.clone(),
                f_ordinal => ordinal as u64,
                f_text => chunk.text.clone(),
            ))?;
        }
        writer.commit()?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        Ok(Snapshot {
            reader,
            f_chunk_id,
            f_ordinal,
            f_text,
            len: chunks.len(),
        })
    }
}

/// Lower-case, whitespace split. No stemming, no stop words.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split_ascii_whitespace()
        .map(str::to_string)
        .collect()
}

impl LexicalIndex for Bm25Index {
    fn build(&self, chunks: &[Chunk]) -> Result<()> {
        let _guard = self.rebuild_lock.lock();

        let next = if chunks.is_empty() {
            None
        } else {
            Some(Arc::new(Self::build_snapshot(chunks)?))
        };

        *self.snapshot.write() = next;
        tracing::debug!("Lexical index rebuilt with {} chunks", chunks.len());
        Ok(())
    }

    fn search(&self, query: &str, top_k: usize) -> Result<Vec<LexicalHit>> {
        let terms = tokenize(query);
        if terms.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        // Clone the Arc so a concurrent rebuild can swap without waiting on us.
        let Some(snapshot) = self.snapshot.read().clone() else {
            return Ok(Vec::new());
        };

        let searcher = snapshot.reader.searcher();
        let clauses: Vec<(Occur, Box<dyn Query>)> = terms
            .iter()
            .map(|term| {
                let q: Box<dyn Query> = Box::new(TermQuery::new(
                    Term::from_field_text(snapshot.f_text, term),
                    IndexRecordOption::WithFreqs,
                ));
                (Occur::Should, q)
            })
            .collect();
        let query = BooleanQuery::new(clauses);

        // Score every match so ties can be broken by insertion order below.
        let top_docs = searcher.search(&query, &TopDocs::with_limit(snapshot.len.max(1)))?;

        let mut scored: Vec<(f32, u64, String)> = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher.doc(doc_address)?;
            let chunk_id = doc
                .get_first(snapshot.f_chunk_id)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            if chunk_id.is_empty() {
                continue;
            }
            let ordinal = doc
                .get_first(snapshot.f_ordinal)
                .and_then(|v| v.as_u64())
                .unwrap_or(u64::MAX);
            scored.push((score, ordinal, chunk_id));
        }

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(score, _, chunk_id)| LexicalHit { chunk_id, score })
            .collect())
    }

    fn len(&self) -> usize {
        self.snapshot.read().as_ref().map_or(0, |s| s.len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metadata;

    fn chunk(id: &str, text: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            doc_id: "doc".to_string(),
            text: text.to_string(),
            start_char: 0,
            end_char: text.len(),
            heading_path: Vec::new(),
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn test_tokenize_lowercases_and_splits() {
        assert_eq!(tokenize("Hello  WORLD\tfoo\n"), vec!["hello", "world", "foo"]);
        assert!(tokenize("   ").is_empty());
    }

    #[test]
    fn test_empty_index_returns_empty() {
        let index = Bm25Index::new();
        assert!(index.is_empty());
        assert!(index.search("anything", 10).unwrap().is_empty());

        index.build(&[]).unwrap();
        assert!(index.search("anything", 10).unwrap().is_empty());
    }

    #[test]
    fn test_best_match_ranks_first() {
        let index = Bm25Index::new();
        index
            .build(&[
                chunk("c1", "the user database"),
                chunk("c2", "database connection pool"),
                chunk("c3", "hello world"),
            ])
            .unwrap();

        let hits = index.search("Database POOL", 10).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_id, "c2");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let index = Bm25Index::new();
        index
            .build(&[
                chunk("first", "apple banana"),
                chunk("other", "cherry"),
                chunk("second", "apple banana"),
            ])
            .unwrap();

        let hits = index.search("apple", 10).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second"]);
        assert_eq!(hits[0].score, hits[1].score);
    }

    #[test]
    fn test_top_k_truncates() {
        let index = Bm25Index::new();
        let chunks: Vec<Chunk> = (0..20)
            .map(|i| chunk(&format!("c{i}"), &format!("shared token{i}")))
            .collect();
        index.build(&chunks).unwrap();
        assert_eq!(index.search("shared", 5).unwrap().len(), 5);
        assert!(index.search("shared", 0).unwrap().is_empty());
    }

    #[test]
    fn test_rebuild_replaces_wholesale() {
        let index = Bm25Index::new();
        index.build(&[chunk("old", "legacy content")]).unwrap();
        assert_eq!(index.search("legacy", 10).unwrap().len(), 1);

        index.build(&[chunk("new", "fresh content")]).unwrap();
        assert!(index.search("legacy", 10).unwrap().is_empty());
        assert_eq!(index.search("fresh", 10).unwrap()[0].chunk_id, "new");
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_concurrent_readers_during_rebuilds() {
        let index = Arc::new(Bm25Index::new());
        index.build(&[chunk("a", "stable text")]).unwrap();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let index = index.clone();
                std::thread::spawn(move || {
                    for _ in 0..20 {
                        let hits = index.search("stable", 10).unwrap();
                        assert_eq!(hits.len(), 1);
                    }
                })
            })
            .collect();

        for i in 0..5 {
            index
                .build(&[chunk(&format!("a{i}"), "stable text")])
                .unwrap();
        }
        for r in readers {
            r.join().unwrap();
        }
    }
}
