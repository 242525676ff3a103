//! Fakes shared by the integration tests. No network access is needed.

#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::stream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hybrid_rag::config::Config;
use hybrid_rag::engine::{Backends, Engine};
use hybrid_rag::error::{Error, Result};
use hybrid_rag::llm::{DisabledReranker, Embedder, Generator, Reranker, TokenStream};
use hybrid_rag::models::{IngestRequest, Metadata, SourceKind};
use hybrid_rag::search::{
    Bm25Index, DimensionCheck, DimensionPolicy, LexicalHit, LexicalIndex, MemoryVectorStore,
    MetadataFilter, VectorBackend, VectorHit,
};
use hybrid_rag::store::MemoryStore;

/// Letter-frequency vectors (26 wide): texts sharing letters end up close.
pub struct LetterEmbedder;

#[async_trait]
impl Embedder for LetterEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; 26];
                for b in t.to_ascii_lowercase().bytes().filter(u8::is_ascii_lowercase) {
                    v[(b - b'a') as usize] += 1.0;
                }
                v
            })
            .collect())
    }
}

/// Streams a fixed list of deltas, or fails to start when `deltas` is `None`.
pub struct ScriptedGenerator {
    pub deltas: Option<Vec<&'static str>>,
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        match &self.deltas {
            Some(deltas) => Ok(deltas.concat()),
            None => Err(Error::backend("generation", "connection refused")),
        }
    }

    async fn stream_generate(&self, _prompt: &str) -> Result<TokenStream> {
        match &self.deltas {
            Some(deltas) => {
                let items: Vec<Result<String>> =
                    deltas.iter().map(|d| Ok(d.to_string())).collect();
                Ok(Box::pin(stream::iter(items)))
            }
            None => Err(Error::backend("generation", "connection refused")),
        }
    }
}

/// Wraps a [`MemoryVectorStore`] and can be switched to fail reads or writes.
pub struct FlakyVectors {
    pub inner: MemoryVectorStore,
    pub search_down: AtomicBool,
    pub upsert_down: AtomicBool,
}

impl FlakyVectors {
    pub fn new(policy: DimensionPolicy) -> Self {
        Self {
            inner: MemoryVectorStore::new("test_chunks", policy),
            search_down: AtomicBool::new(false),
            upsert_down: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl VectorBackend for FlakyVectors {
    async fn ensure_dimension(&self, expected: usize) -> Result<DimensionCheck> {
        self.inner.ensure_dimension(expected).await
    }

    async fn upsert(&self, ids: &[String], vectors: &[Vec<f32>], payloads: &[Metadata]) -> Result<()> {
        if self.upsert_down.load(Ordering::SeqCst) {
            return Err(Error::backend("vector", "connection refused"));
        }
        self.inner.upsert(ids, vectors, payloads).await
    }

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorHit>> {
        if self.search_down.load(Ordering::SeqCst) {
            return Err(Error::backend("vector", "connection refused"));
        }
        self.inner.search(vector, top_k, filter).await
    }

    async fn delete_by_document(&self, doc_id: &str) -> Result<()> {
        self.inner.delete_by_document(doc_id).await
    }
}

/// BM25 index whose searches can be switched off.
pub struct FlakyLexical {
    pub inner: Bm25Index,
    pub down: AtomicBool,
}

impl LexicalIndex for FlakyLexical {
    fn build(&self, chunks: &[hybrid_rag::models::Chunk]) -> Result<()> {
        self.inner.build(chunks)
    }

    fn search(&self, query: &str, top_k: usize) -> Result<Vec<LexicalHit>> {
        if self.down.load(Ordering::SeqCst) {
            return Err(Error::Store("lexical index offline".to_string()));
        }
        self.inner.search(query, top_k)
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

pub struct Harness {
    pub engine: Engine,
    pub store: Arc<MemoryStore>,
    pub vectors: Arc<FlakyVectors>,
    pub lexical: Arc<FlakyLexical>,
}

pub fn harness(config: &Config) -> Harness {
    harness_with(config, Arc::new(DisabledReranker), Some(vec!["Hel", "lo"]))
}

pub fn harness_with(
    config: &Config,
    reranker: Arc<dyn Reranker>,
    deltas: Option<Vec<&'static str>>,
) -> Harness {
    let store = Arc::new(MemoryStore::in_memory());
    let vectors = Arc::new(FlakyVectors::new(DimensionPolicy::from_flag(
        config.vector.recreate_on_dim_mismatch,
    )));
    let lexical = Arc::new(FlakyLexical {
        inner: Bm25Index::new(),
        down: AtomicBool::new(false),
    });

    let engine = Engine::new(
        config,
        Backends {
            store: store.clone(),
            lexical: lexical.clone(),
            vectors: vectors.clone(),
            embedder: Arc::new(LetterEmbedder),
            generator: Arc::new(ScriptedGenerator { deltas }),
            reranker,
        },
    )
    .unwrap();

    Harness {
        engine,
        store,
        vectors,
        lexical,
    }
}

pub fn text_request(text: &str) -> IngestRequest {
    IngestRequest {
        text: text.to_string(),
        title: None,
        source_kind: SourceKind::Text,
        metadata: Metadata::new(),
        mode: None,
    }
}
