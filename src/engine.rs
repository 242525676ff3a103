//! Ingestion, retrieval and chat on top of the pluggable backends.
//!
//! Ingestion runs title backfill, mode detection, legal enrichment,
//! segmentation, embedding and the vector upsert before anything is written
//! to the document store, so a document whose vectors were not written is
//! never recorded. Retrieval queries the vector and lexical paths
//! concurrently, fuses them with RRF, hydrates chunks and reranks.

use futures_util::stream;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::chunking::{segment, SegmentMode};
use crate::config::{Config, RetrievalConfig, SegmentConfig, VectorBackendKind};
use crate::enrich::{best_title, enrich_legal_metadata};
use crate::error::{Error, Result};
use crate::llm::{
    build_reranker, Embedder, Generator, HttpEmbedder, HttpGenerator, Reranker, TokenStream,
};
use crate::models::{
    ChatAnswer, Chunk, Citation, Document, DocumentSummary, IngestRequest, IngestResponse,
    Metadata, RetrievalHit,
};
use crate::prompt::{build_context, build_prompt, format_citations};
use crate::relay::{Relay, RelayConfig};
use crate::search::{
    fuse_scored, Bm25Index, DimensionCheck, DimensionPolicy, LexicalHit, LexicalIndex,
    MemoryVectorStore, MetadataFilter, QdrantBackend, VectorBackend, VectorHit,
};
use crate::store::{DocumentStore, MemoryStore};

/// The concrete components an [`Engine`] runs on.
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn DocumentStore>,
    pub lexical: Arc<dyn LexicalIndex>,
    pub vectors: Arc<dyn VectorBackend>,
    pub embedder: Arc<dyn Embedder>,
    pub generator: Arc<dyn Generator>,
    pub reranker: Arc<dyn Reranker>,
}

/// Citations plus the live token relay for one streamed answer.
pub struct ChatStream {
    pub citations: Vec<Citation>,
    pub relay: Relay,
}

pub struct Engine {
    store: Arc<dyn DocumentStore>,
    lexical: Arc<dyn LexicalIndex>,
    vectors: Arc<dyn VectorBackend>,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    reranker: Arc<dyn Reranker>,
    retrieval: RetrievalConfig,
    segment: SegmentConfig,
    relay: RelayConfig,
    /// Held across reading the chunks and swapping the lexical snapshot, so
    /// a rebuild that read the store earlier cannot install over a later one.
    rebuild_lock: Arc<Mutex<()>>,
}

impl Engine {
    /// Assemble an engine and build the lexical index from the stored chunks.
    pub fn new(config: &Config, backends: Backends) -> Result<Self> {
        let chunks = backends.store.list_chunks()?;
        backends.lexical.build(&chunks)?;
        tracing::info!("Lexical index built with {} chunks", chunks.len());

        Ok(Self {
            store: backends.store,
            lexical: backends.lexical,
            vectors: backends.vectors,
            embedder: backends.embedder,
            generator: backends.generator,
            reranker: backends.reranker,
            retrieval: config.retrieval.clone(),
            segment: config.segment.clone(),
            relay: RelayConfig::from(&config.stream),
            rebuild_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Wire up the HTTP-backed components named by `config`.
    pub fn from_config(config: &Config, client: reqwest::Client) -> Result<Self> {
        let store = Arc::new(MemoryStore::open(&config.store_path())?);

        let vectors: Arc<dyn VectorBackend> = match config.vector.backend {
            VectorBackendKind::Qdrant => {
                tracing::info!(
                    "Vector backend: qdrant at {} (collection '{}')",
                    config.vector.url,
                    config.vector.collection
                );
                Arc::new(QdrantBackend::new(client.clone(), &config.vector))
            }
            VectorBackendKind::Memory => {
                tracing::warn!(
                    "Vector backend: in-memory; vectors are lost on restart until documents are re-ingested"
                );
                Arc::new(MemoryVectorStore::new(
                    config.vector.collection.clone(),
                    DimensionPolicy::from_flag(config.vector.recreate_on_dim_mismatch),
                ))
            }
        };

        let backends = Backends {
            store,
            lexical: Arc::new(Bm25Index::new()),
            vectors,
            embedder: Arc::new(HttpEmbedder::new(client.clone(), config.llm.clone())?),
            generator: Arc::new(HttpGenerator::new(client.clone(), config.llm.clone())?),
            reranker: build_reranker(&config.reranker, client)?,
        };

        Self::new(config, backends)
    }

    pub fn reranker_enabled(&self) -> bool {
        self.reranker.is_enabled()
    }

    pub fn chunk_count(&self) -> usize {
        self.lexical.len()
    }

    // ─── Ingestion ───────────────────────────────────────

    /// Ingest caller-supplied text. `mode` may be "auto", "general" or "structured".
    pub async fn ingest(&self, req: IngestRequest) -> Result<IngestResponse> {
        if req.text.trim().is_empty() {
            return Err(Error::InvalidInput("text is required".to_string()));
        }

        let mode = match req.mode.as_deref().map(str::trim) {
            None | Some("") | Some("auto") => None,
            Some(name) => Some(SegmentMode::parse(name).ok_or_else(|| {
                Error::InvalidInput(format!(
                    "unknown mode '{name}', expected auto, general or structured"
                ))
            })?),
        };

        let mut doc = Document::new(req.source_kind, req.title, req.text);
        doc.metadata = req.metadata;
        self.ingest_document(doc, mode).await
    }

    /// Segment, embed and index `doc`. The store is only written after the
    /// vectors are in place.
    pub async fn ingest_document(
        &self,
        mut doc: Document,
        mode: Option<SegmentMode>,
    ) -> Result<IngestResponse> {
        let title = best_title(&doc);
        doc.metadata
            .insert("display_title".to_string(), json!(title.clone()));
        doc.title = Some(title);

        let mode = mode.unwrap_or_else(|| SegmentMode::detect(&doc.raw_text));
        doc.metadata
            .insert("mode".to_string(), json!(mode.as_str()));
        if mode == SegmentMode::Structured {
            enrich_legal_metadata(&mut doc.metadata);
        }

        let chunks = segment(&doc, mode, &self.segment);
        if !chunks.is_empty() {
            self.index_vectors(&chunks).await?;
        }

        if let Err(e) = self.save(&doc, &chunks) {
            // Roll back whatever part of the document did land
            if let Err(cleanup) = self.store.delete_document_cascade(&doc.id) {
                tracing::warn!("Failed to remove partial records of {}: {cleanup}", doc.id);
            }
            if let Err(cleanup) = self.vectors.delete_by_document(&doc.id).await {
                tracing::warn!("Failed to remove vectors of unsaved document {}: {cleanup}", doc.id);
            }
            return Err(e);
        }

        self.rebuild_lexical().await?;

        tracing::info!(
            "Ingested document {} ('{}', {} mode, {} chunks)",
            doc.id,
            doc.title.as_deref().unwrap_or_default(),
            mode.as_str(),
            chunks.len()
        );

        Ok(IngestResponse {
            doc_id: doc.id,
            chunks: chunks.len(),
        })
    }

    async fn index_vectors(&self, chunks: &[Chunk]) -> Result<()> {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;
        let dim = match vectors.first() {
            Some(v) if !v.is_empty() => v.len(),
            _ => {
                return Err(Error::InvalidInput(
                    "embedder returned no usable vectors".to_string(),
                ))
            }
        };

        if self.vectors.ensure_dimension(dim).await? == DimensionCheck::Recreated {
            tracing::warn!(
                "Vector collection recreated at dim {dim}; documents ingested earlier are only \
                 searchable lexically until re-ingested"
            );
        }

        let ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
        let payloads: Vec<Metadata> = chunks.iter().map(chunk_payload).collect();
        self.vectors.upsert(&ids, &vectors, &payloads).await
    }

    fn save(&self, doc: &Document, chunks: &[Chunk]) -> Result<()> {
        self.store.save_document(doc)?;
        self.store.save_chunks(chunks)
    }

    /// Remove a document, its vectors and its chunks.
    pub async fn delete_document(&self, doc_id: &str) -> Result<()> {
        if self.store.get_document(doc_id)?.is_none() {
            return Err(Error::NotFound(format!("document {doc_id}")));
        }

        self.vectors.delete_by_document(doc_id).await?;
        self.store.delete_document_cascade(doc_id)?;
        self.rebuild_lexical().await?;

        tracing::info!("Deleted document {doc_id}");
        Ok(())
    }

    /// Rebuild the lexical index from every stored chunk.
    pub async fn rebuild_lexical(&self) -> Result<()> {
        let store = self.store.clone();
        let lexical = self.lexical.clone();
        let rebuild_lock = self.rebuild_lock.clone();
        tokio::task::spawn_blocking(move || {
            let _guard = rebuild_lock.lock();
            let chunks = store.list_chunks()?;
            lexical.build(&chunks)
        })
        .await
        .map_err(|e| Error::backend("lexical", format!("rebuild task failed: {e}")))?
    }

    pub fn get_document(&self, doc_id: &str) -> Result<Document> {
        self.store
            .get_document(doc_id)?
            .ok_or_else(|| Error::NotFound(format!("document {doc_id}")))
    }

    pub fn get_chunk(&self, chunk_id: &str) -> Result<Chunk> {
        self.store
            .get_chunk(chunk_id)?
            .ok_or_else(|| Error::NotFound(format!("chunk {chunk_id}")))
    }

    pub fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        let chunks = self.store.list_chunks()?;
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for chunk in &chunks {
            *counts.entry(chunk.doc_id.as_str()).or_default() += 1;
        }

        Ok(self
            .store
            .list_documents()?
            .into_iter()
            .map(|doc| DocumentSummary {
                chunk_count: counts.get(doc.id.as_str()).copied().unwrap_or(0),
                id: doc.id,
                title: doc.title,
                source_kind: doc.source_kind,
                metadata: doc.metadata,
            })
            .collect())
    }

    // ─── Retrieval ───────────────────────────────────────

    /// Hybrid retrieval: vector and lexical search, RRF fusion, hydration and
    /// reranking. Fails only when both retrieval paths fail.
    pub async fn retrieve(
        &self,
        query: &str,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<RetrievalHit>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::InvalidInput("query is required".to_string()));
        }

        let (vector_res, lexical_res) =
            tokio::join!(self.vector_search(query, filter), self.lexical_search(query));

        let (vector_hits, lexical_hits) = match (vector_res, lexical_res) {
            (Ok(v), Ok(l)) => (v, l),
            (Err(e), Ok(l)) => {
                tracing::warn!("Vector retrieval unavailable, using lexical results only: {e}");
                (Vec::new(), l)
            }
            (Ok(v), Err(e)) => {
                tracing::warn!("Lexical retrieval unavailable, using vector results only: {e}");
                (v, Vec::new())
            }
            (Err(ve), Err(le)) => {
                return Err(Error::backend(
                    "retrieval",
                    format!("vector: {ve}; lexical: {le}"),
                ))
            }
        };

        let hits = self.hydrate(&vector_hits, &lexical_hits)?;
        tracing::debug!(
            "Retrieved {} vector / {} lexical hits, {} fused",
            vector_hits.len(),
            lexical_hits.len(),
            hits.len()
        );

        self.reranker
            .rerank(query, hits, self.retrieval.topk_rerank)
            .await
    }

    async fn vector_search(
        &self,
        query: &str,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorHit>> {
        let deadline = Duration::from_secs(self.retrieval.vector_timeout_secs);
        let search = async {
            let embedding = self.embedder.embed_one(query).await?;
            self.vectors
                .search(&embedding, self.retrieval.topk_vector, filter)
                .await
        };
        tokio::time::timeout(deadline, search)
            .await
            .map_err(|_| Error::backend("vector", format!("no answer within {deadline:?}")))?
    }

    async fn lexical_search(&self, query: &str) -> Result<Vec<LexicalHit>> {
        let lexical = self.lexical.clone();
        let query = query.to_string();
        let top_k = self.retrieval.topk_bm25;
        tokio::task::spawn_blocking(move || lexical.search(&query, top_k))
            .await
            .map_err(|e| Error::backend("lexical", format!("search task failed: {e}")))?
    }

    /// Fuse both rankings and load the chunks behind them. Ids the store no
    /// longer knows are dropped.
    fn hydrate(
        &self,
        vector_hits: &[VectorHit],
        lexical_hits: &[LexicalHit],
    ) -> Result<Vec<RetrievalHit>> {
        let vector_ids: Vec<&str> = vector_hits.iter().map(|h| h.chunk_id.as_str()).collect();
        let lexical_ids: Vec<&str> = lexical_hits.iter().map(|h| h.chunk_id.as_str()).collect();

        let mut vector_scores: HashMap<&str, f32> = HashMap::new();
        for hit in vector_hits {
            vector_scores.entry(hit.chunk_id.as_str()).or_insert(hit.score);
        }
        let mut lexical_scores: HashMap<&str, f32> = HashMap::new();
        for hit in lexical_hits {
            lexical_scores.entry(hit.chunk_id.as_str()).or_insert(hit.score);
        }

        let cap = self.retrieval.topk_vector.max(self.retrieval.topk_bm25);
        let mut seen = HashSet::new();
        let mut hits = Vec::new();

        for (chunk_id, fused_score) in fuse_scored(&vector_ids, &lexical_ids, self.retrieval.rrf_k) {
            if hits.len() >= cap {
                break;
            }
            if !seen.insert(chunk_id.clone()) {
                continue;
            }
            let Some(chunk) = self.store.get_chunk(&chunk_id)? else {
                tracing::debug!("Skipping stale chunk id {chunk_id}");
                continue;
            };
            hits.push(RetrievalHit {
                lexical_score: lexical_scores.get(chunk_id.as_str()).copied(),
                vector_score: vector_scores.get(chunk_id.as_str()).copied(),
                fused_score,
                rerank_score: None,
                chunk,
            });
        }

        Ok(hits)
    }

    // ─── Chat ────────────────────────────────────────────

    /// Retrieve context for `question` and generate a complete answer.
    pub async fn chat(&self, question: &str) -> Result<ChatAnswer> {
        let (prompt, citations) = self.prepare_chat(question).await?;
        let answer = self.generator.generate(&prompt).await?;
        Ok(ChatAnswer { answer, citations })
    }

    /// Retrieve context for `question` and start streaming the answer.
    ///
    /// A generation backend that fails to start is reported through the
    /// relay as a failure event, after the citations have been delivered.
    pub async fn chat_stream(&self, question: &str) -> Result<ChatStream> {
        let (prompt, citations) = self.prepare_chat(question).await?;

        let upstream: TokenStream = match self.generator.stream_generate(&prompt).await {
            Ok(tokens) => tokens,
            Err(e) => {
                tracing::warn!("Generation stream failed to start: {e}");
                Box::pin(stream::once(async move { Err::<String, Error>(e) }))
            }
        };

        Ok(ChatStream {
            citations,
            relay: Relay::spawn(upstream, self.relay),
        })
    }

    async fn prepare_chat(&self, question: &str) -> Result<(String, Vec<Citation>)> {
        let question = question.trim();
        if question.is_empty() {
            return Err(Error::InvalidInput("question is required".to_string()));
        }

        let hits = self.retrieve(question, None).await?;
        let prompt = build_prompt(question, &build_context(&hits));
        let citations = format_citations(&hits, |doc_id| match self.store.get_document(doc_id) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!("Citation lookup failed for {doc_id}: {e}");
                None
            }
        });

        Ok((prompt, citations))
    }
}

/// Point payload for a chunk: its metadata plus the fields needed to rebuild
/// a hit without a store lookup and to delete by document.
fn chunk_payload(chunk: &Chunk) -> Metadata {
    let mut payload = chunk.metadata.clone();
    payload.insert("chunk_id".to_string(), json!(chunk.id));
    payload.insert("doc_id".to_string(), json!(chunk.doc_id));
    payload.insert("heading_path".to_string(), json!(chunk.heading_path));
    payload.insert("text".to_string(), Value::String(chunk.text.clone()));
    payload
}
