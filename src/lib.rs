//! # hybrid-rag
//!
//! Retrieval-augmented answering over an ingested document corpus, combining
//! a BM25 lexical index with vector similarity search.
//!
//! ## Architecture
//!
//! ```text
//!   ingest ─► title / mode / legal enrichment ─► segment ─► embed ─► vector upsert
//!                                                   │                    │
//!                                                   └──► store ◄─────────┘
//!                                                          │
//!                                                          ▼
//!                                                  BM25 rebuild (swap)
//!
//!   query ─┬─► embed ─► vector search ─┐
//!          │                           ├─► RRF fusion ─► hydrate ─► rerank ─► hits
//!          └─► BM25 search ────────────┘
//!
//!   chat  ─► hits ─► prompt ─► generation stream ─► relay (keep-alive, cancel) ─► SSE
//! ```
//!
//! Either retrieval path may fail on its own; the query only fails when both do.
//!
//! ## Module Overview
//!
//! - [`config`] - Environment-based configuration with defaults and validation
//! - [`models`] - Documents, chunks, retrieval hits and request/response types
//! - [`chunking`] - Heading-aware segmentation (general and structured/legal)
//! - [`enrich`] - Display-title backfill and legal validity metadata
//! - [`search::bm25`] - In-memory BM25 index powered by tantivy, rebuilt wholesale
//! - [`search::vector`] - Vector backend trait, dimension policy and in-memory store
//! - [`search::qdrant`] - Qdrant REST adapter
//! - [`search::hybrid`] - Reciprocal Rank Fusion
//! - [`llm`] - Embedding, generation and cross-encoder reranking clients
//! - [`relay`] - Keep-alive, cancellable token relay for streamed answers
//! - [`store`] - Document/chunk store with atomic JSON snapshots
//! - [`prompt`] - Context blocks, citations and the answer prompt
//! - [`engine`] - Ingestion, deletion, retrieval and chat orchestration
//! - [`api`] - Axum HTTP handlers
//! - [`state`] - Shared application state

pub mod api;
pub mod chunking;
pub mod config;
pub mod engine;
pub mod enrich;
pub mod error;
pub mod llm;
pub mod models;
pub mod prompt;
pub mod relay;
pub mod search;
pub mod state;
pub mod store;
