use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where the document store snapshot is kept
    pub data_dir: PathBuf,
    /// Server bind address
    pub bind_addr: String,
    /// Embedding / generation provider configuration
    pub llm: LlmConfig,
    /// Vector backend configuration
    pub vector: VectorConfig,
    /// Cross-encoder reranker configuration
    pub reranker: RerankerConfig,
    /// Top-k and fusion knobs
    pub retrieval: RetrievalConfig,
    /// Window sizes for the segmenter
    pub segment: SegmentConfig,
    /// Keep-alive relay settings
    pub stream: StreamConfig,
    /// Maximum concurrent streaming chats
    pub chat_max_concurrent: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "ollama" or "openai"
    pub provider: String,
    /// Base URL for the LLM API
    pub base_url: String,
    /// Model name for generation
    pub chat_model: String,
    /// Model name for embeddings
    pub embedding_model: String,
    /// API key (only needed for cloud providers)
    pub api_key: Option<String>,
    /// Width the embedding model must answer with
    pub embedding_dim: usize,
    /// Ollama generation options
    pub num_predict: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub keep_alive: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorBackendKind {
    Qdrant,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorConfig {
    pub backend: VectorBackendKind,
    /// Qdrant REST base URL
    pub url: String,
    pub collection: String,
    /// Drop and recreate the collection when its width differs from the embedder's
    pub recreate_on_dim_mismatch: bool,
    /// Timeout for query-time calls (seconds)
    pub read_timeout_secs: u64,
    /// Timeout for ingestion-time calls (seconds)
    pub write_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RerankBackend {
    None,
    CrossEncoder,
}

/// Configuration for the cross-encoder reranker sidecar (e.g. llama-server with a reranker model).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerConfig {
    pub backend: RerankBackend,
    /// Base URL for the reranker API (e.g. "http://127.0.0.1:8082").
    pub base_url: Option<String>,
    /// Model name to send in the rerank request.
    pub model: Option<String>,
    /// Request timeout in seconds (capped at 30).
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub topk_vector: usize,
    pub topk_bm25: usize,
    pub topk_rerank: usize,
    /// RRF smoothing constant
    pub rrf_k: f32,
    /// Deadline for query embedding plus vector search
    pub vector_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentConfig {
    pub general_window: usize,
    pub general_overlap: usize,
    pub structured_window: usize,
    pub structured_overlap: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub keepalive_secs: u64,
    pub queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            bind_addr: "127.0.0.1:8000".to_string(),
            llm: LlmConfig::default(),
            vector: VectorConfig::default(),
            reranker: RerankerConfig::default(),
            retrieval: RetrievalConfig::default(),
            segment: SegmentConfig::default(),
            stream: StreamConfig::default(),
            chat_max_concurrent: 3,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            base_url: "http://localhost:11434".to_string(),
            chat_model: "llama3.1".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            api_key: None,
            embedding_dim: 768,
            num_predict: 512,
            temperature: 0.2,
            top_p: 0.9,
            keep_alive: "30m".to_string(),
        }
    }
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            backend: VectorBackendKind::Qdrant,
            url: "http://localhost:6333".to_string(),
            collection: "rag_chunks".to_string(),
            recreate_on_dim_mismatch: true,
            read_timeout_secs: 5,
            write_timeout_secs: 20,
        }
    }
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            backend: RerankBackend::None,
            base_url: None,
            model: None,
            timeout_secs: 10,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            topk_vector: 30,
            topk_bm25: 30,
            topk_rerank: 10,
            rrf_k: 60.0,
            vector_timeout_secs: 30,
        }
    }
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            general_window: 1200,
            general_overlap: 150,
            structured_window: 1400,
            structured_overlap: 200,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            keepalive_secs: 15,
            queue_capacity: 256,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("RAG_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(addr) = std::env::var("RAG_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(v) = env_parse("CHAT_MAX_CONCURRENT") {
            config.chat_max_concurrent = v;
        }

        // LLM config
        if let Ok(provider) = std::env::var("LLM_PROVIDER") {
            config.llm.provider = provider;
        }
        if let Ok(url) = std::env::var("LLM_BASE_URL") {
            config.llm.base_url = url;
        }
        if let Ok(model) = std::env::var("LLM_CHAT_MODEL") {
            config.llm.chat_model = model;
        }
        if let Ok(model) = std::env::var("LLM_EMBEDDING_MODEL") {
            config.llm.embedding_model = model;
        }
        if let Ok(key) = std::env::var("LLM_API_KEY") {
            config.llm.api_key = Some(key);
        }
        if let Some(d) = env_parse("LLM_EMBEDDING_DIM") {
            config.llm.embedding_dim = d;
        }
        if let Some(v) = env_parse("LLM_NUM_PREDICT") {
            config.llm.num_predict = v;
        }
        if let Some(v) = env_parse("LLM_TEMPERATURE") {
            config.llm.temperature = v;
        }
        if let Some(v) = env_parse("LLM_TOP_P") {
            config.llm.top_p = v;
        }
        if let Ok(v) = std::env::var("LLM_KEEP_ALIVE") {
            config.llm.keep_alive = v;
        }

        // Vector config
        if let Ok(kind) = std::env::var("VECTOR_BACKEND") {
            match kind.to_lowercase().as_str() {
                "memory" => config.vector.backend = VectorBackendKind::Memory,
                "qdrant" => config.vector.backend = VectorBackendKind::Qdrant,
                other => tracing::warn!("Ignoring unknown VECTOR_BACKEND '{other}'"),
            }
        }
        if let Ok(url) = std::env::var("VECTOR_DB_URL") {
            config.vector.url = url;
        }
        if let Ok(name) = std::env::var("VECTOR_COLLECTION") {
            config.vector.collection = name;
        }
        if let Some(v) = env_bool("VECTOR_RECREATE_ON_DIM_MISMATCH") {
            config.vector.recreate_on_dim_mismatch = v;
        }
        if let Some(v) = env_parse("VECTOR_READ_TIMEOUT_SECS") {
            config.vector.read_timeout_secs = v;
        }
        if let Some(v) = env_parse("VECTOR_WRITE_TIMEOUT_SECS") {
            config.vector.write_timeout_secs = v;
        }

        // Reranker config
        if let Ok(backend) = std::env::var("RERANK_BACKEND") {
            match backend.to_lowercase().as_str() {
                "none" | "off" | "disabled" => config.reranker.backend = RerankBackend::None,
                "cross_encoder" | "cross-encoder" => {
                    config.reranker.backend = RerankBackend::CrossEncoder
                }
                other => tracing::warn!("Ignoring unknown RERANK_BACKEND '{other}'"),
            }
        }
        if let Ok(url) = std::env::var("RERANKER_BASE_URL") {
            config.reranker.base_url = Some(url);
        }
        if let Ok(model) = std::env::var("RERANKER_MODEL") {
            config.reranker.model = Some(model);
        }
        if let Some(v) = env_parse::<u64>("RERANKER_TIMEOUT_SECS") {
            config.reranker.timeout_secs = v.min(30); // Cap at 30s
        }

        // Retrieval knobs
        if let Some(v) = env_parse("TOPK_VECTOR") {
            config.retrieval.topk_vector = v;
        }
        if let Some(v) = env_parse("TOPK_BM25") {
            config.retrieval.topk_bm25 = v;
        }
        if let Some(v) = env_parse("TOPK_RERANK") {
            config.retrieval.topk_rerank = v;
        }
        if let Some(v) = env_parse("RRF_K") {
            config.retrieval.rrf_k = v;
        }
        if let Some(v) = env_parse("VECTOR_SEARCH_TIMEOUT_SECS") {
            config.retrieval.vector_timeout_secs = v;
        }

        // Segmenter
        if let Some(v) = env_parse("CHUNK_WINDOW") {
            config.segment.general_window = v;
        }
        if let Some(v) = env_parse("CHUNK_OVERLAP") {
            config.segment.general_overlap = v;
        }
        if let Some(v) = env_parse("LEGAL_CHUNK_WINDOW") {
            config.segment.structured_window = v;
        }
        if let Some(v) = env_parse("LEGAL_CHUNK_OVERLAP") {
            config.segment.structured_overlap = v;
        }

        // Streaming
        if let Some(v) = env_parse("STREAM_KEEPALIVE_SECS") {
            config.stream.keepalive_secs = v;
        }
        if let Some(v) = env_parse("STREAM_QUEUE_CAPACITY") {
            config.stream.queue_capacity = v;
        }

        config
    }

    /// Reject settings that would make the engine misbehave at runtime.
    pub fn validate(&self) -> Result<()> {
        let seg = &self.segment;
        if seg.general_window == 0 || seg.general_overlap >= seg.general_window {
            return Err(Error::Configuration(format!(
                "chunk overlap ({}) must be smaller than a non-zero window ({})",
                seg.general_overlap, seg.general_window
            )));
        }
        if seg.structured_window == 0 || seg.structured_overlap >= seg.structured_window {
            return Err(Error::Configuration(format!(
                "legal chunk overlap ({}) must be smaller than a non-zero window ({})",
                seg.structured_overlap, seg.structured_window
            )));
        }
        if self.llm.embedding_dim == 0 {
            return Err(Error::Configuration(
                "LLM_EMBEDDING_DIM must be greater than zero".to_string(),
            ));
        }
        if self.stream.keepalive_secs == 0 || self.stream.queue_capacity == 0 {
            return Err(Error::Configuration(
                "stream keep-alive interval and queue capacity must be non-zero".to_string(),
            ));
        }
        if self.retrieval.vector_timeout_secs == 0 {
            return Err(Error::Configuration(
                "VECTOR_SEARCH_TIMEOUT_SECS must be greater than zero".to_string(),
            ));
        }
        if self.retrieval.rrf_k <= 0.0 {
            return Err(Error::Configuration("RRF_K must be positive".to_string()));
        }
        Ok(())
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("store.json")
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .and_then(|v| match v.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.segment.general_window, 1200);
        assert_eq!(config.segment.structured_overlap, 200);
        assert_eq!(config.reranker.backend, RerankBackend::None);
        assert_eq!(config.stream.keepalive_secs, 15);
    }

    #[test]
    fn test_overlap_not_smaller_than_window_rejected() {
        let mut config = Config::default();
        config.segment.general_overlap = config.segment.general_window;
        let err = config.validate().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_zero_keepalive_rejected() {
        let mut config = Config::default();
        config.stream.keepalive_secs = 0;
        assert!(config.validate().is_err());
    }
}
