use async_trait::async_trait;
use std::sync::Arc;

use super::cross_encoder::CrossEncoderReranker;
use crate::config::{RerankBackend, RerankerConfig};
use crate::error::Result;
use crate::models::RetrievalHit;

/// Reorders fused candidates by query relevance.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Return at most `top_k` hits, best first.
    async fn rerank(
        &self,
        query: &str,
        hits: Vec<RetrievalHit>,
        top_k: usize,
    ) -> Result<Vec<RetrievalHit>>;

    fn is_enabled(&self) -> bool;
}

/// Pass-through: keeps fused order and truncates.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledReranker;

#[async_trait]
impl Reranker for DisabledReranker {
    async fn rerank(
        &self,
        _query: &str,
        mut hits: Vec<RetrievalHit>,
        top_k: usize,
    ) -> Result<Vec<RetrievalHit>> {
        hits.truncate(top_k);
        Ok(hits)
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// Pick the reranker named by `config.backend`.
///
/// An enabled backend without an endpoint is a configuration error, never a
/// silent downgrade to the pass-through.
pub fn build_reranker(
    config: &RerankerConfig,
    client: reqwest::Client,
) -> Result<Arc<dyn Reranker>> {
    match config.backend {
        RerankBackend::None => Ok(Arc::new(DisabledReranker)),
        RerankBackend::CrossEncoder => {
            let reranker = CrossEncoderReranker::new(client, config)?;
            tracing::info!("Cross-encoder reranker enabled");
            Ok(Arc::new(reranker))
        }
    }
}
