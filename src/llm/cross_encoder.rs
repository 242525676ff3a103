//! Cross-encoder reranker via OpenAI-compatible `/v1/rerank` endpoint.
//!
//! Sends a single batch request with all query-document pairs. Typical
//! latency is 50-100ms for a few dozen candidates.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::rerank::Reranker;
use crate::config::RerankerConfig;
use crate::error::{Error, Result};
use crate::models::RetrievalHit;

pub struct CrossEncoderReranker {
    client: reqwest::Client,
    url: String,
    model: String,
    timeout: Duration,
}

impl CrossEncoderReranker {
    pub fn new(client: reqwest::Client, config: &RerankerConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| {
                Error::Configuration(
                    "RERANK_BACKEND=cross_encoder but RERANKER_BASE_URL is not set".to_string(),
                )
            })?;

        Ok(Self {
            client,
            url: format!("{}/v1/rerank", base_url.trim_end_matches('/')),
            model: config.model.clone().unwrap_or_else(|| "default".to_string()),
            timeout: Duration::from_secs(config.timeout_secs.min(30)),
        })
    }

    /// Raw scores per candidate index, sigmoid-normalized.
    async fn score(&self, query: &str, documents: Vec<String>) -> Result<Vec<Option<f32>>> {
        let count = documents.len();
        let req_body = RerankRequest {
            model: self.model.clone(),
            query: query.to_string(),
            documents,
            top_n: count,
        };

        let resp = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&req_body)
            .send()
            .await
            .map_err(|e| {
                Error::Configuration(format!("Reranker endpoint {} unreachable: {e}", self.url))
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Configuration(format!(
                "Reranker returned {status}: {body}"
            )));
        }

        let body: RerankResponse = resp
            .json()
            .await
            .map_err(|e| Error::Configuration(format!("Failed to parse reranker response: {e}")))?;

        let mut scores = vec![None; count];
        for r in body.results {
            if let Some(slot) = scores.get_mut(r.index) {
                *slot = Some(sigmoid(r.relevance_score));
            }
        }
        Ok(scores)
    }
}

#[async_trait]
impl Reranker for CrossEncoderReranker {
    async fn rerank(
        &self,
        query: &str,
        hits: Vec<RetrievalHit>,
        top_k: usize,
    ) -> Result<Vec<RetrievalHit>> {
        if hits.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let documents: Vec<String> = hits.iter().map(|h| h.chunk.text.clone()).collect();
        let scores = self.score(query, documents).await?;
        Ok(apply_scores(hits, &scores, top_k))
    }

    fn is_enabled(&self) -> bool {
        true
    }
}

/// Attach scores and sort descending. The sort is stable, so equal scores keep
/// the incoming (fused) order; unscored hits go last.
pub(crate) fn apply_scores(
    mut hits: Vec<RetrievalHit>,
    scores: &[Option<f32>],
    top_k: usize,
) -> Vec<RetrievalHit> {
    for (hit, score) in hits.iter_mut().zip(scores) {
        hit.rerank_score = *score;
    }

    hits.sort_by(|a, b| {
        let a = a.rerank_score.unwrap_or(f32::NEG_INFINITY);
        let b = b.rerank_score.unwrap_or(f32::NEG_INFINITY);
        b.partial_cmp(&a).unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(top_k);
    hits
}

/// Sigmoid normalization: maps raw logits to 0-1 range.
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

// ─── Request/Response types ────────────────────────────

#[derive(Serialize)]
struct RerankRequest {
    model: String,
    query: String,
    documents: Vec<String>,
    top_n: usize,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankResultRaw>,
}

#[derive(Deserialize)]
struct RerankResultRaw {
    index: usize,
    relevance_score: f32,
}
