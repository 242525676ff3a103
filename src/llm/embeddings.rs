use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::{Error, Result};

/// Maximum bytes to send per text to the embedding API.
/// nomic-embed-text has an 8 192-token context and dense text can hit
/// ~2.3 tokens per byte, so 3 000 stays under the limit. Ollama's own
/// `truncate: true` still returns 400 for some oversized inputs.
const MAX_EMBED_BYTES: usize = 3_000;

const EMBED_TIMEOUT: Duration = Duration::from_secs(120);
const OLLAMA_BATCH: usize = 32;
const OPENAI_BATCH: usize = 64;

/// Turns texts into fixed-width vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// One vector per input, in input order, all of the same width.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::InvalidInput("embedder returned no vector".to_string()))
    }
}

/// Truncate `text` to at most `MAX_EMBED_BYTES`, splitting on a UTF-8 char boundary.
fn truncate_for_embedding(text: &str) -> &str {
    if text.len() <= MAX_EMBED_BYTES {
        return text;
    }
    let mut end = MAX_EMBED_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Check that the backend answered with one equal-width vector per input.
pub fn validate_embeddings(inputs: usize, vectors: &[Vec<f32>]) -> Result<()> {
    if vectors.len() != inputs {
        return Err(Error::InvalidInput(format!(
            "embedder returned {} vectors for {} inputs",
            vectors.len(),
            inputs
        )));
    }
    if let Some(first) = vectors.first() {
        if first.is_empty() {
            return Err(Error::InvalidInput("embedder returned empty vectors".to_string()));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != first.len()) {
            return Err(Error::InvalidInput(format!(
                "embedder returned mixed widths ({} and {})",
                first.len(),
                bad.len()
            )));
        }
    }
    Ok(())
}

/// A model answering with a width other than `LLM_EMBEDDING_DIM` is misconfigured.
pub fn check_width(expected: usize, vectors: &[Vec<f32>]) -> Result<()> {
    match vectors.first() {
        Some(first) if first.len() != expected => Err(Error::Configuration(format!(
            "embedding model returned {}-wide vectors but LLM_EMBEDDING_DIM is {expected}",
            first.len()
        ))),
        _ => Ok(()),
    }
}

/// Embeddings over Ollama (`/api/embed`) or an OpenAI-compatible API (`/v1/embeddings`).
pub struct HttpEmbedder {
    client: reqwest::Client,
    config: LlmConfig,
}

impl HttpEmbedder {
    pub fn new(client: reqwest::Client, config: LlmConfig) -> Result<Self> {
        match config.provider.as_str() {
            "ollama" | "openai" => Ok(Self { client, config }),
            other => Err(Error::Configuration(format!("Unknown LLM provider: {other}"))),
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let truncated: Vec<String> = texts
            .iter()
            .map(|t| truncate_for_embedding(t).to_string())
            .collect();

        let vectors = match self.config.provider.as_str() {
            "ollama" => embed_ollama(&self.client, &self.config, &truncated).await?,
            "openai" => embed_openai(&self.client, &self.config, &truncated).await?,
            other => {
                return Err(Error::Configuration(format!("Unknown LLM provider: {other}")))
            }
        };

        validate_embeddings(texts.len(), &vectors)?;
        check_width(self.config.embedding_dim, &vectors)?;
        Ok(vectors)
    }
}

async fn post_json<Req: Serialize, Resp: serde::de::DeserializeOwned>(
    request: reqwest::RequestBuilder,
    body: &Req,
    api: &str,
) -> Result<Resp> {
    let resp = request
        .timeout(EMBED_TIMEOUT)
        .json(body)
        .send()
        .await
        .map_err(|e| Error::backend("embedding", format!("Failed to call {api}: {e}")))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        return Err(Error::backend(
            "embedding",
            format!("{api} returned {status}: {text}"),
        ));
    }

    resp.json()
        .await
        .map_err(|e| Error::backend("embedding", format!("Failed to parse {api} response: {e}")))
}

// ─── Ollama ──────────────────────────────────────────────

#[derive(Serialize)]
struct OllamaEmbedRequest {
    model: String,
    input: Vec<String>,
    truncate: bool,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

async fn embed_ollama(
    client: &reqwest::Client,
    config: &LlmConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let url = format!("{}/api/embed", config.base_url.trim_end_matches('/'));
    let mut all_embeddings = Vec::with_capacity(texts.len());

    for batch in texts.chunks(OLLAMA_BATCH) {
        let req = OllamaEmbedRequest {
            model: config.embedding_model.clone(),
            input: batch.to_vec(),
            truncate: true,
        };
        let body: OllamaEmbedResponse =
            post_json(client.post(&url), &req, "Ollama embed API").await?;
        all_embeddings.extend(body.embeddings);
    }

    Ok(all_embeddings)
}

// ─── OpenAI-compatible ───────────────────────────────────

#[derive(Serialize)]
struct OpenAiEmbedRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedData>,
}

#[derive(Deserialize)]
struct OpenAiEmbedData {
    embedding: Vec<f32>,
}

async fn embed_openai(
    client: &reqwest::Client,
    config: &LlmConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let url = format!("{}/v1/embeddings", config.base_url.trim_end_matches('/'));
    let api_key = config.api_key.as_deref().unwrap_or_default();
    let mut all_embeddings = Vec::with_capacity(texts.len());

    for batch in texts.chunks(OPENAI_BATCH) {
        let req = OpenAiEmbedRequest {
            model: config.embedding_model.clone(),
            input: batch.to_vec(),
        };
        let body: OpenAiEmbedResponse = post_json(
            client
                .post(&url)
                .header("Authorization", format!("Bearer {api_key}")),
            &req,
            "OpenAI embed API",
        )
        .await?;
        all_embeddings.extend(body.data.into_iter().map(|d| d.embedding));
    }

    Ok(all_embeddings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_text_untouched() {
        assert_eq!(truncate_for_embedding("hello"), "hello");
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        // 'é' is two bytes, so the limit lands mid-character
        let text = format!("a{}", "é".repeat(2_000));
        let out = truncate_for_embedding(&text);
        assert!(out.len() <= MAX_EMBED_BYTES);
        assert_eq!(out.len(), MAX_EMBED_BYTES - 1);
    }

    #[test]
    fn test_validate_count_mismatch() {
        let err = validate_embeddings(2, &[vec![1.0]]).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_validate_mixed_widths() {
        let err = validate_embeddings(2, &[vec![1.0, 2.0], vec![1.0]]).unwrap_err();
        assert!(err.to_string().contains("mixed widths"));
        assert!(validate_embeddings(2, &[vec![1.0, 2.0], vec![3.0, 4.0]]).is_ok());
    }

    #[test]
    fn test_width_must_match_configured_dim() {
        let err = check_width(768, &[vec![0.0; 384]]).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("384"));
        assert!(check_width(3, &[vec![1.0, 2.0, 3.0]]).is_ok());
        assert!(check_width(3, &[]).is_ok());
    }

    #[test]
    fn test_unknown_provider_is_configuration_error() {
        let config = LlmConfig {
            provider: "mystery".into(),
            ..LlmConfig::default()
        };
        let err = HttpEmbedder::new(reqwest::Client::new(), config).err().unwrap();
        assert!(err.is_configuration());
    }
}
