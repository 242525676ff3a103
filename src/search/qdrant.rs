//! Qdrant adapter over the REST API.
//!
//! Only the handful of endpoints the engine needs are used, which keeps the
//! adapter independent of client SDK versions.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::vector::{
    check_parallel, resolve_chunk_id, DimensionCheck, DimensionPolicy, MetadataFilter,
    VectorBackend, VectorHit,
};
use crate::config::VectorConfig;
use crate::error::{Error, Result};
use crate::models::Metadata;

const BACKEND: &str = "qdrant";

pub struct QdrantBackend {
    client: Client,
    base_url: String,
    collection: String,
    policy: DimensionPolicy,
    read_timeout: Duration,
    write_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<ScoredPoint>,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    payload: Option<Metadata>,
}

impl QdrantBackend {
    pub fn new(client: Client, config: &VectorConfig) -> Self {
        Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            policy: DimensionPolicy::from_flag(config.recreate_on_dim_mismatch),
            read_timeout: Duration::from_secs(config.read_timeout_secs),
            write_timeout: Duration::from_secs(config.write_timeout_secs),
        }
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.base_url, self.collection)
    }

    /// Width of the existing collection, `None` when it does not exist.
    async fn current_dimension(&self) -> Result<Option<usize>> {
        let resp = send(self.client.get(self.collection_url()).timeout(self.read_timeout)).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: Value = ok_json(resp).await?;
        parse_vector_size(&body).map(Some).ok_or_else(|| {
            Error::backend(
                BACKEND,
                format!(
                    "collection '{}' exists but its vector size could not be read",
                    self.collection
                ),
            )
        })
    }

    async fn create_collection(&self, dim: usize) -> Result<()> {
        let body = json!({ "vectors": { "size": dim, "distance": "Cosine" } });
        let resp = send(
            self.client
                .put(self.collection_url())
                .timeout(self.write_timeout)
                .json(&body),
        )
        .await?;
        ok_json::<Value>(resp).await?;
        tracing::info!("Created vector collection '{}' (dim {})", self.collection, dim);
        Ok(())
    }

    async fn drop_collection(&self) -> Result<()> {
        let resp = send(
            self.client
                .delete(self.collection_url())
                .timeout(self.write_timeout),
        )
        .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        ok_json::<Value>(resp).await?;
        Ok(())
    }
}

#[async_trait]
impl VectorBackend for QdrantBackend {
    async fn ensure_dimension(&self, expected: usize) -> Result<DimensionCheck> {
        match self.current_dimension().await? {
            None => {
                self.create_collection(expected).await?;
                Ok(DimensionCheck::Created)
            }
            Some(actual) if actual == expected => Ok(DimensionCheck::Matched),
            Some(actual) => match self.policy {
                DimensionPolicy::Recreate => {
                    tracing::warn!(
                        "Vector collection '{}' has dim {} but embeddings have dim {}, recreating",
                        self.collection,
                        actual,
                        expected
                    );
                    self.drop_collection().await?;
                    self.create_collection(expected).await?;
                    Ok(DimensionCheck::Recreated)
                }
                DimensionPolicy::Fail => Err(Error::DimensionMismatch {
                    collection: self.collection.clone(),
                    expected,
                    actual,
                }),
            },
        }
    }

    async fn upsert(
        &self,
        ids: &[String],
        vectors: &[Vec<f32>],
        payloads: &[Metadata],
    ) -> Result<()> {
        check_parallel(ids.len(), vectors.len(), payloads.len())?;
        if ids.is_empty() {
            return Ok(());
        }

        let points: Vec<Value> = ids
            .iter()
            .zip(vectors)
            .zip(payloads)
            .map(|((id, vector), payload)| json!({ "id": id, "vector": vector, "payload": payload }))
            .collect();

        let resp = send(
            self.client
                .put(format!("{}/points?wait=true", self.collection_url()))
                .timeout(self.write_timeout)
                .json(&json!({ "points": points })),
        )
        .await?;
        ok_json::<Value>(resp).await?;
        tracing::debug!("Upserted {} points into '{}'", ids.len(), self.collection);
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorHit>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let mut body = json!({
            "vector": vector,
            "limit": top_k,
            "with_payload": true,
        });
        if let Some(f) = filter.and_then(filter_to_qdrant) {
            body["filter"] = f;
        }

        let resp = send(
            self.client
                .post(format!("{}/points/search", self.collection_url()))
                .timeout(self.read_timeout)
                .json(&body),
        )
        .await?;
        let parsed: SearchResponse = ok_json(resp).await?;

        Ok(parsed
            .result
            .into_iter()
            .filter_map(|point| {
                let payload = point.payload.unwrap_or_default();
                let chunk_id = resolve_chunk_id(&payload, &point.id)?;
                Some(VectorHit {
                    chunk_id,
                    score: point.score,
                    payload,
                })
            })
            .collect())
    }

    async fn delete_by_document(&self, doc_id: &str) -> Result<()> {
        let body = json!({
            "filter": { "must": [{ "key": "doc_id", "match": { "value": doc_id } }] }
        });
        let resp = send(
            self.client
                .post(format!("{}/points/delete?wait=true", self.collection_url()))
                .timeout(self.write_timeout)
                .json(&body),
        )
        .await?;
        // Nothing to delete from a collection that was never created
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        ok_json::<Value>(resp).await?;
        Ok(())
    }
}

async fn send(request: RequestBuilder) -> Result<Response> {
    request
        .send()
        .await
        .map_err(|e| Error::backend(BACKEND, format!("request failed: {e}")))
}

async fn ok_json<T: serde::de::DeserializeOwned>(resp: Response) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(Error::backend(BACKEND, format!("HTTP {status}: {text}")));
    }
    resp.json()
        .await
        .map_err(|e| Error::backend(BACKEND, format!("unreadable response: {e}")))
}

/// Collection width from a `GET /collections/{name}` body. Accepts the plain
/// `{"size": n}` shape and the named `{"default": {"size": n}}` shape.
fn parse_vector_size(body: &Value) -> Option<usize> {
    let vectors = body.pointer("/result/config/params/vectors")?;
    vectors
        .get("size")
        .and_then(Value::as_u64)
        .or_else(|| vectors.pointer("/default/size").and_then(Value::as_u64))
        .map(|n| n as usize)
}

/// Equality clauses as a Qdrant `must` filter. Null values are ignored.
fn filter_to_qdrant(filter: &MetadataFilter) -> Option<Value> {
    let must: Vec<Value> = filter
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| json!({ "key": k, "match": { "value": v } }))
        .collect();
    if must.is_empty() {
        None
    } else {
        Some(json!({ "must": must }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_vector_size() {
        let body = json!({"result": {"config": {"params": {"vectors": {"size": 768, "distance": "Cosine"}}}}});
        assert_eq!(parse_vector_size(&body), Some(768));
    }

    #[test]
    fn test_parse_named_vector_size() {
        let body = json!({"result": {"config": {"params": {"vectors": {"default": {"size": 384}}}}}});
        assert_eq!(parse_vector_size(&body), Some(384));
    }

    #[test]
    fn test_parse_missing_vector_size() {
        assert_eq!(parse_vector_size(&json!({"result": {}})), None);
    }

    #[test]
    fn test_filter_skips_nulls() {
        let mut f = MetadataFilter::new();
        f.insert("doc_id".into(), json!("d1"));
        f.insert("lang".into(), Value::Null);
        let q = filter_to_qdrant(&f).unwrap();
        assert_eq!(q["must"].as_array().unwrap().len(), 1);
        assert_eq!(q["must"][0]["match"]["value"], "d1");

        let mut only_null = MetadataFilter::new();
        only_null.insert("x".into(), Value::Null);
        assert!(filter_to_qdrant(&only_null).is_none());
    }
}
