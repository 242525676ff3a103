use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::Metadata;

/// Conjunction of `key == value` clauses matched against point payloads.
pub type MetadataFilter = Metadata;

#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub chunk_id: String,
    pub score: f32,
    pub payload: Metadata,
}

/// What `ensure_dimension` had to do to make the collection usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimensionCheck {
    Created,
    Matched,
    Recreated,
}

/// Reaction to a collection whose width differs from the embedder's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimensionPolicy {
    /// Drop the collection and create it at the new width. Existing vectors are lost.
    Recreate,
    Fail,
}

impl DimensionPolicy {
    pub fn from_flag(recreate_on_mismatch: bool) -> Self {
        if recreate_on_mismatch {
            DimensionPolicy::Recreate
        } else {
            DimensionPolicy::Fail
        }
    }
}

/// Storage of chunk embeddings with payloads, searchable by similarity.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Make sure the collection exists with width `expected`.
    async fn ensure_dimension(&self, expected: usize) -> Result<DimensionCheck>;

    /// Insert or replace points. The three slices are parallel.
    async fn upsert(&self, ids: &[String], vectors: &[Vec<f32>], payloads: &[Metadata])
        -> Result<()>;

    /// Nearest neighbours of `vector`, best first.
    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorHit>>;

    /// Remove every point whose payload `doc_id` equals `doc_id`.
    async fn delete_by_document(&self, doc_id: &str) -> Result<()>;
}

pub(crate) fn check_parallel(ids: usize, vectors: usize, payloads: usize) -> Result<()> {
    if ids != vectors || ids != payloads {
        return Err(Error::InvalidInput(format!(
            "upsert needs parallel slices, got {ids} ids, {vectors} vectors, {payloads} payloads"
        )));
    }
    Ok(())
}

/// True when every filter clause equals the payload value under the same key.
/// Null clauses are ignored.
pub fn payload_matches(payload: &Metadata, filter: Option<&MetadataFilter>) -> bool {
    filter.map_or(true, |f| {
        f.iter()
            .filter(|(_, v)| !v.is_null())
            .all(|(k, v)| payload.get(k) == Some(v))
    })
}

/// Chunk id of a point: payload `chunk_id` first, then the point id itself.
pub fn resolve_chunk_id(payload: &Metadata, point_id: &Value) -> Option<String> {
    if let Some(id) = payload.get("chunk_id").and_then(Value::as_str) {
        if !id.is_empty() {
            return Some(id.to_string());
        }
    }
    match point_id {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone)]
struct VectorEntry {
    id: String,
    embedding: Vec<f32>,
    payload: Metadata,
}

#[derive(Debug, Default)]
struct Collection {
    dim: Option<usize>,
    entries: Vec<VectorEntry>,
}

/// In-process vector store with cosine similarity search.
pub struct MemoryVectorStore {
    collection: RwLock<Collection>,
    policy: DimensionPolicy,
    name: String,
}

impl MemoryVectorStore {
    pub fn new(name: impl Into<String>, policy: DimensionPolicy) -> Self {
        Self {
            collection: RwLock::new(Collection::default()),
            policy,
            name: name.into(),
        }
    }

    pub fn entry_count(&self) -> usize {
        self.collection.read().entries.len()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.collection.read().dim
    }
}

#[async_trait]
impl VectorBackend for MemoryVectorStore {
    async fn ensure_dimension(&self, expected: usize) -> Result<DimensionCheck> {
        let mut collection = self.collection.write();
        match collection.dim {
            None => {
                collection.dim = Some(expected);
                Ok(DimensionCheck::Created)
            }
            Some(actual) if actual == expected => Ok(DimensionCheck::Matched),
            Some(actual) => match self.policy {
                DimensionPolicy::Recreate => {
                    tracing::warn!(
                        "Recreating vector collection '{}' (dim {} -> {})",
                        self.name,
                        actual,
                        expected
                    );
                    collection.entries.clear();
                    collection.dim = Some(expected);
                    Ok(DimensionCheck::Recreated)
                }
                DimensionPolicy::Fail => Err(Error::DimensionMismatch {
                    collection: self.name.clone(),
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

        let mut collection = self.collection.write();
        if let Some(dim) = collection.dim {
            if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
                return Err(Error::InvalidInput(format!(
                    "vector of width {} does not fit collection '{}' (dim {})",
                    bad.len(),
                    self.name,
                    dim
                )));
            }
        }

        for ((id, embedding), payload) in ids.iter().zip(vectors).zip(payloads) {
            let entry = VectorEntry {
                id: id.clone(),
                embedding: embedding.clone(),
                payload: payload.clone(),
            };
            match collection.entries.iter_mut().find(|e| &e.id == id) {
                Some(existing) => *existing = entry,
                None => collection.entries.push(entry),
            }
        }
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorHit>> {
        let collection = self.collection.read();

        let mut scored: Vec<(f32, &VectorEntry)> = collection
            .entries
            .iter()
            .filter(|e| payload_matches(&e.payload, filter))
            .map(|e| (cosine_similarity(vector, &e.embedding), e))
            .collect();

        // Stable sort keeps insertion order among equal scores
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .filter_map(|(score, e)| {
                let chunk_id = resolve_chunk_id(&e.payload, &Value::String(e.id.clone()))?;
                Some(VectorHit {
                    chunk_id,
                    score,
                    payload: e.payload.clone(),
                })
            })
            .collect())
    }

    async fn delete_by_document(&self, doc_id: &str) -> Result<()> {
        let mut collection = self.collection.write();
        collection
            .entries
            .retain(|e| e.payload.get("doc_id").and_then(Value::as_str) != Some(doc_id));
        Ok(())
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(chunk_id: &str, doc_id: &str) -> Metadata {
        let mut m = Metadata::new();
        m.insert("chunk_id".into(), json!(chunk_id));
        m.insert("doc_id".into(), json!(doc_id));
        m
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_resolve_chunk_id_prefers_payload() {
        let p = payload("from-payload", "d");
        assert_eq!(
            resolve_chunk_id(&p, &json!("point")).as_deref(),
            Some("from-payload")
        );
        let empty = Metadata::new();
        assert_eq!(resolve_chunk_id(&empty, &json!("point")).as_deref(), Some("point"));
        assert_eq!(resolve_chunk_id(&empty, &json!(42)).as_deref(), Some("42"));
        assert_eq!(resolve_chunk_id(&empty, &json!(null)), None);
    }

    #[test]
    fn test_payload_filter_is_conjunction() {
        let mut p = payload("c", "d1");
        p.insert("lang".into(), json!("vi"));

        let mut f = Metadata::new();
        f.insert("doc_id".into(), json!("d1"));
        assert!(payload_matches(&p, Some(&f)));

        f.insert("lang".into(), json!("en"));
        assert!(!payload_matches(&p, Some(&f)));
        assert!(payload_matches(&p, None));

        f.insert("lang".into(), Value::Null);
        assert!(payload_matches(&p, Some(&f)));
    }

    #[tokio::test]
    async fn test_dimension_created_then_matched() {
        let store = MemoryVectorStore::new("chunks", DimensionPolicy::Fail);
        assert_eq!(store.ensure_dimension(3).await.unwrap(), DimensionCheck::Created);
        assert_eq!(store.ensure_dimension(3).await.unwrap(), DimensionCheck::Matched);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_fail_policy() {
        let store = MemoryVectorStore::new("chunks", DimensionPolicy::Fail);
        store.ensure_dimension(768).await.unwrap();
        let err = store.ensure_dimension(384).await.unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch { expected: 384, actual: 768, .. }
        ));
    }

    #[tokio::test]
    async fn test_dimension_mismatch_recreate_policy_drops_points() {
        let store = MemoryVectorStore::new("chunks", DimensionPolicy::Recreate);
        store.ensure_dimension(2).await.unwrap();
        store
            .upsert(&["c1".into()], &[vec![1.0, 0.0]], &[payload("c1", "d")])
            .await
            .unwrap();

        assert_eq!(store.ensure_dimension(3).await.unwrap(), DimensionCheck::Recreated);
        assert_eq!(store.entry_count(), 0);
        assert_eq!(store.dimension(), Some(3));
    }

    #[tokio::test]
    async fn test_search_ranks_and_filters() {
        let store = MemoryVectorStore::new("chunks", DimensionPolicy::Fail);
        store.ensure_dimension(2).await.unwrap();
        store
            .upsert(
                &["a".into(), "b".into(), "c".into()],
                &[vec![1.0, 0.0], vec![0.7, 0.7], vec![0.0, 1.0]],
                &[payload("a", "d1"), payload("b", "d1"), payload("c", "d2")],
            )
            .await
            .unwrap();

        let hits = store.search(&[1.0, 0.1], 2, None).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let mut f = Metadata::new();
        f.insert("doc_id".into(), json!("d2"));
        let hits = store.search(&[1.0, 0.0], 10, Some(&f)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "c");
    }

    #[tokio::test]
    async fn test_upsert_replaces_and_validates() {
        let store = MemoryVectorStore::new("chunks", DimensionPolicy::Fail);
        store.ensure_dimension(2).await.unwrap();
        store
            .upsert(&["a".into()], &[vec![1.0, 0.0]], &[payload("a", "d")])
            .await
            .unwrap();
        store
            .upsert(&["a".into()], &[vec![0.0, 1.0]], &[payload("a", "d")])
            .await
            .unwrap();
        assert_eq!(store.entry_count(), 1);

        let err = store
            .upsert(&["x".into()], &[vec![1.0, 0.0]], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let err = store
            .upsert(&["x".into()], &[vec![1.0]], &[payload("x", "d")])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_delete_by_document() {
        let store = MemoryVectorStore::new("chunks", DimensionPolicy::Fail);
        store.ensure_dimension(1).await.unwrap();
        store
            .upsert(
                &["a".into(), "b".into()],
                &[vec![1.0], vec![1.0]],
                &[payload("a", "keep"), payload("b", "drop")],
            )
            .await
            .unwrap();

        store.delete_by_document("drop").await.unwrap();
        store.delete_by_document("missing").await.unwrap();
        let hits = store.search(&[1.0], 10, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "a");
    }
}
