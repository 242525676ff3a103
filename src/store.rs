use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::models::{Chunk, Document};

/// Durable home of documents and their chunks.
pub trait DocumentStore: Send + Sync {
    /// Insert or replace a document by id.
    fn save_document(&self, doc: &Document) -> Result<()>;

    fn get_document(&self, id: &str) -> Result<Option<Document>>;

    /// All documents in insertion order.
    fn list_documents(&self) -> Result<Vec<Document>>;

    /// Insert or replace chunks by id.
    fn save_chunks(&self, chunks: &[Chunk]) -> Result<()>;

    fn get_chunk(&self, id: &str) -> Result<Option<Chunk>>;

    /// All chunks in insertion order.
    fn list_chunks(&self) -> Result<Vec<Chunk>>;

    /// Remove a document and every chunk it owns. Returns whether it existed.
    fn delete_document_cascade(&self, doc_id: &str) -> Result<bool>;

    fn count_chunks(&self, doc_id: &str) -> Result<usize> {
        Ok(self
            .list_chunks()?
            .iter()
            .filter(|c| c.doc_id == doc_id)
            .count())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreData {
    documents: Vec<Document>,
    chunks: Vec<Chunk>,
    /// chunk id -> position in `chunks`
    #[serde(skip)]
    chunk_index: HashMap<String, usize>,
}

impl StoreData {
    fn reindex(&mut self) {
        self.chunk_index = self
            .chunks
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id.clone(), i))
            .collect();
    }
}

/// In-memory store, optionally snapshotted to a JSON file after every write.
pub struct MemoryStore {
    data: RwLock<StoreData>,
    persist_path: Option<PathBuf>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl MemoryStore {
    pub fn in_memory() -> Self {
        Self {
            data: RwLock::new(StoreData::default()),
            persist_path: None,
        }
    }

    /// Open a store backed by `path`, loading the existing snapshot if any.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut data = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            serde_json::from_str::<StoreData>(&raw)?
        } else {
            StoreData::default()
        };
        data.reindex();

        tracing::info!(
            "Loaded {} documents and {} chunks from {}",
            data.documents.len(),
            data.chunks.len(),
            path.display()
        );

        Ok(Self {
            data: RwLock::new(data),
            persist_path: Some(path.to_path_buf()),
        })
    }

    /// Write the snapshot (atomic write via temp file + rename).
    fn persist(&self, data: &StoreData) -> Result<()> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        let json = serde_json::to_string(data)?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, path)
            .map_err(|e| Error::Store(format!("failed to replace {}: {e}", path.display())))
    }
}

impl DocumentStore for MemoryStore {
    fn save_document(&self, doc: &Document) -> Result<()> {
        let mut data = self.data.write();
        match data.documents.iter_mut().find(|d| d.id == doc.id) {
            Some(existing) => *existing = doc.clone(),
            None => data.documents.push(doc.clone()),
        }
        self.persist(&data)
    }

    fn get_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.data.read().documents.iter().find(|d| d.id == id).cloned())
    }

    fn list_documents(&self) -> Result<Vec<Document>> {
        Ok(self.data.read().documents.clone())
    }

    fn save_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let mut data = self.data.write();
        for chunk in chunks {
            match data.chunk_index.get(&chunk.id).copied() {
                Some(pos) => data.chunks[pos] = chunk.clone(),
                None => {
                    let pos = data.chunks.len();
                    data.chunks.push(chunk.clone());
                    data.chunk_index.insert(chunk.id.clone(), pos);
                }
            }
        }
        self.persist(&data)
    }

    fn get_chunk(&self, id: &str) -> Result<Option<Chunk>> {
        let data = self.data.read();
        Ok(data
            .chunk_index
            .get(id)
            .and_then(|&pos| data.chunks.get(pos))
            .cloned())
    }

    fn list_chunks(&self) -> Result<Vec<Chunk>> {
        Ok(self.data.read().chunks.clone())
    }

    fn delete_document_cascade(&self, doc_id: &str) -> Result<bool> {
        let mut data = self.data.write();
        let before = data.documents.len();
        data.documents.retain(|d| d.id != doc_id);
        let existed = data.documents.len() != before;

        let chunks_before = data.chunks.len();
        data.chunks.retain(|c| c.doc_id != doc_id);
        if data.chunks.len() != chunks_before {
            data.reindex();
        }

        if existed || data.chunks.len() != chunks_before {
            self.persist(&data)?;
        }
        Ok(existed)
    }

    fn count_chunks(&self, doc_id: &str) -> Result<usize> {
        Ok(self
            .data
            .read()
            .chunks
            .iter()
            .filter(|c| c.doc_id == doc_id)
            .count())
    }
}
