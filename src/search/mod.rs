pub mod bm25;
pub mod hybrid;
pub mod qdrant;
pub mod vector;

pub use bm25::{Bm25Index, LexicalHit, LexicalIndex};
pub use hybrid::{fuse, fuse_scored, DEFAULT_RRF_K};
pub use qdrant::QdrantBackend;
pub use vector::{
    DimensionCheck, DimensionPolicy, MemoryVectorStore, MetadataFilter, VectorBackend, VectorHit,
};
