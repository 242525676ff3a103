pub mod cross_encoder;
pub mod embeddings;
pub mod generate;
pub mod rerank;

pub use cross_encoder::CrossEncoderReranker;
pub use embeddings::{Embedder, HttpEmbedder};
pub use generate::{Generator, HttpGenerator, TokenStream};
pub use rerank::{build_reranker, DisabledReranker, Reranker};
