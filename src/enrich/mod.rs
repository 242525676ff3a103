//! Metadata enrichment applied during ingestion.

pub mod legal;
pub mod title;

pub use legal::{enrich_legal_metadata, validity_score};
pub use title::{best_title, is_generic_title};
