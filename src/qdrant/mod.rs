//! Vector store (Qdrant) integration.

pub mod client;
pub mod filters;
pub mod payload;
pub mod types;

pub use client::QdrantService;
pub use filters::build_search_filter;
pub use types::{IndexSummary, QdrantError, ScoredPoint, SearchFilterArgs, UpsertPoint};
