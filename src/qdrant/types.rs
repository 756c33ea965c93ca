//! Shared types used by the vector store client and helpers.

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors returned while interacting with the vector store.
#[derive(Debug, Error)]
pub enum QdrantError {
    /// Base URL failed to parse or normalize.
    #[error("Invalid Qdrant URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Qdrant responded with an unexpected status code.
    #[error("Unexpected Qdrant response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned from Qdrant.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// The vector supplied to an upsert did not match the collection's configured dimension.
    #[error("Embedding dimension mismatch: got {actual}, expected {expected}. Check SEARCH_BRIDGE_VECTOR_DIM configuration.")]
    DimensionMismatch {
        /// Dimension actually supplied.
        actual: usize,
        /// Dimension the collection was created with.
        expected: usize,
    },
}

/// A point ready for upsert, with payload fields pre-extracted for filtering.
#[derive(Debug, Clone)]
pub struct UpsertPoint {
    /// Stable point id.
    pub id: String,
    /// Dense embedding vector.
    pub vector: Vec<f32>,
    /// Chunk text stored in the payload.
    pub text: String,
    /// Canonical URL used as the fusion/dedup key.
    pub canonical_url: String,
    /// Raw URL as scraped.
    pub url: String,
    /// Host extracted from the URL.
    pub domain: String,
    /// Zero-based chunk index within the source document.
    pub chunk_index: usize,
    /// Optional page title.
    pub title: Option<String>,
    /// Optional page description.
    pub description: Option<String>,
    /// Optional language code.
    pub language: Option<String>,
    /// Optional country code.
    pub country: Option<String>,
    /// Whether the source page was scraped as mobile.
    pub is_mobile: bool,
}

/// Conjunctive filters applied to vector store searches.
#[derive(Debug, Default, Clone)]
pub struct SearchFilterArgs {
    /// Exact match constraint for the `domain` payload field.
    pub domain: Option<String>,
    /// Exact match constraint for the `language` payload field.
    pub language: Option<String>,
    /// Exact match constraint for the `country` payload field.
    pub country: Option<String>,
    /// Exact match constraint for the `is_mobile` payload field.
    pub is_mobile: Option<bool>,
}

/// Scored payload returned by a search query.
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    /// Identifier assigned to the vector.
    pub id: String,
    /// Similarity score computed by the vector store.
    pub score: f32,
    /// Optional payload associated with the vector.
    pub payload: Option<Map<String, Value>>,
}

/// Summary describing how an upsert request was applied.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexSummary {
    /// Number of new vectors inserted by the request.
    pub inserted: usize,
    /// Number of vectors updated in place.
    pub updated: usize,
}

#[derive(Deserialize)]
pub(crate) struct ListCollectionsResponse {
    pub(crate) result: ListCollectionsResult,
}

#[derive(Deserialize)]
pub(crate) struct ListCollectionsResult {
    pub(crate) collections: Vec<CollectionDescription>,
}

#[derive(Deserialize)]
pub(crate) struct CollectionDescription {
    pub(crate) name: String,
}

#[derive(Deserialize)]
pub(crate) struct CollectionInfoResponse {
    pub(crate) result: CollectionInfoResult,
}

#[derive(Deserialize)]
pub(crate) struct CollectionInfoResult {
    #[serde(default)]
    pub(crate) points_count: Option<u64>,
}

#[derive(Deserialize)]
pub(crate) struct QueryResponse {
    pub(crate) result: QueryResponseResult,
}

#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum QueryResponseResult {
    Points(Vec<QueryPoint>),
    Object {
        #[serde(default)]
        points: Vec<QueryPoint>,
    },
}

#[derive(Deserialize)]
pub(crate) struct QueryPoint {
    pub(crate) id: Value,
    pub(crate) score: f32,
    #[serde(default)]
    pub(crate) payload: Option<Map<String, Value>>,
}
