//! Aggregate stats surfaced via `GET /api/stats`.
//!
//! Unlike an in-process counter, these numbers are derived on demand from
//! the services themselves (content store row count, Qdrant point count,
//! BM25 corpus size) so they stay correct across restarts and multiple
//! processes sharing the same backing stores.

use serde::Serialize;

use crate::content_store::ContentStoreError;
use crate::service_pool::ServicePool;

/// Snapshot of indexing activity returned by the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    /// Number of documents recorded in the content store.
    pub total_documents: u64,
    /// Number of chunks currently held in the BM25 index (one entry per document, not per chunk).
    pub total_chunks: u64,
    /// Number of points currently stored in the Qdrant collection.
    pub qdrant_points: u64,
    /// Number of documents currently held in the BM25 index.
    pub bm25_documents: u64,
    /// Name of the Qdrant collection the stats were read from.
    pub collection_name: String,
}

/// Errors that can occur while gathering a stats snapshot.
#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    /// The content store query failed.
    #[error("content store error: {0}")]
    ContentStore(#[from] ContentStoreError),
}

/// Gather a fresh stats snapshot from the content store, Qdrant, and BM25.
pub async fn gather_stats(pool: &ServicePool) -> Result<StatsSnapshot, StatsError> {
    let config = crate::config::get_config();
    let total_documents = pool.content_store.count_documents().await?;
    let qdrant_points = pool.qdrant.count_points(&config.qdrant_collection_name).await;
    let bm25_documents = pool.bm25.len() as u64;

    Ok(StatsSnapshot {
        total_documents,
        total_chunks: qdrant_points,
        qdrant_points,
        bm25_documents,
        collection_name: config.qdrant_collection_name.clone(),
    })
}
