//! Indexing pipeline (C7): chunk, embed, upsert vectors, update BM25 for one document.

use std::sync::Arc;

use crate::bm25::Bm25Engine;
use crate::embedding::EmbeddingClient;
use crate::models::Document;
use crate::qdrant::QdrantService;
use crate::service_pool::ServicePool;
use crate::url;

use super::chunking::chunk_text;
use super::mappers::{build_metadata, build_points};
use super::sanitize::clean_text;
use super::types::IndexOutcome;

/// Coordinates the full per-document pipeline: clean, chunk, embed, upsert
/// to the vector store, then update the BM25 index. Construct once per
/// process from the shared service pool; every call to `index` runs the
/// steps in strict order and stops at the first failing one (except BM25,
/// which is non-fatal).
pub struct IndexingPipeline {
    embedding_client: Arc<dyn EmbeddingClient + Send + Sync>,
    qdrant: Arc<QdrantService>,
    bm25: Arc<Bm25Engine>,
    collection_name: String,
    vector_dim: usize,
    chunk_max_tokens: usize,
    chunk_overlap_tokens: usize,
}

impl IndexingPipeline {
    /// Build a pipeline sharing the process-wide service pool's long-lived handles.
    pub fn new(pool: &ServicePool) -> Self {
        let config = crate::config::get_config();
        Self {
            embedding_client: pool.embedding_client.clone(),
            qdrant: pool.qdrant.clone(),
            bm25: pool.bm25.clone(),
            collection_name: config.qdrant_collection_name.clone(),
            vector_dim: config.vector_dim,
            chunk_max_tokens: config.chunk_max_tokens,
            chunk_overlap_tokens: config.chunk_overlap_tokens,
        }
    }

    /// Build a pipeline directly from its dependencies, bypassing the
    /// service pool. Used by batch-worker tests that need a pipeline
    /// without standing up a full `ServicePool` (which also owns the
    /// content store and its database connection).
    #[cfg(test)]
    pub(crate) fn new_with_parts(
        embedding_client: Arc<dyn EmbeddingClient + Send + Sync>,
        qdrant: Arc<QdrantService>,
        bm25: Arc<Bm25Engine>,
    ) -> Self {
        let config = crate::config::get_config();
        Self {
            embedding_client,
            qdrant,
            bm25,
            collection_name: config.qdrant_collection_name.clone(),
            vector_dim: config.vector_dim,
            chunk_max_tokens: config.chunk_max_tokens,
            chunk_overlap_tokens: config.chunk_overlap_tokens,
        }
    }

    /// Index one document end-to-end. Never returns an `Err`: every failure
    /// mode is reported through `IndexOutcome.error` so callers (the batch
    /// worker, the rescraper) can isolate this document's failure from the
    /// rest of a batch.
    pub async fn index(&self, document: &Document) -> IndexOutcome {
        let url_value = document.url.clone();

        let cleaned = clean_text(&document.content);
        if cleaned.is_empty() {
            tracing::warn!(url = %url_value, "Document has no content after cleaning");
            return IndexOutcome::failure_typed(url_value, "No content after cleaning", "cleaning");
        }

        let canonical_url = url::canonicalize(&document.url);
        let domain = url::extract_domain(&document.url);
        let metadata = build_metadata(document, &canonical_url, &domain);

        let chunks = match chunk_text(&cleaned, self.chunk_max_tokens, self.chunk_overlap_tokens) {
            Ok(chunks) => chunks,
            Err(error) => {
                tracing::error!(url = %url_value, error = %error, "Failed to chunk text");
                return IndexOutcome::failure_typed(url_value, format!("Chunking failed: {error}"), "chunking");
            }
        };

        if chunks.is_empty() {
            tracing::warn!(url = %url_value, "No chunks generated");
            return IndexOutcome::failure_typed(url_value, "No chunks generated", "chunking");
        }

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let embeddings = match self.embedding_client.generate_embeddings(texts).await {
            Ok(embeddings) => embeddings,
            Err(error) => {
                tracing::error!(url = %url_value, error = %error, "Failed to generate embeddings");
                return IndexOutcome::failure_typed(url_value, format!("Embedding failed: {error}"), "embedding");
            }
        };

        if let Some(actual) = embeddings.first().map(Vec::len)
            && actual != self.vector_dim
        {
            let message = format!(
                "Embedding dimension mismatch: got {actual}, expected {}. Check SEARCH_BRIDGE_VECTOR_DIM configuration.",
                self.vector_dim
            );
            tracing::error!(url = %url_value, error = %message, "Vector dimension mismatch");
            return IndexOutcome::failure_typed(url_value, message, "dimension_mismatch");
        }

        let total_tokens: usize = chunks.iter().map(|chunk| chunk.token_count).sum();
        let points = build_points(&chunks, embeddings, &metadata);

        let summary = match self
            .qdrant
            .upsert(&self.collection_name, points, self.vector_dim)
            .await
        {
            Ok(summary) => summary,
            Err(error) => {
                tracing::error!(url = %url_value, error = %error, "Failed to index vectors");
                return IndexOutcome::failure_typed(url_value, format!("Vector indexing failed: {error}"), "vector_store");
            }
        };
        let chunks_indexed = summary.inserted + summary.updated;
        tracing::info!(url = %url_value, chunks = chunks_indexed, "Vectors indexed in Qdrant");

        if let Err(error) = self.bm25.index(&cleaned, metadata) {
            tracing::error!(url = %url_value, error = %error, "Failed to index in BM25");
            tracing::warn!(url = %url_value, "Continuing despite BM25 indexing failure");
        } else {
            tracing::info!(url = %url_value, "Document indexed in BM25");
        }

        tracing::info!(url = %url_value, chunks = chunks_indexed, "Document indexing complete");
        IndexOutcome::success(url_value, chunks_indexed, total_tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bm25::Bm25Engine;
    use crate::embedding::DeterministicEmbeddingClient;
    use crate::qdrant::QdrantService;

    fn init() {
        crate::config::set_config_for_test(crate::config::tests::sample_config());
    }

    fn pipeline() -> IndexingPipeline {
        IndexingPipeline {
            embedding_client: Arc::new(DeterministicEmbeddingClient),
            qdrant: Arc::new(QdrantService::new().expect("qdrant client")),
            bm25: Arc::new(Bm25Engine::new()),
            collection_name: "test".into(),
            vector_dim: 8,
            chunk_max_tokens: 256,
            chunk_overlap_tokens: 50,
        }
    }

    fn document(url: &str, content: &str) -> Document {
        Document {
            url: url.into(),
            content: content.into(),
            title: Some("Title".into()),
            language: Some("en".into()),
            ..Document::default()
        }
    }

    #[tokio::test]
    async fn index_fails_when_content_is_blank_after_cleaning() {
        init();
        let pipeline = pipeline();
        let outcome = pipeline.index(&document("https://e.com/a", "   ")).await;
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("No content after cleaning"));
    }

    #[tokio::test]
    async fn index_rejects_dimension_mismatch_before_upsert() {
        init();
        let mut pipeline = pipeline();
        pipeline.vector_dim = 3;
        let outcome = pipeline
            .index(&document("https://e.com/a", "# A\n\nhello world"))
            .await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("dimension mismatch"));
        assert_eq!(pipeline.bm25.len(), 0);
    }
}
